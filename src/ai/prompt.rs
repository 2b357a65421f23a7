//! Prompt templates and page snapshots for the AI executor

use serde::Deserialize;
use serde_json::Value;

/// Attribute used to address elements listed in a snapshot.
pub const ELEMENT_ID_ATTR: &str = "data-step-eid";

/// Largest page text sent for extraction, in characters.
pub const MAX_PAGE_TEXT: usize = 60_000;

/// Tags interactive elements with an id and lists them.
pub const SNAPSHOT_JS: &str = r#"(() => {
  const selector = 'a[href], button, input, select, textarea, summary, [role], [contenteditable="true"], [onclick], [tabindex]';
  const visible = (el) => {
    const style = window.getComputedStyle(el);
    if (style.visibility === 'hidden' || style.display === 'none') return false;
    const r = el.getBoundingClientRect();
    return r.width > 0 && r.height > 0;
  };
  const clip = (s) => (s || '').replace(/\s+/g, ' ').trim().slice(0, 80);
  document.querySelectorAll('[data-step-eid]').forEach((el) => el.removeAttribute('data-step-eid'));
  const out = [];
  let n = 0;
  for (const el of document.querySelectorAll(selector)) {
    if (out.length >= 300) break;
    if (!visible(el)) continue;
    const id = 'e' + (n++);
    el.setAttribute('data-step-eid', id);
    const item = { id, tag: el.tagName.toLowerCase() };
    const role = el.getAttribute('role'); if (role) item.role = role;
    const type = el.getAttribute('type'); if (type) item.type = type;
    const label = el.getAttribute('aria-label') || (el.labels && el.labels[0] && el.labels[0].textContent);
    if (label) item.label = clip(label);
    const placeholder = el.getAttribute('placeholder'); if (placeholder) item.placeholder = clip(placeholder);
    const name = el.getAttribute('name'); if (name) item.name = name;
    const text = clip(el.innerText || el.value);
    if (text) item.text = text;
    out.push(item);
  }
  return { url: location.href, title: document.title, elements: out };
})()"#;

pub const PAGE_TEXT_JS: &str =
    "(() => ({ url: location.href, title: document.title, text: document.body ? document.body.innerText : '' }))()";

const ACT_INSTRUCTIONS: &str = r#"You operate a web page on behalf of a script. You receive one instruction and a list of the page's interactive elements. Choose exactly ONE action that carries out the instruction.

Respond with a single JSON object, no markdown:

{"action": "click", "element": "e3", "description": "click the Sign in button"}
{"action": "fill", "element": "e5", "value": "jane@example.com", "description": "..."}
{"action": "type", "element": "e5", "value": "hello", "description": "..."}
{"action": "press", "key": "Enter", "description": "..."}
{"action": "scroll", "direction": "down", "description": "..."}
{"action": "none", "description": "...", "reason": "why the instruction cannot be carried out"}

Rules:
1. "element" must be an id from the element list.
2. "fill" replaces a field's value; "type" clicks the element and types at the cursor.
3. Placeholders written as %NAME% stand for secret values. Copy them into "value" verbatim; never invent their contents."#;

const EXTRACT_INSTRUCTIONS: &str = r#"You extract data from a web page. You receive an instruction and the visible text of the page.

Respond with a single JSON object, no markdown: {"result": <the extracted data>}

Use whatever JSON shape fits the instruction best (string, number, list or object). If the requested data is not on the page, respond with {"result": null}."#;

/// One chat message.
pub fn message(role: &str, content: impl Into<String>) -> Value {
    serde_json::json!({ "role": role, "content": content.into() })
}

fn system_message(base: &str, custom: Option<&str>) -> Value {
    match custom {
        Some(custom) if !custom.trim().is_empty() => {
            message("system", format!("{}\n\n{}", custom.trim(), base))
        }
        _ => message("system", base),
    }
}

/// Messages asking for one action against `snapshot`.
pub fn act_messages(
    instruction: &str,
    snapshot: &Value,
    variable_names: &[String],
    system_prompt: Option<&str>,
) -> Vec<Value> {
    let mut user = format!(
        "INSTRUCTION: {}\n\nPAGE: {} ({})\n\nELEMENTS:\n{}",
        instruction,
        snapshot.get("title").and_then(Value::as_str).unwrap_or(""),
        snapshot.get("url").and_then(Value::as_str).unwrap_or(""),
        serde_json::to_string(snapshot.get("elements").unwrap_or(&Value::Null))
            .unwrap_or_default(),
    );
    if !variable_names.is_empty() {
        let names: Vec<String> = variable_names.iter().map(|n| format!("%{}%", n)).collect();
        user.push_str(&format!(
            "\n\nAVAILABLE PLACEHOLDERS: {}",
            names.join(", ")
        ));
    }

    vec![
        system_message(ACT_INSTRUCTIONS, system_prompt),
        message("user", user),
    ]
}

/// Messages asking for data from the page text.
pub fn extract_messages(instruction: &str, page: &Value, system_prompt: Option<&str>) -> Vec<Value> {
    let text = page.get("text").and_then(Value::as_str).unwrap_or("");
    let text: String = text.chars().take(MAX_PAGE_TEXT).collect();

    vec![
        system_message(EXTRACT_INSTRUCTIONS, system_prompt),
        message(
            "user",
            format!(
                "INSTRUCTION: {}\n\nPAGE: {} ({})\n\nTEXT:\n{}",
                instruction,
                page.get("title").and_then(Value::as_str).unwrap_or(""),
                page.get("url").and_then(Value::as_str).unwrap_or(""),
                text
            ),
        ),
    ]
}

/// The model's choice for an `action` step.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum PlannedAction {
    Click {
        element: String,
        #[serde(default)]
        description: String,
    },
    Fill {
        element: String,
        #[serde(default)]
        value: String,
        #[serde(default)]
        description: String,
    },
    Type {
        element: String,
        #[serde(default)]
        value: String,
        #[serde(default)]
        description: String,
    },
    Press {
        key: String,
        #[serde(default)]
        description: String,
    },
    Scroll {
        #[serde(default)]
        direction: String,
        #[serde(default)]
        description: String,
    },
    None {
        #[serde(default)]
        description: String,
        #[serde(default)]
        reason: String,
    },
}

impl PlannedAction {
    pub fn description(&self) -> &str {
        match self {
            PlannedAction::Click { description, .. }
            | PlannedAction::Fill { description, .. }
            | PlannedAction::Type { description, .. }
            | PlannedAction::Press { description, .. }
            | PlannedAction::Scroll { description, .. }
            | PlannedAction::None { description, .. } => description,
        }
    }
}

/// CSS selector for a snapshot element id.
pub fn element_selector(id: &str) -> String {
    format!("[{}=\"{}\"]", ELEMENT_ID_ATTR, id.replace('"', ""))
}

/// Strip markdown fences models sometimes wrap JSON in.
pub fn clean_response(response: &str) -> String {
    let trimmed = response.trim();

    if trimmed.starts_with("```json") {
        trimmed
            .strip_prefix("```json")
            .and_then(|s| s.strip_suffix("```"))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| trimmed.to_string())
    } else if trimmed.starts_with("```") {
        trimmed
            .strip_prefix("```")
            .and_then(|s| s.strip_suffix("```"))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| trimmed.to_string())
    } else {
        trimmed.to_string()
    }
}
