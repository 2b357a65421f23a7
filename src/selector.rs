//! Selector resolution
//!
//! Recorded steps name their element with groups of raw selector strings in
//! several syntaxes (`aria/Email`, `text/Sign in`, `xpath///*[@id="x"]`,
//! `pierce/#host >>> .item`, plain CSS). [`Locator::classify`] turns one raw
//! string into a typed lookup strategy, and [`Target`] keeps an ordered list
//! of them for one logical element.
//!
//! Nothing here touches the page. A `Target` is only evaluated when a page
//! operation runs, inside the page, by [`Target::script`]: the first
//! alternative that matches an element at that moment wins.

use crate::error::{Result, StepError};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

const PIERCE_PREFIX: &str = "pierce/";
const ARIA_PREFIX: &str = "aria/";
const TEXT_PREFIX: &str = "text/";
const XPATH_PREFIX: &str = "xpath/";

/// One lookup strategy for an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "by", content = "value", rename_all = "lowercase")]
pub enum Locator {
    /// Accessible label (aria-label, aria-labelledby or an associated `<label>`)
    Label(String),
    /// Case-insensitive substring of the element's visible text
    Text(String),
    /// XPath expression evaluated against the document
    XPath(String),
    /// CSS selector; `>>` descends into the previous match (and its shadow root)
    Css(String),
}

impl Locator {
    /// Classify a raw recorder selector. Returns `None` when the selector
    /// cannot identify anything (empty or `*` wildcard label/text).
    pub fn classify(raw: &str) -> Option<Locator> {
        // Shadow-boundary piercing is not preserved; the rest is classified normally.
        let raw = raw.strip_prefix(PIERCE_PREFIX).unwrap_or(raw);
        if raw.trim().is_empty() {
            return None;
        }

        if let Some(label) = raw.strip_prefix(ARIA_PREFIX) {
            let label = label.trim();
            if label.is_empty() || label == "*" {
                return None;
            }
            return Some(Locator::Label(label.to_string()));
        }

        if let Some(text) = raw.strip_prefix(TEXT_PREFIX) {
            if text.is_empty() || text == "*" {
                return None;
            }
            return Some(Locator::Text(text.to_string()));
        }

        if let Some(expr) = raw.strip_prefix(XPATH_PREFIX) {
            let expr = expr.trim_start_matches('/');
            if expr.trim().is_empty() {
                return None;
            }
            return Some(Locator::XPath(format!("//{}", expr)));
        }

        if raw.starts_with("//") || raw.starts_with("(//") {
            return Some(Locator::XPath(raw.to_string()));
        }

        if raw.contains(">>>") {
            return Some(Locator::Css(raw.replace(">>>", ">>")));
        }

        Some(Locator::Css(raw.to_string()))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Label(v) => write!(f, "label={}", v),
            Locator::Text(v) => write!(f, "text={}", v),
            Locator::XPath(v) => write!(f, "xpath={}", v),
            Locator::Css(v) => write!(f, "css={}", v),
        }
    }
}

/// State a target must reach for `waitFor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementState {
    #[default]
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl fmt::Display for ElementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementState::Visible => "visible",
            ElementState::Hidden => "hidden",
            ElementState::Attached => "attached",
            ElementState::Detached => "detached",
        };
        f.write_str(name)
    }
}

/// An ordered chain of lookup strategies for one logical element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    alternatives: Vec<Locator>,
}

impl Target {
    pub fn new(alternatives: Vec<Locator>) -> Self {
        Self { alternatives }
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Self::new(vec![Locator::Css(selector.into())])
    }

    /// Build a target from a step's `selectors` field: a list of candidate
    /// groups, each a non-empty list of raw strings for the same element.
    ///
    /// Only the first string of each group is used.
    pub fn from_selectors(kind: &str, selectors: Option<&Value>) -> Result<Self> {
        let groups = selectors
            .and_then(Value::as_array)
            .ok_or_else(|| StepError::validation(format!("Step of type '{}' has no selectors", kind)))?;

        let alternatives: Vec<Locator> = groups
            .iter()
            .filter_map(|group| group.as_array()?.first()?.as_str())
            .filter_map(Locator::classify)
            .collect();

        if alternatives.is_empty() {
            return Err(StepError::validation(format!(
                "Could not build any locator for step type: {}",
                kind
            )));
        }

        Ok(Self { alternatives })
    }

    pub fn alternatives(&self) -> &[Locator] {
        &self.alternatives
    }

    /// Raw selector text for progress lines.
    pub fn describe_groups(selectors: Option<&Value>) -> String {
        selectors
            .and_then(Value::as_array)
            .map(|groups| {
                groups
                    .iter()
                    .filter_map(|g| match g {
                        Value::Array(items) => Some(
                            items
                                .iter()
                                .filter_map(Value::as_str)
                                .collect::<Vec<_>>()
                                .join(","),
                        ),
                        Value::String(s) => Some(s.clone()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default()
    }

    /// JavaScript expression that resolves this target inside the page and
    /// evaluates `body` with `el` bound to the first matching element (or
    /// `null`). `isVisible(el)` is in scope as well.
    pub fn script(&self, body: &str) -> String {
        let alternatives =
            serde_json::to_string(&self.alternatives).unwrap_or_else(|_| "[]".to_string());
        format!(
            "(() => {{\n{resolver}\nconst el = resolveTarget({alternatives});\n{body}\n}})()",
            resolver = RESOLVER_JS,
            alternatives = alternatives,
            body = body,
        )
    }

    /// Script returning `true` once the target is in `state`, `null` otherwise.
    pub fn state_script(&self, state: ElementState) -> String {
        let check = match state {
            ElementState::Visible => "return isVisible(el) ? true : null;",
            ElementState::Hidden => "return !isVisible(el) ? true : null;",
            ElementState::Attached => "return el ? true : null;",
            ElementState::Detached => "return el ? null : true;",
        };
        self.script(check)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.alternatives.iter().map(|l| l.to_string()).collect();
        f.write_str(&parts.join(" | "))
    }
}

/// In-page resolver. Alternatives are tried in order; the first hit wins.
const RESOLVER_JS: &str = r#"
const normText = (s) => (s || '').replace(/\s+/g, ' ').trim().toLowerCase();
const isVisible = (node) => {
  if (!node || !node.isConnected) return false;
  const style = window.getComputedStyle(node);
  if (style.visibility === 'hidden' || style.display === 'none') return false;
  const rect = node.getBoundingClientRect();
  return rect.width > 0 && rect.height > 0;
};
const ownText = (node) => normText(node.innerText !== undefined ? node.innerText : node.textContent);
const byCss = (selector) => {
  const parts = selector.split('>>').map((p) => p.trim()).filter(Boolean);
  let scope = [document];
  for (const part of parts) {
    const next = [];
    for (const node of scope) {
      if (node.shadowRoot) next.push(...node.shadowRoot.querySelectorAll(part));
      next.push(...node.querySelectorAll(part));
    }
    if (!next.length) return null;
    scope = next;
  }
  return scope[0] === document ? null : scope[0];
};
const byXPath = (expr) => {
  const result = document.evaluate(expr, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null);
  return result.singleNodeValue;
};
const byLabel = (label) => {
  const wanted = normText(label);
  for (const node of document.querySelectorAll('*')) {
    const aria = node.getAttribute('aria-label');
    if (aria && normText(aria).includes(wanted)) return node;
    const labelledBy = node.getAttribute('aria-labelledby');
    if (labelledBy) {
      const text = labelledBy.split(/\s+/).map((id) => {
        const ref = document.getElementById(id);
        return ref ? ref.textContent : '';
      }).join(' ');
      if (normText(text).includes(wanted)) return node;
    }
    if (node.tagName === 'LABEL' && node.control && normText(node.textContent).includes(wanted)) {
      return node.control;
    }
  }
  return null;
};
const SKIP_TEXT = new Set(['SCRIPT', 'STYLE', 'NOSCRIPT', 'TEMPLATE', 'HEAD']);
const byText = (text) => {
  const wanted = normText(text);
  const root = document.body || document.documentElement;
  if (!root) return null;
  const walker = document.createTreeWalker(root, NodeFilter.SHOW_ELEMENT);
  let best = null;
  for (let node = walker.currentNode; node; node = walker.nextNode()) {
    if (SKIP_TEXT.has(node.tagName)) continue;
    if (!ownText(node).includes(wanted)) continue;
    const inChild = Array.from(node.children).some((c) => !SKIP_TEXT.has(c.tagName) && ownText(c).includes(wanted));
    if (!inChild) { best = node; break; }
  }
  return best;
};
const resolveTarget = (alternatives) => {
  for (const alt of alternatives) {
    let found = null;
    try {
      if (alt.by === 'label') found = byLabel(alt.value);
      else if (alt.by === 'text') found = byText(alt.value);
      else if (alt.by === 'xpath') found = byXPath(alt.value);
      else found = byCss(alt.value);
    } catch (e) {
      found = null;
    }
    if (found) return found;
  }
  return null;
};
"#;
