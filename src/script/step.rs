//! Step Types
//!
//! Defines the compiled form of every step a script can contain. Steps are
//! decoded from the JSON objects produced by a recorder or by the line
//! compiler; required fields are kept optional here and checked by the
//! executor when the step runs, so a bad step fails at its own position in
//! the script.

use crate::error::StepError;
use crate::lenient;
use crate::selector::{ElementState, Target};
use serde::Deserialize;
use serde_json::Value;

/// Step kinds the executor has a handler for.
pub const KNOWN_KINDS: &[&str] = &[
    "navigate",
    "reload",
    "capture",
    "action",
    "extract",
    "setViewport",
    "click",
    "doubleClick",
    "change",
    "keyDown",
    "keyUp",
    "text",
    "evaluate",
    "sleep",
    "waitFor",
];

/// One unit of a compiled script
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Step {
    Navigate(NavigateStep),
    Reload(ReloadStep),
    Capture(CaptureStep),
    Action(PromptStep),
    Extract(PromptStep),
    SetViewport(ViewportStep),
    Click(ClickStep),
    DoubleClick(ClickStep),
    Change(ChangeStep),
    KeyDown(KeyStep),
    KeyUp(KeyStep),
    Text(TextStep),
    Evaluate(EvaluateStep),
    Sleep(SleepStep),
    WaitFor(WaitForStep),

    /// A step kind with no handler; skipped with a warning
    #[serde(skip_deserializing)]
    Unknown(String),

    /// A known kind whose fields could not be decoded; fails when reached
    #[serde(skip_deserializing)]
    Invalid { kind: String, reason: String },
}

/// When a navigation counts as finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    #[default]
    Load,
    DomContentLoaded,
    NetworkIdle,
    Commit,
}

impl WaitUntil {
    /// Name of the `Page.lifecycleEvent` that satisfies this condition
    pub fn lifecycle_event(&self) -> Option<&'static str> {
        match self {
            WaitUntil::Load => Some("load"),
            WaitUntil::DomContentLoaded => Some("DOMContentLoaded"),
            WaitUntil::NetworkIdle => Some("networkIdle"),
            WaitUntil::Commit => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateStep {
    /// Must be an absolute URI; checked when the step runs
    #[serde(default)]
    pub url: Option<Value>,

    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,

    #[serde(default)]
    pub wait_until: Option<WaitUntil>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadStep {
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,

    #[serde(default)]
    pub wait_until: Option<WaitUntil>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CaptureStep {
    /// Substring matched against response URLs; must be a non-empty string
    #[serde(default)]
    pub url: Option<Value>,

    #[serde(default, deserialize_with = "lenient::flag")]
    pub download: bool,

    #[serde(default, deserialize_with = "lenient::flag")]
    pub pretty: bool,
}

/// Natural-language instruction for the AI executor (`action` and `extract`)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PromptStep {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub prompt: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ViewportStep {
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub width: Option<u64>,

    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub height: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickStep {
    #[serde(default)]
    pub selectors: Option<Value>,

    /// Click position relative to the element's top-left corner; ignored
    /// unless both are numeric
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub offset_x: Option<f64>,

    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub offset_y: Option<f64>,

    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
}

impl ClickStep {
    pub fn offset(&self) -> Option<(f64, f64)> {
        Some((self.offset_x?, self.offset_y?))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChangeStep {
    #[serde(default)]
    pub selectors: Option<Value>,

    /// Form value; numbers are accepted and stringified
    #[serde(default)]
    pub value: Option<Value>,

    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
}

impl ChangeStep {
    /// The value to fill, `""` when absent.
    pub fn value_text(&self) -> String {
        match &self.value {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct KeyStep {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TextStep {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub text: Option<String>,

    /// Legacy spelling of `text`
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub value: Option<String>,
}

impl TextStep {
    pub fn content(&self) -> Option<&str> {
        self.text
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| self.value.as_deref().filter(|v| !v.is_empty()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EvaluateStep {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub script: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SleepStep {
    /// Milliseconds
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub duration: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WaitForStep {
    #[serde(default)]
    pub selectors: Option<Value>,

    #[serde(default)]
    pub state: Option<ElementState>,

    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
}

impl Step {
    /// Decode one step object. Unrecognized kinds become [`Step::Unknown`];
    /// a recognized kind with malformed fields becomes [`Step::Invalid`], so
    /// the steps before it still run.
    pub fn from_value(value: Value) -> Self {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if !KNOWN_KINDS.contains(&kind.as_str()) {
            return Step::Unknown(kind);
        }

        serde_json::from_value(value).unwrap_or_else(|e| Step::Invalid {
            kind,
            reason: e.to_string(),
        })
    }

    /// The validation error an [`Step::Invalid`] step raises when reached.
    pub fn invalid_error(kind: &str, reason: &str) -> StepError {
        StepError::validation(format!("Invalid '{}' step: {}", kind, reason))
    }

    /// The step's `type` tag
    pub fn kind(&self) -> &str {
        match self {
            Step::Navigate(_) => "navigate",
            Step::Reload(_) => "reload",
            Step::Capture(_) => "capture",
            Step::Action(_) => "action",
            Step::Extract(_) => "extract",
            Step::SetViewport(_) => "setViewport",
            Step::Click(_) => "click",
            Step::DoubleClick(_) => "doubleClick",
            Step::Change(_) => "change",
            Step::KeyDown(_) => "keyDown",
            Step::KeyUp(_) => "keyUp",
            Step::Text(_) => "text",
            Step::Evaluate(_) => "evaluate",
            Step::Sleep(_) => "sleep",
            Step::WaitFor(_) => "waitFor",
            Step::Unknown(kind) | Step::Invalid { kind, .. } => kind,
        }
    }

    /// Human-readable summary for the progress log
    pub fn describe(&self) -> String {
        match self {
            Step::Navigate(s) => format!("Navigating to: {}", display_value(&s.url)),
            Step::Reload(_) => "Reloading page.".to_string(),
            Step::Capture(s) => {
                format!("Capturing network requests for: {}", display_value(&s.url))
            }
            Step::Action(s) => format!("Taking action: {}", s.prompt.as_deref().unwrap_or("")),
            Step::Extract(s) => format!("Extracting data: {}", s.prompt.as_deref().unwrap_or("")),
            Step::SetViewport(s) => format!(
                "Setting viewport size: {}x{}",
                s.width.unwrap_or(0),
                s.height.unwrap_or(0)
            ),
            Step::Click(s) => format!(
                "Clicking on: {}",
                Target::describe_groups(s.selectors.as_ref())
            ),
            Step::DoubleClick(s) => format!(
                "Double-clicking on: {}",
                Target::describe_groups(s.selectors.as_ref())
            ),
            Step::Change(s) => format!(
                "Changing form element: {} to: {}",
                Target::describe_groups(s.selectors.as_ref()),
                s.value_text()
            ),
            Step::KeyDown(s) => format!("Pressing key: {}", s.key.as_deref().unwrap_or("")),
            Step::KeyUp(s) => format!("Releasing key: {}", s.key.as_deref().unwrap_or("")),
            Step::Text(s) => format!("Typing text: {}", s.content().unwrap_or("")),
            Step::Evaluate(s) => format!(
                "Evaluating JavaScript: {}",
                s.script.as_deref().unwrap_or("")
            ),
            Step::Sleep(s) => format!("Sleeping for {}ms.", s.duration.unwrap_or(0)),
            Step::WaitFor(s) => format!(
                "Waiting for: {}",
                Target::describe_groups(s.selectors.as_ref())
            ),
            Step::Unknown(kind) => format!("Unknown step type: {}", kind),
            Step::Invalid { kind, .. } => format!("Malformed {} step.", kind),
        }
    }
}

/// Render a loosely-typed field for messages: strings bare, anything else as JSON.
pub(crate) fn display_value(value: &Option<Value>) -> String {
    match value {
        None => "(none)".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
