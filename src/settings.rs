//! Job document and run settings
//!
//! A job arrives as `{ "xy": 0|1, "params": { ... } }`. The raw params are
//! kept for diagnostics; [`Settings`] is the normalized view every other
//! module reads from.

use crate::error::{Result, StepError};
use crate::lenient;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 720;
pub const DEFAULT_DOM_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_NAV_TIMEOUT_MS: u64 = 30000;
pub const DEFAULT_STEP_DELAY_MS: u64 = 1000;
pub const DEFAULT_LOCALE: &str = "en-US";
pub const DEFAULT_AI_MODEL: &str = "google/gemini-2.5-flash";

/// One job, read once from process input.
#[derive(Debug, Clone)]
pub struct Job {
    /// Whether machine-readable progress and result lines are expected
    pub xy: bool,

    pub params: Params,

    /// The job exactly as received, used for the verbose dump
    pub raw: Value,
}

/// Parameters as they appear in the job document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Params {
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub verbose: Option<u64>,

    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub width: Option<u64>,

    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub height: Option<u64>,

    #[serde(default, rename = "domTimeout", deserialize_with = "lenient::opt_u64")]
    pub dom_timeout: Option<u64>,

    #[serde(default, rename = "navTimeout", deserialize_with = "lenient::opt_u64")]
    pub nav_timeout: Option<u64>,

    #[serde(default, rename = "stepDelay", deserialize_with = "lenient::opt_u64")]
    pub step_delay: Option<u64>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub video: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub scale: Option<f64>,

    #[serde(default, deserialize_with = "lenient::flag")]
    pub ssl_cert_bypass: bool,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub locale: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub ai_model: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub ai_api_key: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub ai_base_url: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub ai_system_prompt: Option<String>,

    #[serde(default, deserialize_with = "lenient::flag")]
    pub ai_log_inference: bool,

    /// Structured object, JSON text, or line-oriented text
    #[serde(default)]
    pub script: Value,
}

/// Video capture policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoMode {
    None,
    Always,
    /// Any other value: record, then delete once the run is over
    Discard(String),
}

impl VideoMode {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            None => VideoMode::None,
            Some(v) if v.is_empty() || v == "none" => VideoMode::None,
            Some(v) if v == "always" => VideoMode::Always,
            Some(v) => VideoMode::Discard(v),
        }
    }

    pub fn records(&self) -> bool {
        !matches!(self, VideoMode::None)
    }

    pub fn keeps(&self) -> bool {
        matches!(self, VideoMode::Always)
    }
}

/// Normalized, fully-defaulted run settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub verbose: u64,
    pub width: u32,
    pub height: u32,
    pub dom_timeout: Duration,
    pub nav_timeout: Duration,
    pub step_delay: Duration,
    pub video: VideoMode,
    pub scale: f64,
    pub ssl_cert_bypass: bool,
    pub locale: String,
    pub ai_model: String,
    pub ai_api_key: String,
    pub ai_base_url: Option<String>,
    pub ai_system_prompt: Option<String>,
    pub ai_log_inference: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings::from_params(&Params::default())
    }
}

impl Settings {
    pub fn from_params(params: &Params) -> Self {
        // Zero means "unset" for every numeric option.
        let positive = |v: Option<u64>| v.filter(|v| *v > 0);
        let dimension = |v: Option<u64>, default: u32| {
            positive(v)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(default)
        };

        Self {
            verbose: params.verbose.unwrap_or(0),
            width: dimension(params.width, DEFAULT_WIDTH),
            height: dimension(params.height, DEFAULT_HEIGHT),
            dom_timeout: Duration::from_millis(
                positive(params.dom_timeout).unwrap_or(DEFAULT_DOM_TIMEOUT_MS),
            ),
            nav_timeout: Duration::from_millis(
                positive(params.nav_timeout).unwrap_or(DEFAULT_NAV_TIMEOUT_MS),
            ),
            step_delay: Duration::from_millis(
                positive(params.step_delay).unwrap_or(DEFAULT_STEP_DELAY_MS),
            ),
            video: VideoMode::parse(params.video.as_deref()),
            scale: params.scale.filter(|s| *s > 0.0).unwrap_or(1.0),
            ssl_cert_bypass: params.ssl_cert_bypass,
            locale: params
                .locale
                .clone()
                .unwrap_or_else(|| DEFAULT_LOCALE.to_string()),
            ai_model: params
                .ai_model
                .clone()
                .unwrap_or_else(|| DEFAULT_AI_MODEL.to_string()),
            ai_api_key: params.ai_api_key.clone().unwrap_or_default(),
            ai_base_url: params.ai_base_url.clone(),
            ai_system_prompt: params.ai_system_prompt.clone(),
            ai_log_inference: params.ai_log_inference,
        }
    }
}

impl Job {
    /// Parse a complete job document.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(text)
            .map_err(|e| StepError::InvalidInput(format!("job is not valid JSON: {}", e)))?;
        Self::from_value(raw)
    }

    pub fn from_value(raw: Value) -> Result<Self> {
        let obj = raw
            .as_object()
            .ok_or_else(|| StepError::InvalidInput("job must be a JSON object".to_string()))?;

        let xy = obj.get("xy").is_some_and(lenient::truthy);
        let params = match obj.get("params") {
            Some(p) if !p.is_null() => Params::deserialize(p)
                .map_err(|e| StepError::InvalidInput(format!("invalid params: {}", e)))?,
            _ => Params::default(),
        };

        Ok(Self { xy, params, raw })
    }

    /// Read just the verbosity level, so logging can be configured before the
    /// job is validated. Anything unparseable counts as 0.
    pub fn peek_verbose(text: &str) -> u64 {
        serde_json::from_str::<Value>(text)
            .ok()
            .and_then(|v| v.pointer("/params/verbose").and_then(lenient::as_u64))
            .unwrap_or(0)
    }

    /// Whether a job that failed validation still asked for result lines.
    /// Text that is not a JSON object never reports anything.
    pub fn peek_xy(text: &str) -> bool {
        serde_json::from_str::<Value>(text)
            .ok()
            .and_then(|v| v.get("xy").map(lenient::truthy))
            .unwrap_or(false)
    }

    pub fn settings(&self) -> Settings {
        Settings::from_params(&self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let job = Job::parse(r#"{"params": {"script": "navigate https://example.com"}}"#).unwrap();
        let settings = job.settings();

        assert!(!job.xy);
        assert_eq!(settings.width, 1280);
        assert_eq!(settings.height, 720);
        assert_eq!(settings.dom_timeout, Duration::from_millis(3000));
        assert_eq!(settings.nav_timeout, Duration::from_millis(30000));
        assert_eq!(settings.step_delay, Duration::from_millis(1000));
        assert_eq!(settings.video, VideoMode::None);
        assert_eq!(settings.locale, "en-US");
        assert_eq!(settings.ai_model, "google/gemini-2.5-flash");
        assert!(!settings.ssl_cert_bypass);
        assert!(!settings.ai_log_inference);
    }

    #[test]
    fn test_numeric_strings_coerced() {
        let job = Job::parse(
            r#"{"xy": 1, "params": {
                "verbose": "2", "width": "800", "height": 600,
                "domTimeout": "5000", "stepDelay": 0, "video": "Always",
                "ssl_cert_bypass": 1, "scale": "2"
            }}"#,
        )
        .unwrap();
        let settings = job.settings();

        assert!(job.xy);
        assert_eq!(settings.verbose, 2);
        assert_eq!(settings.width, 800);
        assert_eq!(settings.height, 600);
        assert_eq!(settings.dom_timeout, Duration::from_millis(5000));
        // zero falls back to the default, like an unset value
        assert_eq!(settings.step_delay, Duration::from_millis(1000));
        assert_eq!(settings.video, VideoMode::Always);
        assert!(settings.ssl_cert_bypass);
        assert_eq!(settings.scale, 2.0);
    }

    #[test]
    fn test_video_modes() {
        assert!(!VideoMode::parse(None).records());
        assert!(!VideoMode::parse(Some("none")).records());

        let on_error = VideoMode::parse(Some("on-error"));
        assert!(on_error.records());
        assert!(!on_error.keeps());

        assert!(VideoMode::parse(Some("always")).keeps());
    }

    #[test]
    fn test_invalid_job() {
        assert!(matches!(
            Job::parse("not json"),
            Err(StepError::InvalidInput(_))
        ));
        assert!(matches!(Job::parse("[1, 2]"), Err(StepError::InvalidInput(_))));
        assert_eq!(Job::peek_verbose(r#"{"params": {"verbose": "1"}}"#), 1);
        assert_eq!(Job::peek_verbose("garbage"), 0);
    }

    #[test]
    fn test_unreadable_job_reports_nothing() {
        assert!(!Job::peek_xy("not json"));
        assert!(!Job::peek_xy(r#"{"xy": 1, "params": "#));
        assert!(!Job::peek_xy(r#"{"params": {"verbose": true}}"#));

        // readable document, rejected params: xy is known
        let text = r#"{"xy": 1, "params": 5}"#;
        assert!(Job::parse(text).is_err());
        assert!(Job::peek_xy(text));
    }
}
