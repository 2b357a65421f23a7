//! Natural-language steps (`action` and `extract`).
//!
//! The executor only sees the [`AiExecutor`] trait. The shipped
//! implementation talks to any OpenAI-compatible chat completions endpoint.

pub mod completions;
pub mod inference_log;
pub mod prompt;

use crate::browser::PageDriver;
use crate::error::Result;
use crate::interpolate::Variables;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

pub use completions::ChatCompletionsExecutor;
pub use inference_log::InferenceLog;

pub struct ActOptions<'a> {
    /// Values for `%NAME%` placeholders the model may use
    pub variables: &'a Variables,
    /// Timeout for page operations the action performs
    pub timeout: Duration,
}

/// What an `action` step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActOutcome {
    pub success: bool,
    pub description: String,
    pub message: String,
}

#[async_trait]
pub trait AiExecutor: Send + Sync {
    /// Perform one natural-language action on the page. `None` means the
    /// executor produced no outcome at all.
    async fn act(
        &self,
        page: &dyn PageDriver,
        instruction: &str,
        options: ActOptions<'_>,
    ) -> Result<Option<ActOutcome>>;

    /// Extract data of any shape from the page. `None` means nothing was found.
    async fn extract(
        &self,
        page: &dyn PageDriver,
        instruction: &str,
        timeout: Duration,
    ) -> Result<Option<Value>>;
}
