//! AI executor over an OpenAI-compatible chat completions API.

use super::inference_log::InferenceLog;
use super::prompt::{self, PlannedAction};
use super::{ActOptions, ActOutcome, AiExecutor};
use crate::browser::{ClickOptions, PageDriver};
use crate::error::{Result, StepError};
use crate::selector::Target;
use crate::settings::Settings;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const GOOGLE_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const SCROLL_STEP: f64 = 600.0;

/// Resolve the chat completions endpoint and provider-local model name from
/// a `provider/model` string. `base_url` overrides the provider default.
pub fn resolve_endpoint(model: &str, base_url: Option<&str>) -> (String, String) {
    let (default_base, name) = match model.split_once('/') {
        Some(("google", name)) => (GOOGLE_BASE_URL, name),
        Some(("openai", name)) => (OPENAI_BASE_URL, name),
        Some(("anthropic", name)) => (ANTHROPIC_BASE_URL, name),
        _ => (OPENAI_BASE_URL, model),
    };

    let base = base_url
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .unwrap_or(default_base)
        .trim_end_matches('/');

    (format!("{}/chat/completions", base), name.to_string())
}

pub struct ChatCompletionsExecutor {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    system_prompt: Option<String>,
    log: Option<InferenceLog>,
}

impl ChatCompletionsExecutor {
    pub fn new(settings: &Settings) -> Result<Self> {
        let (endpoint, model) =
            resolve_endpoint(&settings.ai_model, settings.ai_base_url.as_deref());
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            endpoint,
            model,
            api_key: settings.ai_api_key.clone(),
            system_prompt: settings.ai_system_prompt.clone(),
            log: None,
        })
    }

    /// Record every exchange to `log`.
    pub fn with_inference_log(mut self, log: InferenceLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send `messages` and parse the reply as a JSON object.
    async fn complete_json(&self, kind: &str, messages: Vec<Value>) -> Result<Value> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.1,
            "response_format": { "type": "json_object" },
        });

        log::debug!("Inference request ({}) to {}", kind, self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let reply: Value = response.json().await?;

        if let Some(log) = &self.log {
            log.record(kind, &body, &reply);
        }

        if !status.is_success() {
            let message = reply["error"]["message"]
                .as_str()
                .unwrap_or("Unknown API error");
            return Err(StepError::Ai(format!("API error ({}): {}", status, message)));
        }

        let content = reply["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| StepError::Ai(format!("No content in model response: {}", reply)))?;

        let cleaned = prompt::clean_response(content);
        serde_json::from_str(&cleaned)
            .map_err(|e| StepError::Ai(format!("Failed to parse model response: {}", e)))
    }

    async fn perform(
        &self,
        page: &dyn PageDriver,
        action: &PlannedAction,
        options: &ActOptions<'_>,
    ) -> Result<ActOutcome> {
        let click = ClickOptions {
            timeout: options.timeout,
            offset: None,
            click_count: 1,
        };

        match action {
            PlannedAction::Click { element, .. } => {
                page.click(&Target::css(prompt::element_selector(element)), click)
                    .await?;
            }
            PlannedAction::Fill { element, value, .. } => {
                let value = options.variables.interpolate(value)?;
                page.fill(
                    &Target::css(prompt::element_selector(element)),
                    &value,
                    options.timeout,
                )
                .await?;
            }
            PlannedAction::Type { element, value, .. } => {
                let value = options.variables.interpolate(value)?;
                page.click(&Target::css(prompt::element_selector(element)), click)
                    .await?;
                page.insert_text(&value).await?;
            }
            PlannedAction::Press { key, .. } => {
                page.key_down(key).await?;
                page.key_up(key).await?;
            }
            PlannedAction::Scroll { direction, .. } => {
                let dy = if direction.eq_ignore_ascii_case("up") {
                    -SCROLL_STEP
                } else {
                    SCROLL_STEP
                };
                page.scroll_by(0.0, dy).await?;
            }
            PlannedAction::None { reason, .. } => {
                return Ok(ActOutcome {
                    success: false,
                    description: action.description().to_string(),
                    message: reason.clone(),
                });
            }
        }

        Ok(ActOutcome {
            success: true,
            description: action.description().to_string(),
            message: "Action performed".to_string(),
        })
    }
}

#[async_trait]
impl AiExecutor for ChatCompletionsExecutor {
    async fn act(
        &self,
        page: &dyn PageDriver,
        instruction: &str,
        options: ActOptions<'_>,
    ) -> Result<Option<ActOutcome>> {
        let snapshot = page.evaluate(prompt::SNAPSHOT_JS).await?;
        let names = options.variables.referenced_names(instruction);
        let messages =
            prompt::act_messages(instruction, &snapshot, &names, self.system_prompt.as_deref());

        let reply = self.complete_json("act", messages).await?;
        let action: PlannedAction = match serde_json::from_value(reply.clone()) {
            Ok(action) => action,
            Err(e) => {
                log::debug!("Unusable action from model ({}): {}", e, reply);
                return Ok(None);
            }
        };
        log::debug!("Model chose: {:?}", action);

        // A failed page operation is an unsuccessful outcome, not a transport error
        match self.perform(page, &action, &options).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e @ StepError::MissingVariable(_)) => Err(e),
            Err(e) => Ok(Some(ActOutcome {
                success: false,
                description: action.description().to_string(),
                message: e.to_string(),
            })),
        }
    }

    async fn extract(
        &self,
        page: &dyn PageDriver,
        instruction: &str,
        timeout: Duration,
    ) -> Result<Option<Value>> {
        let text = tokio::time::timeout(timeout, page.evaluate(prompt::PAGE_TEXT_JS))
            .await
            .map_err(|_| StepError::Timeout {
                ms: timeout.as_millis() as u64,
                what: "reading page text".to_string(),
            })??;

        let messages =
            prompt::extract_messages(instruction, &text, self.system_prompt.as_deref());
        let reply = self.complete_json("extract", messages).await?;

        Ok(match reply.get("result") {
            None | Some(Value::Null) => None,
            Some(result) => Some(result.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_prefixes() {
        assert_eq!(
            resolve_endpoint("google/gemini-2.5-flash", None),
            (
                "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions"
                    .to_string(),
                "gemini-2.5-flash".to_string()
            )
        );
        assert_eq!(
            resolve_endpoint("openai/gpt-4.1-mini", None).0,
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            resolve_endpoint("anthropic/claude-sonnet-4", None).1,
            "claude-sonnet-4"
        );
        assert_eq!(
            resolve_endpoint("llama3", None),
            (
                "https://api.openai.com/v1/chat/completions".to_string(),
                "llama3".to_string()
            )
        );
    }

    #[test]
    fn test_base_url_override() {
        assert_eq!(
            resolve_endpoint("openai/gpt-4.1", Some("http://localhost:11434/v1/")),
            (
                "http://localhost:11434/v1/chat/completions".to_string(),
                "gpt-4.1".to_string()
            )
        );
        // blank override is ignored
        assert_eq!(
            resolve_endpoint("openai/gpt-4.1", Some("  ")).0,
            "https://api.openai.com/v1/chat/completions"
        );
    }
}
