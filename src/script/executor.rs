//! Step Executor
//!
//! Runs compiled steps one at a time against a [`PageDriver`]. After each
//! step: report progress, then pause for the configured inter-step delay.
//! The first failing step aborts the run; there are no retries.

use super::step::{
    display_value, CaptureStep, ChangeStep, ClickStep, EvaluateStep, KeyStep, NavigateStep, PromptStep,
    ReloadStep, SleepStep, Step, TextStep, ViewportStep, WaitForStep, WaitUntil,
};
use crate::ai::{ActOptions, AiExecutor};
use crate::browser::{ClickOptions, NavigationOptions, PageDriver};
use crate::capture::{CaptureHandle, CaptureRule};
use crate::error::{Result, StepError};
use crate::interpolate::Variables;
use crate::output::OutputDocument;
use crate::report::Reporter;
use crate::selector::Target;
use crate::settings::Settings;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;

static ABSOLUTE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+://\S+$").expect("url pattern is valid"));

/// Everything one run owns besides the page and the AI executor.
pub struct RunContext {
    pub settings: Settings,
    pub variables: Variables,
    pub reporter: Reporter,
    pub output: OutputDocument,
    pub captures: CaptureHandle,
}

pub struct StepExecutor<'a> {
    page: &'a dyn PageDriver,
    ai: &'a dyn AiExecutor,
    ctx: &'a mut RunContext,
}

impl<'a> StepExecutor<'a> {
    pub fn new(page: &'a dyn PageDriver, ai: &'a dyn AiExecutor, ctx: &'a mut RunContext) -> Self {
        Self { page, ai, ctx }
    }

    /// Run every step in order.
    pub async fn run(&mut self, steps: &[Step]) -> Result<()> {
        if steps.is_empty() {
            return Err(StepError::validation("Cannot run script: No steps found."));
        }

        let total = steps.len();
        for (i, step) in steps.iter().enumerate() {
            match step {
                Step::Unknown(kind) => {
                    log::warn!("🟠 Warning: Skipping unknown step type: {}", kind);
                }
                _ => {
                    log::info!("🔵 Step {}/{}: {}", i + 1, total, step.describe());
                    self.run_step(step).await?;
                }
            }

            if let Err(e) = self.ctx.reporter.progress(i + 1, total) {
                log::warn!("🟠 Warning: failed to report progress: {}", e);
            }

            tokio::time::sleep(self.ctx.settings.step_delay).await;
        }

        Ok(())
    }

    /// Run a single step.
    pub async fn run_step(&mut self, step: &Step) -> Result<()> {
        match step {
            Step::Navigate(s) => self.navigate(s).await,
            Step::Reload(s) => self.reload(s).await,
            Step::Capture(s) => self.capture(s),
            Step::Action(s) => self.action(s).await,
            Step::Extract(s) => self.extract(s).await,
            Step::SetViewport(s) => self.set_viewport(s).await,
            Step::Click(s) => self.click("click", s, 1).await,
            Step::DoubleClick(s) => self.click("doubleClick", s, 2).await,
            Step::Change(s) => self.change(s).await,
            Step::KeyDown(s) => self.key_down(s).await,
            Step::KeyUp(s) => self.key_up(s).await,
            Step::Text(s) => self.text(s).await,
            Step::Evaluate(s) => self.evaluate(s).await,
            Step::Sleep(s) => self.sleep(s).await,
            Step::WaitFor(s) => self.wait_for(s).await,
            Step::Unknown(kind) => {
                log::warn!("🟠 Warning: Skipping unknown step type: {}", kind);
                Ok(())
            }
            Step::Invalid { kind, reason } => Err(Step::invalid_error(kind, reason)),
        }
    }

    fn dom_timeout(&self, step_timeout: Option<u64>) -> Duration {
        step_timeout
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(self.ctx.settings.dom_timeout)
    }

    fn nav_options(&self, timeout: Option<u64>, wait_until: Option<WaitUntil>) -> NavigationOptions {
        NavigationOptions {
            timeout: timeout
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(self.ctx.settings.nav_timeout),
            wait_until: wait_until.unwrap_or_default(),
        }
    }

    async fn navigate(&mut self, step: &NavigateStep) -> Result<()> {
        let url = match &step.url {
            Some(Value::String(url)) if ABSOLUTE_URL.is_match(url) => url,
            other => {
                return Err(StepError::validation(format!(
                    "Navigate: Invalid URL: {}",
                    display_value(other)
                )))
            }
        };

        self.page
            .goto(url, self.nav_options(step.timeout, step.wait_until))
            .await
    }

    async fn reload(&mut self, step: &ReloadStep) -> Result<()> {
        self.page
            .reload(self.nav_options(step.timeout, step.wait_until))
            .await
    }

    fn capture(&mut self, step: &CaptureStep) -> Result<()> {
        let url = match &step.url {
            Some(Value::String(url)) if !url.is_empty() => url,
            other => {
                return Err(StepError::validation(format!(
                    "Capture: Invalid match: {}",
                    display_value(other)
                )))
            }
        };

        self.ctx.captures.register(CaptureRule {
            url: url.clone(),
            download: step.download,
            pretty: step.pretty,
        })
    }

    async fn action(&mut self, step: &PromptStep) -> Result<()> {
        let prompt = required_prompt(step, "Action: No prompt specified.")?;
        let options = ActOptions {
            variables: &self.ctx.variables,
            timeout: self.dom_timeout(step.timeout),
        };

        match self.ai.act(self.page, prompt, options).await? {
            Some(outcome) if outcome.success => {
                log::debug!("Action result: {}", outcome.description);
                Ok(())
            }
            Some(outcome) => Err(StepError::ActionFailed(format!(
                "{}: {}",
                outcome.description, outcome.message
            ))),
            None => Err(StepError::ActionFailed(format!(
                "{}: no outcome returned",
                prompt
            ))),
        }
    }

    async fn extract(&mut self, step: &PromptStep) -> Result<()> {
        let prompt = required_prompt(step, "Extract: No prompt specified.")?;
        let timeout = self.dom_timeout(step.timeout);

        let result = self
            .ai
            .extract(self.page, prompt, timeout)
            .await?
            .ok_or_else(|| StepError::ExtractionFailed(prompt.to_string()))?;

        log::debug!("Extraction result: {}", result);
        self.ctx.output.push_extraction(prompt, result);
        Ok(())
    }

    async fn set_viewport(&mut self, step: &ViewportStep) -> Result<()> {
        let dimension = |v: Option<u64>| v.filter(|v| *v > 0).and_then(|v| u32::try_from(v).ok());
        let (Some(width), Some(height)) = (dimension(step.width), dimension(step.height)) else {
            return Err(StepError::validation(
                "setViewport: width and/or height missing.",
            ));
        };

        self.page.set_viewport(width, height).await
    }

    async fn click(&mut self, kind: &str, step: &ClickStep, click_count: i64) -> Result<()> {
        let target = Target::from_selectors(kind, step.selectors.as_ref())?;
        let options = ClickOptions {
            timeout: self.dom_timeout(step.timeout),
            offset: step.offset(),
            click_count,
        };

        self.page.click(&target, options).await
    }

    async fn change(&mut self, step: &ChangeStep) -> Result<()> {
        let target = Target::from_selectors("change", step.selectors.as_ref())?;
        let value = self.ctx.variables.interpolate(&step.value_text())?;

        self.page
            .fill(&target, &value, self.dom_timeout(step.timeout))
            .await
    }

    async fn key_down(&mut self, step: &KeyStep) -> Result<()> {
        let key = required_key(step, "keyDown: Missing key to hit.")?;
        self.page.key_down(key).await
    }

    async fn key_up(&mut self, step: &KeyStep) -> Result<()> {
        let key = required_key(step, "keyUp: Missing key to release.")?;
        self.page.key_up(key).await
    }

    async fn text(&mut self, step: &TextStep) -> Result<()> {
        let text = step
            .content()
            .ok_or_else(|| StepError::validation("Text: Missing text to enter."))?;
        let text = self.ctx.variables.interpolate(text)?;

        self.page.insert_text(&text).await
    }

    async fn evaluate(&mut self, step: &EvaluateStep) -> Result<()> {
        let script = step
            .script
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| StepError::validation("Evaluate: Missing script code to execute."))?;
        let code = self.ctx.variables.interpolate(script)?;

        let result = self.page.evaluate(&code).await?;
        log::debug!("Evaluation result: {}", result);

        // The script is recorded as written, so resolved secrets stay out of the output
        self.ctx.output.push_evaluation(script, result);
        Ok(())
    }

    async fn sleep(&mut self, step: &SleepStep) -> Result<()> {
        let ms = step
            .duration
            .filter(|ms| *ms > 0)
            .ok_or_else(|| StepError::validation("Sleep: Missing duration (ms) to sleep for."))?;

        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    }

    async fn wait_for(&mut self, step: &WaitForStep) -> Result<()> {
        let target = Target::from_selectors("waitFor", step.selectors.as_ref())?;

        self.page
            .wait_for(
                &target,
                step.state.unwrap_or_default(),
                self.dom_timeout(step.timeout),
            )
            .await
    }
}

fn required_prompt<'s>(step: &'s PromptStep, message: &str) -> Result<&'s str> {
    step.prompt
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| StepError::validation(message))
}

fn required_key<'s>(step: &'s KeyStep, message: &str) -> Result<&'s str> {
    step.key
        .as_deref()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| StepError::validation(message))
}
