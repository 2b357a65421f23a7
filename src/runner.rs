//! Job lifecycle: prepare the work directory, compile, launch Chrome, run
//! the steps, then finish (or abort) and report.

use crate::ai::inference_log::{self, InferenceLog, LOG_DIR_NAME};
use crate::ai::ChatCompletionsExecutor;
use crate::browser::recorder::{discard_video, ScreencastRecorder};
use crate::browser::{ChromeDriver, LaunchOptions};
use crate::capture::{self, CaptureHandle, CaptureObserver, CaptureRule};
use crate::error::{Result, StepError};
use crate::interpolate::Variables;
use crate::output::OutputDocument;
use crate::report::Reporter;
use crate::script::{compile, RunContext, StepExecutor};
use crate::settings::{Job, Settings};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedReceiver;

/// Process-level options that do not come from the job.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Directory holding `downloads/`, `profile/` and `inference_summary/`
    pub work_dir: PathBuf,
    pub chrome_path: Option<PathBuf>,
    pub headless: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            chrome_path: None,
            headless: true,
        }
    }
}

/// Browser resources that must be released when the run ends.
struct Session {
    driver: ChromeDriver,
    observer: Option<CaptureObserver>,
    recorder: Option<ScreencastRecorder>,
}

impl Session {
    /// Stop recording and observing, merge captures into `output`, close the
    /// browser. Returns the video path (if any) and the result of closing.
    async fn shutdown(self, output: &mut OutputDocument) -> (Option<PathBuf>, Result<()>) {
        let video = match self.recorder {
            Some(recorder) => match recorder.stop().await {
                Ok(path) => Some(path),
                Err(e) => {
                    log::warn!("🟠 Warning: {}", e);
                    None
                }
            },
            None => None,
        };

        if let Some(observer) = self.observer {
            output.append_captures(observer.finish().await);
        }

        (video, self.driver.close().await)
    }
}

pub struct JobRunner {
    job: Job,
    settings: Settings,
    options: RunnerOptions,
}

impl JobRunner {
    pub fn new(job: Job, options: RunnerOptions) -> Self {
        let settings = job.settings();
        Self {
            job,
            settings,
            options,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.options.work_dir.join("downloads")
    }

    fn profile_dir(&self) -> PathBuf {
        self.options.work_dir.join("profile")
    }

    fn inference_dir(&self) -> PathBuf {
        self.options.work_dir.join(LOG_DIR_NAME)
    }

    /// Run the job to completion. Returns the process exit code.
    pub async fn run(mut self, variables: Variables, reporter: Reporter) -> i32 {
        let (captures, rules) = CaptureHandle::channel();
        let mut ctx = RunContext {
            settings: self.settings.clone(),
            variables,
            reporter,
            output: OutputDocument::default(),
            captures,
        };
        let mut session = None;

        let mut outcome = self.execute(&mut ctx, rules, &mut session).await;
        if outcome.is_ok() {
            if let Some(session) = session.take() {
                outcome = self.finish(&mut ctx.output, session).await;
            }
        }

        match outcome {
            Ok(()) => {
                log::info!("✅ Completed all steps.");
                if let Err(e) = ctx.reporter.success(&ctx.output) {
                    log::error!("🛑 Failed to write result: {}", e);
                }
                0
            }
            Err(e) => {
                self.abort(&mut ctx, session.take(), &e).await;
                1
            }
        }
    }

    async fn execute(
        &mut self,
        ctx: &mut RunContext,
        rules: UnboundedReceiver<CaptureRule>,
        session: &mut Option<Session>,
    ) -> Result<()> {
        let downloads = self.downloads_dir();
        std::fs::create_dir_all(&downloads)?;

        if self.settings.verbose >= 2 {
            self.dump_diagnostics(&downloads, &ctx.variables)?;
        }
        log::debug!(
            "Job Parameters: viewport {}x{} @{}, domTimeout {:?}, navTimeout {:?}, stepDelay {:?}, video {:?}, model {}",
            self.settings.width,
            self.settings.height,
            self.settings.scale,
            self.settings.dom_timeout,
            self.settings.nav_timeout,
            self.settings.step_delay,
            self.settings.video,
            self.settings.ai_model
        );

        let steps = compile(&mut self.job.params.script)?;
        if steps.is_empty() {
            return Err(StepError::validation("Cannot run script: No steps found."));
        }

        let mut ai = ChatCompletionsExecutor::new(&self.settings)?;
        if self.settings.ai_log_inference {
            ai = ai.with_inference_log(InferenceLog::new(self.inference_dir()));
        }
        log::debug!("AI endpoint: {}", ai.endpoint());

        log::info!("🔵 Launching Chrome...");
        let driver = ChromeDriver::launch(self.launch_options()).await?;
        let session = session.insert(Session {
            driver,
            observer: None,
            recorder: None,
        });

        let page = session.driver.new_page().await?;
        session.observer =
            Some(capture::spawn_observer(page.page().clone(), &downloads, rules).await?);

        if self.settings.video.records() {
            match ScreencastRecorder::start(
                page.page(),
                &downloads,
                self.settings.width,
                self.settings.height,
            )
            .await
            {
                Ok(recorder) => session.recorder = Some(recorder),
                Err(e) => log::warn!("🟠 Warning: video recording unavailable: {}", e),
            }
        }

        StepExecutor::new(&page, &ai, ctx).run(&steps).await
    }

    async fn finish(&self, output: &mut OutputDocument, session: Session) -> Result<()> {
        let (video, closed) = session.shutdown(output).await;
        closed?;

        self.apply_video_policy(video).await;
        self.archive_inference_log();
        Ok(())
    }

    /// Best-effort cleanup after a fatal error, then report it.
    async fn abort(&self, ctx: &mut RunContext, session: Option<Session>, error: &StepError) {
        let description = error.to_string();
        log::error!("🛑 {}", description);

        if let Some(session) = session {
            let (video, closed) = session.shutdown(&mut ctx.output).await;
            if let Err(e) = closed {
                log::debug!("Ignoring error while closing browser: {}", e);
            }
            self.apply_video_policy(video).await;
        }
        self.archive_inference_log();

        if let Err(e) = ctx.reporter.failure(&description, &ctx.output) {
            log::error!("🛑 Failed to write result: {}", e);
        }
    }

    fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            chrome_path: self.options.chrome_path.clone(),
            profile_dir: self.profile_dir(),
            downloads_dir: self.downloads_dir(),
            width: self.settings.width,
            height: self.settings.height,
            scale: self.settings.scale,
            locale: self.settings.locale.clone(),
            ssl_cert_bypass: self.settings.ssl_cert_bypass,
            headless: self.options.headless,
        }
    }

    /// Recordings are kept only in `always` mode, whether the run succeeded or not.
    async fn apply_video_policy(&self, video: Option<PathBuf>) {
        if let Some(path) = video {
            if self.settings.video.keeps() {
                log::info!("🔵 Video saved: {}", path.display());
            } else {
                discard_video(&path).await;
            }
        }
    }

    fn archive_inference_log(&self) {
        if !self.settings.ai_log_inference {
            return;
        }
        if let Err(e) = inference_log::archive(&self.inference_dir(), &self.downloads_dir()) {
            log::warn!("🟠 Warning: failed to archive inference log: {}", e);
        }
    }

    fn dump_diagnostics(&self, downloads: &Path, variables: &Variables) -> Result<()> {
        write_tab_json(&downloads.join("job.json"), &self.job.raw)?;

        let env: BTreeMap<&String, &String> = variables.as_map().iter().collect();
        write_tab_json(&downloads.join("env.json"), &serde_json::to_value(env)?)?;
        Ok(())
    }
}

fn write_tab_json(path: &Path, value: &Value) -> Result<()> {
    let mut bytes = capture::to_tab_indented_json(value)?;
    bytes.push(b'\n');
    std::fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn runner(job: &str, work_dir: &Path) -> JobRunner {
        JobRunner::new(
            Job::parse(job).unwrap(),
            RunnerOptions {
                work_dir: work_dir.to_path_buf(),
                chrome_path: Some(PathBuf::from("/nonexistent/chrome")),
                headless: true,
            },
        )
    }

    #[tokio::test]
    async fn test_empty_script_fails_before_launch() {
        let tmp = tempfile::tempdir().unwrap();
        let buf = SharedBuf::default();
        let runner = runner(
            r##"{"xy": 1, "params": {"script": "# nothing here\n"}}"##,
            tmp.path(),
        );

        let code = runner
            .run(Variables::default(), Reporter::new(true, Box::new(buf.clone())))
            .await;

        assert_eq!(code, 1);
        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let line: Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(line["code"], 1);
        assert_eq!(line["description"], "Cannot run script: No steps found.");
        assert_eq!(line["data"], serde_json::json!({}));

        // the work directory was prepared, but no browser profile was created
        assert!(tmp.path().join("downloads").is_dir());
        assert!(!tmp.path().join("profile").exists());
    }

    #[tokio::test]
    async fn test_malformed_script_json_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let buf = SharedBuf::default();
        let runner = runner(
            r#"{"xy": 1, "params": {"script": "{ \"steps\": [ oops ] }"}}"#,
            tmp.path(),
        );

        let code = runner
            .run(Variables::default(), Reporter::new(true, Box::new(buf.clone())))
            .await;

        assert_eq!(code, 1);
        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("Failed to parse script JSON"));
    }

    #[tokio::test]
    async fn test_verbose_two_dumps_job_and_env() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = runner(
            r#"{"params": {"verbose": 2, "script": ""}}"#,
            tmp.path(),
        );
        let variables: Variables = [("HOME".to_string(), "/root".to_string())]
            .into_iter()
            .collect();

        runner.run(variables, Reporter::disabled()).await;

        let job = std::fs::read_to_string(tmp.path().join("downloads/job.json")).unwrap();
        assert!(job.starts_with("{\n\t\"params\""));
        assert!(job.ends_with("}\n"));

        let env: Value = serde_json::from_str(
            &std::fs::read_to_string(tmp.path().join("downloads/env.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(env["HOME"], "/root");
    }
}
