// spider_chrome re-exports chromiumoxide API
use super::keys::KeyDefinition;
use super::{ClickOptions, NavigationOptions, PageDriver};
use crate::error::{Result, StepError};
use crate::selector::{ElementState, Target};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, InsertTextParams, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::network;
use chromiumoxide::cdp::browser_protocol::page::{
    EventLifecycleEvent, FrameId, NavigateParams, ReloadParams, SetLifecycleEventsEnabledParams,
};
use chromiumoxide::cdp::browser_protocol::security::SetIgnoreCertificateErrorsParams;
use chromiumoxide::listeners::EventStream;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Where Playwright-based images install their Chromium build.
const PLAYWRIGHT_CACHE: &str = "/ms-playwright";

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Flags every run launches Chrome with.
const CHROME_FLAGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--disable-background-networking",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-features=TranslateUI",
];

/// Everything needed to start the browser for one job.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Explicit executable; falls back to [`default_executable`], then to
    /// chromiumoxide's own detection
    pub chrome_path: Option<PathBuf>,
    pub profile_dir: PathBuf,
    pub downloads_dir: PathBuf,
    pub width: u32,
    pub height: u32,
    pub scale: f64,
    pub locale: String,
    pub ssl_cert_bypass: bool,
    pub headless: bool,
}

pub struct ChromeDriver {
    browser: Browser,
    handler: JoinHandle<()>,
    options: LaunchOptions,
}

impl ChromeDriver {
    /// Launch Chrome with a persistent profile directory.
    pub async fn launch(options: LaunchOptions) -> Result<Self> {
        std::fs::create_dir_all(&options.profile_dir).map_err(|e| {
            StepError::LaunchFailed(format!("Failed to create profile directory: {}", e))
        })?;

        let mut config = if options.headless {
            BrowserConfig::builder()
        } else {
            BrowserConfig::builder().with_head()
        };

        config = config
            .user_data_dir(&options.profile_dir)
            .window_size(options.width, options.height)
            .args(CHROME_FLAGS.iter().copied())
            .arg(format!("--lang={}", options.locale));

        if options.ssl_cert_bypass {
            config = config.arg("--ignore-certificate-errors");
        }

        match options.chrome_path.clone().or_else(default_executable) {
            Some(path) => {
                log::debug!("Using Chrome executable: {}", path.display());
                config = config.chrome_executable(path);
            }
            None => log::debug!("No Chrome executable configured, using auto-detection"),
        }

        let config = config.build().map_err(StepError::LaunchFailed)?;
        let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
            StepError::LaunchFailed(format!(
                "{}. Set --chrome-path (or CHROME_PATH) to a Chrome or Chromium binary.",
                e
            ))
        })?;

        let handler = tokio::spawn(async move {
            while (handler.next().await).is_some() {
                // Drive the CDP connection
            }
        });

        let driver = Self {
            browser,
            handler,
            options,
        };
        driver.allow_downloads().await;
        Ok(driver)
    }

    async fn allow_downloads(&self) {
        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(self.options.downloads_dir.to_string_lossy().to_string())
            .build();

        match params {
            Ok(params) => {
                if let Err(e) = self.browser.execute(params).await {
                    log::warn!("🟠 Warning: could not enable downloads: {}", e);
                }
            }
            Err(e) => log::warn!("🟠 Warning: could not enable downloads: {}", e),
        }
    }

    /// Open the page the job runs in, sized and configured from the launch options.
    pub async fn new_page(&self) -> Result<ChromePage> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| StepError::LaunchFailed(format!("Failed to create page: {}", e)))?;

        page.execute(SetLifecycleEventsEnabledParams::new(true))
            .await?;
        page.execute(network::EnableParams::default()).await?;

        if self.options.ssl_cert_bypass {
            page.execute(SetIgnoreCertificateErrorsParams::new(true))
                .await?;
        }

        let chrome_page = ChromePage {
            page,
            scale: self.options.scale,
        };
        chrome_page
            .set_viewport(self.options.width, self.options.height)
            .await?;
        Ok(chrome_page)
    }

    /// Close the browser connection
    pub async fn close(mut self) -> Result<()> {
        self.browser.close().await?;
        let _ = self.browser.wait().await;
        self.handler.abort();
        Ok(())
    }
}

/// First Chromium build found in the Playwright install cache.
pub fn default_executable() -> Option<PathBuf> {
    find_in_playwright_cache(Path::new(PLAYWRIGHT_CACHE))
}

fn find_in_playwright_cache(root: &Path) -> Option<PathBuf> {
    let mut builds: Vec<PathBuf> = std::fs::read_dir(root)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("chromium-"))
        .map(|entry| entry.path().join("chrome-linux").join("chrome"))
        .filter(|path| path.exists())
        .collect();
    builds.sort();
    builds.into_iter().next()
}

#[derive(Debug, Deserialize)]
struct ElementBox {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

/// One browser page driven over CDP.
#[derive(Clone)]
pub struct ChromePage {
    page: Page,
    scale: f64,
}

impl ChromePage {
    /// The underlying chromiumoxide page, for the capture observer and recorder.
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Evaluate `script` until it returns something other than `null`.
    async fn poll(&self, script: &str, timeout: Duration, what: String) -> Result<Value> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.page.evaluate(script).await {
                Ok(result) => {
                    let value = result.into_value().unwrap_or(Value::Null);
                    if !value.is_null() {
                        return Ok(value);
                    }
                }
                // The document may be mid-navigation; try again on the next tick
                Err(e) => log::debug!("Evaluation failed while {}: {}", what, e),
            }

            if Instant::now() >= deadline {
                return Err(StepError::Timeout {
                    ms: timeout.as_millis() as u64,
                    what,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_lifecycle(
        &self,
        mut events: EventStream<EventLifecycleEvent>,
        frame_id: &FrameId,
        loader_id: Option<&network::LoaderId>,
        name: &str,
    ) {
        while let Some(event) = events.next().await {
            if &event.frame_id != frame_id || event.name != name {
                continue;
            }
            if loader_id.map_or(true, |id| *id == event.loader_id) {
                return;
            }
        }
    }

    async fn mouse(
        &self,
        kind: DispatchMouseEventType,
        x: f64,
        y: f64,
        click_count: Option<i64>,
    ) -> Result<()> {
        let mut builder = DispatchMouseEventParams::builder().r#type(kind).x(x).y(y);
        if let Some(count) = click_count {
            builder = builder.button(MouseButton::Left).click_count(count);
        }
        let params = builder.build().map_err(StepError::ActionFailed)?;
        self.page.execute(params).await?;
        Ok(())
    }

    async fn key(&self, kind: DispatchKeyEventType, name: &str) -> Result<()> {
        let def = KeyDefinition::lookup(name);
        let mut builder = DispatchKeyEventParams::builder()
            .r#type(kind.clone())
            .key(def.key)
            .code(def.code)
            .windows_virtual_key_code(def.key_code)
            .native_virtual_key_code(def.key_code);

        if matches!(kind, DispatchKeyEventType::KeyDown) {
            if let Some(text) = def.text {
                builder = builder.text(text);
            }
        }

        let params = builder.build().map_err(StepError::ActionFailed)?;
        self.page.execute(params).await?;
        Ok(())
    }
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn goto(&self, url: &str, options: NavigationOptions) -> Result<()> {
        // Subscribe before navigating so the lifecycle event cannot be missed
        let events = self.page.event_listener::<EventLifecycleEvent>().await?;

        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| StepError::NavigationFailed(format!("Invalid URL {}: {}", url, e)))?;

        let started = Instant::now();
        let response = tokio::time::timeout(options.timeout, self.page.execute(params))
            .await
            .map_err(|_| StepError::Timeout {
                ms: options.timeout.as_millis() as u64,
                what: format!("navigating to \"{}\"", url),
            })?
            .map_err(|e| StepError::NavigationFailed(format!("{}: {}", url, e)))?;

        let result = response.result;
        if let Some(error_text) = result.error_text {
            return Err(StepError::NavigationFailed(format!("{} at {}", error_text, url)));
        }

        // Same-document navigations have no loader and fire no lifecycle events
        let (Some(event), Some(loader_id)) =
            (options.wait_until.lifecycle_event(), result.loader_id.as_ref())
        else {
            return Ok(());
        };

        let remaining = options.timeout.saturating_sub(started.elapsed());
        tokio::time::timeout(
            remaining,
            self.wait_for_lifecycle(events, &result.frame_id, Some(loader_id), event),
        )
        .await
        .map_err(|_| StepError::Timeout {
            ms: options.timeout.as_millis() as u64,
            what: format!("navigating to \"{}\", waiting until \"{}\"", url, event),
        })
    }

    async fn reload(&self, options: NavigationOptions) -> Result<()> {
        let mut events = self.page.event_listener::<EventLifecycleEvent>().await?;
        let frame_id = self
            .page
            .mainframe()
            .await?
            .ok_or_else(|| StepError::NavigationFailed("page has no main frame".to_string()))?;

        self.page.execute(ReloadParams::default()).await?;

        let Some(name) = options.wait_until.lifecycle_event() else {
            return Ok(());
        };

        let wait = async {
            // The reload's loader is announced by its `init` event
            let mut loader_id = None;
            while let Some(event) = events.next().await {
                if event.frame_id != frame_id {
                    continue;
                }
                if event.name == "init" {
                    loader_id = Some(event.loader_id.clone());
                } else if event.name == name && loader_id.as_ref() == Some(&event.loader_id) {
                    return;
                }
            }
        };

        tokio::time::timeout(options.timeout, wait)
            .await
            .map_err(|_| StepError::Timeout {
                ms: options.timeout.as_millis() as u64,
                what: format!("reloading, waiting until \"{}\"", name),
            })
    }

    async fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        self.page
            .execute(SetDeviceMetricsOverrideParams::new(
                width as i64,
                height as i64,
                self.scale,
                false,
            ))
            .await?;
        Ok(())
    }

    async fn click(&self, target: &Target, options: ClickOptions) -> Result<()> {
        let script = target.script(
            "if (!el || !isVisible(el)) return null;\n\
             el.scrollIntoView({ block: 'center', inline: 'center' });\n\
             const r = el.getBoundingClientRect();\n\
             return { x: r.left, y: r.top, width: r.width, height: r.height };",
        );
        let found = self
            .poll(
                &script,
                options.timeout,
                format!("waiting for {} to be visible", target),
            )
            .await?;
        let element: ElementBox = serde_json::from_value(found)?;

        let (dx, dy) = options
            .offset
            .unwrap_or((element.width / 2.0, element.height / 2.0));
        let (x, y) = (element.x + dx, element.y + dy);
        log::debug!("Clicking {} at ({}, {})", target, x, y);

        self.mouse(DispatchMouseEventType::MouseMoved, x, y, None)
            .await?;
        for count in 1..=options.click_count.max(1) {
            self.mouse(DispatchMouseEventType::MousePressed, x, y, Some(count))
                .await?;
            self.mouse(DispatchMouseEventType::MouseReleased, x, y, Some(count))
                .await?;
        }
        Ok(())
    }

    async fn fill(&self, target: &Target, value: &str, timeout: Duration) -> Result<()> {
        let body = format!(
            r#"if (!el || !isVisible(el)) return null;
const value = {value};
el.focus();
if (el.tagName === 'SELECT') {{
  const opt = Array.from(el.options).find((o) => o.value === value || o.label === value);
  el.value = opt ? opt.value : value;
}} else if (el.isContentEditable) {{
  el.textContent = value;
}} else {{
  const proto = el.tagName === 'TEXTAREA' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
  const setter = Object.getOwnPropertyDescriptor(proto, 'value').set;
  setter.call(el, value);
}}
el.dispatchEvent(new Event('input', {{ bubbles: true }}));
el.dispatchEvent(new Event('change', {{ bubbles: true }}));
return true;"#,
            value = serde_json::to_string(value)?,
        );

        self.poll(
            &target.script(&body),
            timeout,
            format!("waiting for {} to be visible", target),
        )
        .await?;
        Ok(())
    }

    async fn key_down(&self, key: &str) -> Result<()> {
        self.key(DispatchKeyEventType::KeyDown, key).await
    }

    async fn key_up(&self, key: &str) -> Result<()> {
        self.key(DispatchKeyEventType::KeyUp, key).await
    }

    async fn insert_text(&self, text: &str) -> Result<()> {
        self.page.execute(InsertTextParams::new(text)).await?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| StepError::ActionFailed(format!("Script execution failed: {}", e)))?;

        Ok(result.into_value().unwrap_or(Value::Null))
    }

    async fn wait_for(
        &self,
        target: &Target,
        state: ElementState,
        timeout: Duration,
    ) -> Result<()> {
        self.poll(
            &target.state_script(state),
            timeout,
            format!("waiting for {} to be {}", target, state),
        )
        .await?;
        Ok(())
    }

    async fn scroll_by(&self, dx: f64, dy: f64) -> Result<()> {
        self.evaluate(&format!("window.scrollBy({}, {})", dx, dy))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finds_playwright_build() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(find_in_playwright_cache(root.path()), None);

        let chrome = root.path().join("chromium-1140/chrome-linux/chrome");
        std::fs::create_dir_all(chrome.parent().unwrap()).unwrap();
        std::fs::write(&chrome, b"").unwrap();
        std::fs::create_dir_all(root.path().join("ffmpeg-1010")).unwrap();

        assert_eq!(find_in_playwright_cache(root.path()), Some(chrome));
    }

    #[test]
    fn test_missing_cache_root() {
        assert_eq!(
            find_in_playwright_cache(Path::new("/definitely/not/here")),
            None
        );
    }
}
