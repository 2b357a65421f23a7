//! Page operations the step executor needs.
//!
//! [`PageDriver`] is the seam between the executor and the browser.
//! [`chrome::ChromePage`] implements it over a chromiumoxide page; tests use
//! in-memory fakes.

pub mod chrome;
pub mod keys;
pub mod recorder;

use crate::error::Result;
use crate::script::step::WaitUntil;
use crate::selector::{ElementState, Target};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

pub use chrome::{ChromeDriver, ChromePage, LaunchOptions};
pub use recorder::ScreencastRecorder;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavigationOptions {
    pub timeout: Duration,
    pub wait_until: WaitUntil,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClickOptions {
    pub timeout: Duration,
    /// Position relative to the element's top-left corner; centre when absent
    pub offset: Option<(f64, f64)>,
    /// 1 for a click, 2 for a double-click
    pub click_count: i64,
}

#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate and wait for `options.wait_until`.
    async fn goto(&self, url: &str, options: NavigationOptions) -> Result<()>;

    async fn reload(&self, options: NavigationOptions) -> Result<()>;

    async fn set_viewport(&self, width: u32, height: u32) -> Result<()>;

    /// Wait for `target` to be visible, then click it.
    async fn click(&self, target: &Target, options: ClickOptions) -> Result<()>;

    /// Wait for `target`, then replace its value and fire `input`/`change`.
    async fn fill(&self, target: &Target, value: &str, timeout: Duration) -> Result<()>;

    async fn key_down(&self, key: &str) -> Result<()>;

    async fn key_up(&self, key: &str) -> Result<()>;

    /// Insert literal text at the current focus.
    async fn insert_text(&self, text: &str) -> Result<()>;

    /// Evaluate a JavaScript expression and return its JSON value.
    async fn evaluate(&self, script: &str) -> Result<Value>;

    async fn wait_for(&self, target: &Target, state: ElementState, timeout: Duration)
        -> Result<()>;

    async fn scroll_by(&self, dx: f64, dy: f64) -> Result<()>;
}
