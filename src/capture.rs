//! Network capture
//!
//! `capture` steps register [`CaptureRule`]s. Every response the page
//! receives afterwards is matched against them (first registered rule whose
//! `url` is a substring of the response URL); matched payloads are either
//! embedded in the output or written to the downloads directory.
//!
//! The routing logic lives in [`CaptureRouter`], which knows nothing about
//! Chrome. [`spawn_observer`] runs it as a task fed by the page's
//! `Network` events, so captures happen concurrently with step execution.

use crate::error::{Result, StepError};
use base64::{engine::general_purpose, Engine as _};
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventResponseReceived, GetResponseBodyParams,
    RequestId,
};
use chromiumoxide::page::Page;
use futures::stream::{self, StreamExt};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

static SCHEME_AND_HOST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+://[^/]+/").expect("scheme pattern is valid"));
static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\-.]+").expect("filename pattern is valid"));
static HAS_EXTENSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.\w+$").expect("extension pattern is valid"));
static CONTENT_SUBTYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+/(\w+)").expect("content-type pattern is valid"));

/// A registered URL filter plus routing policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRule {
    /// Substring matched against response URLs
    pub url: String,

    /// Write the payload to the downloads directory instead of the output
    pub download: bool,

    /// Pretty-print JSON payloads when downloading
    pub pretty: bool,
}

/// One captured response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Capture {
    pub url: String,
    pub status: i64,
    pub headers: Value,

    #[serde(flatten)]
    pub payload: CapturePayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CapturePayload {
    /// Body embedded in the output (`null` when it could not be read)
    Inline { response: Value },
    /// Body written to the downloads directory under this name
    File { filename: String },
}

/// Response metadata, available as soon as headers arrive.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMeta {
    pub url: String,
    pub status: i64,
    /// Header names lowercased
    pub headers: Map<String, Value>,
}

impl ResponseMeta {
    pub fn new(url: impl Into<String>, status: i64, headers: &Value) -> Self {
        let headers = headers
            .as_object()
            .map(|h| {
                h.iter()
                    .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            url: url.into(),
            status,
            headers,
        }
    }

    pub fn content_type(&self) -> &str {
        self.headers
            .get("content-type")
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

/// A decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Binary(Vec<u8>),
}

impl ResponseBody {
    /// Decode a CDP `getResponseBody` result. JSON content types are parsed;
    /// everything else is text, or raw bytes when not valid UTF-8.
    pub fn decode(body: &str, base64_encoded: bool, content_type: &str) -> Result<Self> {
        let bytes = if base64_encoded {
            general_purpose::STANDARD
                .decode(body)
                .map_err(|e| StepError::Other(format!("invalid base64 body: {}", e)))?
        } else {
            body.as_bytes().to_vec()
        };

        if content_type.contains("application/json") {
            let value = serde_json::from_slice(&bytes)?;
            return Ok(ResponseBody::Json(value));
        }

        match String::from_utf8(bytes) {
            Ok(text) => Ok(ResponseBody::Text(text)),
            Err(e) => Ok(ResponseBody::Binary(e.into_bytes())),
        }
    }

    fn into_inline(self) -> Value {
        match self {
            ResponseBody::Json(value) => value,
            ResponseBody::Text(text) => Value::String(text),
            ResponseBody::Binary(bytes) => Value::String(String::from_utf8_lossy(&bytes).into()),
        }
    }

    fn into_file_bytes(self, pretty: bool) -> Result<Vec<u8>> {
        Ok(match self {
            ResponseBody::Json(value @ (Value::Object(_) | Value::Array(_) | Value::Null)) => {
                let mut out = if pretty {
                    to_tab_indented_json(&value)?
                } else {
                    serde_json::to_vec(&value)?
                };
                out.push(b'\n');
                out
            }
            ResponseBody::Json(Value::String(s)) => s.into_bytes(),
            ResponseBody::Json(other) => other.to_string().into_bytes(),
            ResponseBody::Text(text) => text.into_bytes(),
            ResponseBody::Binary(bytes) => bytes,
        })
    }
}

/// JSON with tab indentation, the layout downloaded captures and diagnostic dumps use.
pub(crate) fn to_tab_indented_json(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    Ok(out)
}

/// Derive a filesystem-safe file name from a response URL.
///
/// Scheme and host are dropped, as is a trailing slash; runs of characters
/// other than word characters, `-` and `.` become `_`. When the result has
/// no extension, the content-type subtype is appended (`application/json`
/// -> `.json`).
pub fn derive_filename(url: &str, content_type: &str) -> String {
    let path = SCHEME_AND_HOST.replace(url, "");
    let path = path.strip_suffix('/').unwrap_or(&path);
    let mut name = UNSAFE_CHARS.replace_all(path, "_").to_lowercase();

    if !HAS_EXTENSION.is_match(&name) {
        if let Some(caps) = CONTENT_SUBTYPE.captures(content_type) {
            name.push('.');
            name.push_str(&caps[1]);
        }
    }
    name
}

/// How a request's loading ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadingEnd {
    /// The body is complete and can be read
    Finished,
    /// Loading failed with the given error text
    Failed(String),
}

struct PendingCapture {
    rule: CaptureRule,
    meta: ResponseMeta,
    /// End that was observed before the response itself
    early_end: Option<LoadingEnd>,
}

/// Matches responses against capture rules and files the payloads.
///
/// Response and loading-end notifications may be delivered in either order;
/// an end that arrives before its response is held until the response shows
/// up.
pub struct CaptureRouter {
    rules: Vec<CaptureRule>,
    downloads_dir: PathBuf,
    pending: HashMap<String, PendingCapture>,
    /// Responses that matched no rule and have not ended yet
    ignored: HashSet<String>,
    /// Ends seen for requests whose response has not arrived
    early_ends: HashMap<String, LoadingEnd>,
    captures: Vec<Capture>,
}

impl CaptureRouter {
    pub fn new(downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            rules: Vec::new(),
            downloads_dir: downloads_dir.into(),
            pending: HashMap::new(),
            ignored: HashSet::new(),
            early_ends: HashMap::new(),
            captures: Vec::new(),
        }
    }

    pub fn register(&mut self, rule: CaptureRule) {
        self.rules.push(rule);
    }

    /// First rule, in registration order, whose `url` occurs in `url`.
    pub fn match_rule(&self, url: &str) -> Option<&CaptureRule> {
        self.rules.iter().find(|rule| url.contains(&rule.url))
    }

    /// Headers for `request_id` arrived. Returns true when a rule matched and
    /// the body should be collected.
    ///
    /// If the request already ended, that end is kept with the pending
    /// capture; collect it with [`take_early_end`](Self::take_early_end).
    pub fn on_response(&mut self, request_id: &str, meta: ResponseMeta) -> bool {
        log::debug!("🌎 Network Request [{}] {}", meta.status, meta.url);
        let early_end = self.early_ends.remove(request_id);

        let Some(rule) = self.match_rule(&meta.url).cloned() else {
            if early_end.is_none() {
                self.ignored.insert(request_id.to_string());
            }
            return false;
        };

        log::info!("🟢 Request Captured [{}] {}", meta.status, meta.url);
        self.pending.insert(
            request_id.to_string(),
            PendingCapture {
                rule,
                meta,
                early_end,
            },
        );
        true
    }

    /// Loading of `request_id` ended. Returns the end when the body of a
    /// matched response should now be settled; an end whose response has not
    /// been seen yet is held for [`on_response`](Self::on_response).
    pub fn on_loading_end(&mut self, request_id: &str, end: LoadingEnd) -> Option<LoadingEnd> {
        if self.pending.contains_key(request_id) {
            return Some(end);
        }
        if !self.ignored.remove(request_id) {
            self.early_ends.insert(request_id.to_string(), end);
        }
        None
    }

    /// The end held for a matched response whose request ended first.
    pub fn take_early_end(&mut self, request_id: &str) -> Option<LoadingEnd> {
        self.pending.get_mut(request_id)?.early_end.take()
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.pending.contains_key(request_id)
    }

    /// The body of a matched response was read (or failed to read). The
    /// capture is recorded either way; a failed read just carries no payload.
    pub async fn on_body(
        &mut self,
        request_id: &str,
        body: std::result::Result<ResponseBody, String>,
    ) {
        let Some(PendingCapture { rule, meta, .. }) = self.pending.remove(request_id) else {
            return;
        };

        let body = match body {
            Ok(body) => {
                match &body {
                    ResponseBody::Json(value) => log::debug!("JSON Captured: {}", value),
                    ResponseBody::Text(text) => log::debug!("Text Captured: {}", text),
                    ResponseBody::Binary(bytes) => {
                        log::debug!("Binary Captured: {} bytes", bytes.len())
                    }
                }
                Some(body)
            }
            Err(e) => {
                log::error!("🛑 Error reading response body: {}", e);
                None
            }
        };

        let payload = if rule.download {
            let filename = derive_filename(&meta.url, meta.content_type());
            self.write_download(&filename, body, rule.pretty).await;
            CapturePayload::File { filename }
        } else {
            CapturePayload::Inline {
                response: body.map(ResponseBody::into_inline).unwrap_or(Value::Null),
            }
        };

        self.captures.push(Capture {
            url: meta.url,
            status: meta.status,
            headers: Value::Object(meta.headers),
            payload,
        });
    }

    async fn write_download(&self, filename: &str, body: Option<ResponseBody>, pretty: bool) {
        let path = self.downloads_dir.join(filename);
        let bytes = match body.map(|b| b.into_file_bytes(pretty)).transpose() {
            Ok(bytes) => bytes.unwrap_or_default(),
            Err(e) => {
                log::error!("🛑 Failed to serialize capture for {}: {}", filename, e);
                return;
            }
        };
        if let Err(e) = tokio::fs::write(&path, bytes).await {
            log::error!("🛑 Failed to write capture {}: {}", path.display(), e);
        }
    }

    pub fn captures(&self) -> &[Capture] {
        &self.captures
    }

    pub fn into_captures(self) -> Vec<Capture> {
        if !self.pending.is_empty() {
            log::debug!(
                "Dropping {} capture(s) whose body never finished loading",
                self.pending.len()
            );
        }
        self.captures
    }
}

/// Handle the executor uses to register rules with the running observer.
#[derive(Debug, Clone)]
pub struct CaptureHandle {
    tx: mpsc::UnboundedSender<CaptureRule>,
}

impl CaptureHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CaptureRule>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Register a rule for the rest of the run.
    pub fn register(&self, rule: CaptureRule) -> Result<()> {
        self.tx
            .send(rule)
            .map_err(|_| StepError::Other("network capture observer has stopped".to_string()))
    }
}

/// Running capture observer task.
pub struct CaptureObserver {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Vec<Capture>>,
}

impl CaptureObserver {
    /// Stop observing and return the captures in arrival order.
    pub async fn finish(mut self) -> Vec<Capture> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(captures) => captures,
            Err(e) => {
                log::warn!("🟠 Warning: capture observer task failed: {}", e);
                Vec::new()
            }
        }
    }
}

enum NetworkEvent {
    Response(Arc<EventResponseReceived>),
    Finished(Arc<EventLoadingFinished>),
    Failed(Arc<EventLoadingFailed>),
}

/// Start observing `page`'s network traffic. Rules arrive over `rules`;
/// they are always applied before any event that was emitted after the
/// rule was sent.
///
/// The three listeners are merged without a shared order, so a request's
/// loading end can be seen before its response; the router reconciles that.
pub async fn spawn_observer(
    page: Page,
    downloads_dir: &Path,
    mut rules: mpsc::UnboundedReceiver<CaptureRule>,
) -> Result<CaptureObserver> {
    let responses = page.event_listener::<EventResponseReceived>().await?;
    let finished = page.event_listener::<EventLoadingFinished>().await?;
    let failed = page.event_listener::<EventLoadingFailed>().await?;

    let mut events = stream::select_all(vec![
        responses.map(NetworkEvent::Response).boxed(),
        finished.map(NetworkEvent::Finished).boxed(),
        failed.map(NetworkEvent::Failed).boxed(),
    ]);

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let mut router = CaptureRouter::new(downloads_dir);

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                Some(rule) = rules.recv() => router.register(rule),
                _ = &mut shutdown_rx => break,
                event = events.next() => match event {
                    Some(NetworkEvent::Response(ev)) => {
                        let headers = serde_json::to_value(&ev.response.headers).unwrap_or(Value::Null);
                        let meta = ResponseMeta::new(ev.response.url.clone(), ev.response.status, &headers);
                        let request_id = ev.request_id.inner();
                        if router.on_response(request_id, meta) {
                            if let Some(end) = router.take_early_end(request_id) {
                                settle(&page, &mut router, &ev.request_id, end).await;
                            }
                        }
                    }
                    Some(NetworkEvent::Finished(ev)) => {
                        if let Some(end) = router.on_loading_end(ev.request_id.inner(), LoadingEnd::Finished) {
                            settle(&page, &mut router, &ev.request_id, end).await;
                        }
                    }
                    Some(NetworkEvent::Failed(ev)) => {
                        let end = LoadingEnd::Failed(ev.error_text.clone());
                        if let Some(end) = router.on_loading_end(ev.request_id.inner(), end) {
                            settle(&page, &mut router, &ev.request_id, end).await;
                        }
                    }
                    None => break,
                },
            }
        }
        router.into_captures()
    });

    Ok(CaptureObserver {
        shutdown: Some(shutdown_tx),
        task,
    })
}

/// Read (or give up on) the body of a matched response and record it.
async fn settle(page: &Page, router: &mut CaptureRouter, request_id: &RequestId, end: LoadingEnd) {
    let body = match end {
        LoadingEnd::Finished => read_body(page, request_id, router).await,
        LoadingEnd::Failed(error_text) => Err(error_text),
    };
    router.on_body(request_id.inner(), body).await;
}

async fn read_body(
    page: &Page,
    request_id: &RequestId,
    router: &CaptureRouter,
) -> std::result::Result<ResponseBody, String> {
    let content_type = router
        .pending
        .get(request_id.inner())
        .map(|p| p.meta.content_type().to_string())
        .unwrap_or_default();

    let response = page
        .execute(GetResponseBodyParams::new(request_id.clone()))
        .await
        .map_err(|e| e.to_string())?;

    ResponseBody::decode(
        &response.result.body,
        response.result.base64_encoded,
        &content_type,
    )
    .map_err(|e| e.to_string())
}
