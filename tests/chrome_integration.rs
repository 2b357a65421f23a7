//! Browser-backed tests: real headless Chrome against the local test server.
//!
//! These need a Chrome or Chromium binary (auto-detected, or CHROME_PATH).
//! Run with: `cargo test --test chrome_integration -- --ignored --test-threads=1`

mod test_server;

use browser_steps::{Job, JobRunner, Reporter, RunnerOptions, Variables};
use serde_json::{json, Value};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use test_server::TestServer;

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    /// The final result line (the last line written)
    fn result(&self) -> Value {
        let text = String::from_utf8(self.0.lock().unwrap().clone()).unwrap();
        let last = text.lines().last().expect("no result line written");
        serde_json::from_str(last).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

async fn run_job(params: Value, work_dir: &std::path::Path) -> (i32, Value) {
    let job = Job::from_value(json!({ "xy": 1, "params": params })).unwrap();
    let options = RunnerOptions {
        work_dir: work_dir.to_path_buf(),
        chrome_path: std::env::var_os("CHROME_PATH").map(PathBuf::from),
        headless: true,
    };
    let buf = SharedBuf::default();
    let variables: Variables = [("CUSTOMER".to_string(), "Ada".to_string())]
        .into_iter()
        .collect();

    let code = JobRunner::new(job, options)
        .run(variables, Reporter::new(true, Box::new(buf.clone())))
        .await;
    (code, buf.result())
}

#[tokio::test]
#[ignore = "requires a local Chrome installation"]
async fn test_form_script_end_to_end() {
    let server = TestServer::start().await;
    server.wait_ready().await.expect("Server failed to start");
    let tmp = tempfile::tempdir().unwrap();

    let script = json!({ "steps": [
        { "type": "capture", "url": "/api/orders" },
        { "type": "navigate", "url": server.url() },
        { "type": "change", "selectors": [["aria/Customer name"], ["#name"]], "value": "%CUSTOMER%" },
        { "type": "click", "selectors": [["#submit"]] },
        { "type": "waitFor", "selectors": [["text/ordered:Ada"]] },
        { "type": "evaluate", "script": "document.getElementById('status').textContent" }
    ] });

    let (code, result) = run_job(json!({ "script": script, "stepDelay": 1 }), tmp.path()).await;
    println!("📄 Result: {}", result);

    assert_eq!(code, 0);
    assert_eq!(result["code"], 0);
    assert_eq!(result["data"]["evaluations"][0]["result"], "ordered:Ada");

    let captures = result["data"]["captures"].as_array().unwrap();
    assert_eq!(captures.len(), 1);
    assert_eq!(captures[0]["status"], 200);
    assert_eq!(captures[0]["response"], json!({ "id": 42, "name": "Ada" }));
}

#[tokio::test]
#[ignore = "requires a local Chrome installation"]
async fn test_download_capture_writes_file() {
    let server = TestServer::start().await;
    server.wait_ready().await.expect("Server failed to start");
    let tmp = tempfile::tempdir().unwrap();

    let script = json!({ "steps": [
        { "type": "capture", "url": "report.csv", "download": true },
        { "type": "navigate", "url": format!("{}/api/report.csv", server.url()) },
        { "type": "sleep", "duration": 200 }
    ] });

    let (code, result) = run_job(json!({ "script": script, "stepDelay": 1 }), tmp.path()).await;

    assert_eq!(code, 0);
    assert_eq!(result["data"]["captures"][0]["filename"], "api_report.csv");
    let written = std::fs::read_to_string(tmp.path().join("downloads/api_report.csv")).unwrap();
    assert_eq!(written, "id,total\n1,9.99\n");
}

#[tokio::test]
#[ignore = "requires a local Chrome installation"]
async fn test_line_script_navigates_and_evaluates() {
    let server = TestServer::start().await;
    server.wait_ready().await.expect("Server failed to start");
    let tmp = tempfile::tempdir().unwrap();

    let script = format!(
        "navigate to {}/page2\nevaluate document.title\n",
        server.url()
    );
    let (code, result) = run_job(json!({ "script": script, "stepDelay": 1 }), tmp.path()).await;

    assert_eq!(code, 0);
    assert_eq!(result["data"]["evaluations"][0]["script"], "document.title");
    assert_eq!(result["data"]["evaluations"][0]["result"], "Test Page 2");
}

#[tokio::test]
#[ignore = "requires a local Chrome installation"]
async fn test_reload_restores_page_state() {
    let server = TestServer::start().await;
    server.wait_ready().await.expect("Server failed to start");
    let tmp = tempfile::tempdir().unwrap();

    let script = json!({ "steps": [
        { "type": "navigate", "url": format!("{}/page2", server.url()) },
        { "type": "evaluate", "script": "document.title = 'edited'" },
        { "type": "reload" },
        { "type": "evaluate", "script": "document.title" }
    ] });
    let (code, result) = run_job(json!({ "script": script, "stepDelay": 1 }), tmp.path()).await;

    assert_eq!(code, 0);
    let evaluations = result["data"]["evaluations"].as_array().unwrap();
    assert_eq!(evaluations[0]["result"], "edited");
    assert_eq!(evaluations[1]["result"], "Test Page 2");
}

#[tokio::test]
#[ignore = "requires a local Chrome installation"]
async fn test_missing_element_times_out() {
    let server = TestServer::start().await;
    server.wait_ready().await.expect("Server failed to start");
    let tmp = tempfile::tempdir().unwrap();

    let script = json!({ "steps": [
        { "type": "navigate", "url": server.url() },
        { "type": "click", "selectors": [["#does-not-exist"]], "timeout": 500 }
    ] });

    let (code, result) = run_job(json!({ "script": script, "stepDelay": 1 }), tmp.path()).await;

    assert_eq!(code, 1);
    assert_eq!(result["code"], 1);
    assert!(result["description"]
        .as_str()
        .unwrap()
        .contains("Timeout 500ms exceeded"));
}
