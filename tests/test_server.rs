//! Local HTTP server for tests
//!
//! Serves a small form page plus a couple of API endpoints the form calls,
//! so step scripts can be run without relying on external websites.
//!
//! Each server instance runs on a random available port for test isolation.

use std::net::SocketAddr;
use tokio::sync::oneshot;
use warp::Filter;

const FORM_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <title>Order Form</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
</head>
<body>
    <h1>Order Form</h1>
    <form id="order" onsubmit="return false;">
        <label for="name">Customer name</label>
        <input id="name" name="name" type="text">
        <select id="size" name="size">
            <option value="s">Small</option>
            <option value="m">Medium</option>
            <option value="l">Large</option>
        </select>
        <button id="submit" type="button" aria-label="Place order">Submit</button>
    </form>
    <p id="status">idle</p>
    <p><a href="/page2">Go to Page 2</a></p>
    <script>
        document.getElementById('submit').addEventListener('click', async () => {
            const name = document.getElementById('name').value;
            const res = await fetch('/api/orders?name=' + encodeURIComponent(name));
            const body = await res.json();
            document.getElementById('status').textContent = 'ordered:' + body.name;
        });
        document.getElementById('submit').addEventListener('dblclick', () => {
            document.getElementById('status').textContent = 'double';
        });
    </script>
</body>
</html>"#;

const PAGE2: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><title>Test Page 2</title></head>
<body>
    <h1>Test Page 2</h1>
    <p>This is a second page for testing navigation.</p>
    <p><a href="/">Back to Home</a></p>
</body>
</html>"#;

/// Test server that serves the form page and its API
pub struct TestServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestServer {
    /// Start a new test server on a random available port
    pub async fn start() -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let index = warp::path::end().map(|| warp::reply::html(FORM_PAGE));
        let page2 = warp::path("page2").map(|| warp::reply::html(PAGE2));

        let orders = warp::path!("api" / "orders")
            .and(warp::query::<std::collections::HashMap<String, String>>())
            .map(|query: std::collections::HashMap<String, String>| {
                let name = query.get("name").cloned().unwrap_or_default();
                warp::reply::json(&serde_json::json!({ "id": 42, "name": name }))
            });

        let report = warp::path!("api" / "report.csv").map(|| {
            warp::reply::with_header("id,total\n1,9.99\n", "content-type", "text/csv")
        });

        let routes = index.or(page2).or(orders).or(report);

        let (addr, server) =
            warp::serve(routes).bind_with_graceful_shutdown(([127, 0, 0, 1], 0), async {
                shutdown_rx.await.ok();
            });

        tokio::spawn(server);

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Base URL for this server (e.g., "http://127.0.0.1:12345")
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Wait for the server to be ready by making a test request
    pub async fn wait_ready(&self) -> anyhow::Result<()> {
        let url = self.url();
        let max_attempts = 10;

        for attempt in 1..=max_attempts {
            match reqwest::get(&url).await {
                Ok(response) if response.status().is_success() => {
                    println!("✅ Test server ready on: {}", url);
                    return Ok(());
                }
                Ok(response) => {
                    println!(
                        "⚠️ Attempt {}: Server returned status {}",
                        attempt,
                        response.status()
                    );
                }
                Err(e) => {
                    println!("⚠️ Attempt {}: Server not ready - {}", attempt, e);
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            }
        }

        anyhow::bail!(
            "Server did not become ready after {} attempts",
            max_attempts
        )
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
