//! Capture routing against a temporary downloads directory.

use browser_steps::capture::{
    CapturePayload, CaptureRouter, CaptureRule, LoadingEnd, ResponseBody, ResponseMeta,
};
use serde_json::json;

fn rule(url: &str, download: bool, pretty: bool) -> CaptureRule {
    CaptureRule {
        url: url.to_string(),
        download,
        pretty,
    }
}

fn json_meta(url: &str) -> ResponseMeta {
    ResponseMeta::new(url, 200, &json!({ "Content-Type": "application/json" }))
}

#[tokio::test]
async fn test_inline_capture_embeds_body() {
    let tmp = tempfile::tempdir().unwrap();
    let mut router = CaptureRouter::new(tmp.path());
    router.register(rule("/api/orders", false, false));

    assert!(router.on_response("1", json_meta("https://shop.test/api/orders?page=1")));
    router
        .on_body("1", Ok(ResponseBody::Json(json!({ "total": 3 }))))
        .await;

    let captures = router.into_captures();
    assert_eq!(captures.len(), 1);
    assert_eq!(captures[0].status, 200);
    assert_eq!(captures[0].headers["content-type"], "application/json");
    assert_eq!(
        captures[0].payload,
        CapturePayload::Inline {
            response: json!({ "total": 3 })
        }
    );
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_download_capture_writes_file() {
    let tmp = tempfile::tempdir().unwrap();
    let mut router = CaptureRouter::new(tmp.path());
    router.register(rule("/api/", true, true));

    assert!(router.on_response("7", json_meta("https://shop.test/api/orders")));
    router
        .on_body("7", Ok(ResponseBody::Json(json!({ "id": 42 }))))
        .await;

    let captures = router.into_captures();
    assert_eq!(
        captures[0].payload,
        CapturePayload::File {
            filename: "api_orders.json".to_string()
        }
    );

    let written = std::fs::read_to_string(tmp.path().join("api_orders.json")).unwrap();
    assert_eq!(written, "{\n\t\"id\": 42\n}\n");
}

#[tokio::test]
async fn test_unmatched_responses_are_ignored() {
    let tmp = tempfile::tempdir().unwrap();
    let mut router = CaptureRouter::new(tmp.path());
    router.register(rule("/api/", false, false));

    assert!(!router.on_response("1", json_meta("https://shop.test/static/app.js")));
    assert!(!router.is_pending("1"));
    router.on_body("1", Ok(ResponseBody::Text("ignored".to_string()))).await;

    assert!(router.captures().is_empty());
}

#[tokio::test]
async fn test_failed_body_read_is_still_recorded() {
    let tmp = tempfile::tempdir().unwrap();
    let mut router = CaptureRouter::new(tmp.path());
    router.register(rule("report", false, false));

    let meta = ResponseMeta::new("https://shop.test/report.csv", 500, &json!({}));
    assert!(router.on_response("9", meta));
    router.on_body("9", Err("net::ERR_ABORTED".to_string())).await;

    let captures = router.into_captures();
    assert_eq!(captures.len(), 1);
    assert_eq!(captures[0].status, 500);
    assert_eq!(
        captures[0].payload,
        CapturePayload::Inline {
            response: serde_json::Value::Null
        }
    );
}

#[tokio::test]
async fn test_captures_keep_arrival_order() {
    let tmp = tempfile::tempdir().unwrap();
    let mut router = CaptureRouter::new(tmp.path());
    router.register(rule("/api/", false, false));

    router.on_response("a", json_meta("https://shop.test/api/first"));
    router.on_response("b", json_meta("https://shop.test/api/second"));
    router.on_body("b", Ok(ResponseBody::Json(json!(2)))).await;
    router.on_body("a", Ok(ResponseBody::Json(json!(1)))).await;

    let urls: Vec<String> = router.into_captures().into_iter().map(|c| c.url).collect();
    assert_eq!(
        urls,
        vec!["https://shop.test/api/second", "https://shop.test/api/first"]
    );
}

#[tokio::test]
async fn test_loading_end_after_response_settles_immediately() {
    let tmp = tempfile::tempdir().unwrap();
    let mut router = CaptureRouter::new(tmp.path());
    router.register(rule("/api/", false, false));

    assert!(router.on_response("1", json_meta("https://shop.test/api/orders")));
    assert_eq!(router.take_early_end("1"), None);
    assert_eq!(
        router.on_loading_end("1", LoadingEnd::Finished),
        Some(LoadingEnd::Finished)
    );
}

#[tokio::test]
async fn test_finished_before_response_is_still_captured() {
    let tmp = tempfile::tempdir().unwrap();
    let mut router = CaptureRouter::new(tmp.path());
    router.register(rule("/api/", false, false));

    // Finished is delivered first; nothing to settle yet
    assert_eq!(router.on_loading_end("5", LoadingEnd::Finished), None);
    assert!(!router.is_pending("5"));

    assert!(router.on_response("5", json_meta("https://shop.test/api/orders")));
    assert_eq!(router.take_early_end("5"), Some(LoadingEnd::Finished));
    assert_eq!(router.take_early_end("5"), None);
    router
        .on_body("5", Ok(ResponseBody::Json(json!({ "total": 3 }))))
        .await;

    let captures = router.into_captures();
    assert_eq!(captures.len(), 1);
    assert_eq!(captures[0].url, "https://shop.test/api/orders");
    assert_eq!(
        captures[0].payload,
        CapturePayload::Inline {
            response: json!({ "total": 3 })
        }
    );
}

#[tokio::test]
async fn test_failed_before_response_keeps_error_text() {
    let tmp = tempfile::tempdir().unwrap();
    let mut router = CaptureRouter::new(tmp.path());
    router.register(rule("report", false, false));

    let failed = LoadingEnd::Failed("net::ERR_ABORTED".to_string());
    assert_eq!(router.on_loading_end("9", failed.clone()), None);

    let meta = ResponseMeta::new("https://shop.test/report.csv", 200, &json!({}));
    assert!(router.on_response("9", meta));
    assert_eq!(router.take_early_end("9"), Some(failed));
}

#[tokio::test]
async fn test_ends_of_unmatched_responses_are_dropped() {
    let tmp = tempfile::tempdir().unwrap();
    let mut router = CaptureRouter::new(tmp.path());
    router.register(rule("/api/", false, false));

    // in order
    assert!(!router.on_response("1", json_meta("https://shop.test/app.js")));
    assert_eq!(router.on_loading_end("1", LoadingEnd::Finished), None);

    // end first
    assert_eq!(router.on_loading_end("2", LoadingEnd::Finished), None);
    assert!(!router.on_response("2", json_meta("https://shop.test/app.css")));
    assert_eq!(router.take_early_end("2"), None);

    assert!(router.into_captures().is_empty());
}
