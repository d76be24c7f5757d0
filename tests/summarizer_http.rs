//! The streaming summarizer against a local one-shot HTTP server.

mod common;

use common::{start_one_shot_server, Reply};
use rules_digest::{PipelineConfig, PipelineError, StreamingSummarizer, Summarizer};
use std::sync::Arc;

fn summarizer(url: &str, api_key: Option<&str>) -> StreamingSummarizer {
    let config = PipelineConfig::builder()
        .pdf_root("/tmp/rules-digest/pdf")
        .image_root("/tmp/rules-digest/img")
        .summary_url(format!("{url}/api/generate"))
        .summary_model("qwen3-vl:235b")
        .summary_api_key(api_key.map(str::to_string))
        .num_predict(512)
        .build()
        .unwrap();
    StreamingSummarizer::new(Arc::new(config), reqwest::Client::new())
}

#[tokio::test]
async fn streamed_fragments_become_the_summary() {
    let body = concat!(
        "{\"model\":\"qwen3-vl:235b\",\"response\":\"Sum\",\"done\":false}\n",
        "{\"model\":\"qwen3-vl:235b\",\"response\":\"mary\",\"done\":false}\n",
        "{\"model\":\"qwen3-vl:235b\",\"response\":\"\",\"done\":true,\"total_duration\":12}\n",
    );
    let (url, request_rx, handle) =
        start_one_shot_server(Reply::ok("application/x-ndjson", body));

    let summary = summarizer(&url, Some("secret-key"))
        .summarize("[{\"page\":1}]")
        .await
        .unwrap();
    assert_eq!(summary, "Summary");

    let request = request_rx.recv().unwrap();
    handle.join().unwrap();

    assert!(request.starts_with("POST /api/generate "));
    assert!(request
        .to_ascii_lowercase()
        .contains("authorization: bearer secret-key"));
    let json_start = request.find("\r\n\r\n").unwrap() + 4;
    let sent: serde_json::Value = serde_json::from_str(&request[json_start..]).unwrap();
    assert_eq!(sent["model"], "qwen3-vl:235b");
    assert_eq!(sent["prompt"], "[{\"page\":1}]");
    assert_eq!(sent["stream"], true);
    assert_eq!(sent["keep_alive"], "0");
    assert_eq!(sent["options"]["num_predict"], 512);
    assert!(sent["system"].as_str().unwrap().contains("JSON array of pages"));
}

#[tokio::test]
async fn malformed_line_does_not_discard_earlier_text() {
    let body = concat!(
        "{\"response\":\"Keep \",\"done\":false}\n",
        "{\"response\": truncated\n",
        "{\"response\":\"this\",\"done\":true}\n",
    );
    let (url, _request_rx, handle) =
        start_one_shot_server(Reply::ok("application/x-ndjson", body));

    let summary = summarizer(&url, Some("k")).summarize("ocr").await.unwrap();
    handle.join().unwrap();

    assert_eq!(summary, "Keep this");
}

#[tokio::test]
async fn error_status_is_reported_with_body() {
    let (url, _request_rx, handle) =
        start_one_shot_server(Reply::status("401 Unauthorized", "unauthorized"));

    let err = summarizer(&url, Some("wrong")).summarize("ocr").await.unwrap_err();
    handle.join().unwrap();

    match err {
        PipelineError::SummaryStatus { status, body } => {
            assert_eq!(status, 401);
            assert_eq!(body, "unauthorized");
        }
        other => panic!("expected SummaryStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_credential_sends_nothing() {
    // Nothing listens here; a request would fail with SummaryRequest.
    let err = summarizer("http://127.0.0.1:9", None)
        .summarize("ocr")
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::MissingCredential));
}
