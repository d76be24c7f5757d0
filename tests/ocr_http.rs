//! The HTTP OCR client against a local one-shot HTTP server.

mod common;

use common::{start_one_shot_server, Reply};
use rules_digest::{HttpOcrClient, OcrBlock, OcrClient, OcrError, PageImage};
use tempfile::TempDir;

fn page_image(dir: &TempDir, page: u32) -> PageImage {
    let path = dir.path().join(format!("page-{page}.png"));
    std::fs::write(&path, b"\x89PNG fake image bytes").unwrap();
    PageImage { page, path }
}

#[tokio::test]
async fn uploads_file_and_parses_blocks() {
    let dir = TempDir::new().unwrap();
    let (url, request_rx, handle) = start_one_shot_server(Reply::ok(
        "application/json",
        r#"{"blocks":[{"text":"Setup","confidence":0.93},{"text":"Each player","confidence":0.8}]}"#,
    ));

    let client = HttpOcrClient::new(reqwest::Client::new(), &format!("{url}/"));
    let result = client.recognize(&page_image(&dir, 3)).await.unwrap();

    let request = request_rx.recv().unwrap();
    handle.join().unwrap();

    assert_eq!(
        result.blocks,
        vec![
            OcrBlock {
                text: "Setup".into(),
                confidence: 0.93
            },
            OcrBlock {
                text: "Each player".into(),
                confidence: 0.8
            },
        ]
    );
    assert!(request.starts_with("POST /ocr "));
    assert!(request.contains("name=\"file\""));
    assert!(request.contains("filename=\"page-3.png\""));
    assert!(request.contains("fake image bytes"));
}

#[tokio::test]
async fn non_200_is_a_status_error_for_that_page() {
    let dir = TempDir::new().unwrap();
    let (url, _request_rx, handle) =
        start_one_shot_server(Reply::status("500 Internal Server Error", "boom"));

    let client = HttpOcrClient::new(reqwest::Client::new(), &url);
    let err = client.recognize(&page_image(&dir, 2)).await.unwrap_err();
    handle.join().unwrap();

    assert_eq!(err, OcrError::Status { page: 2, status: 500 });
}

#[tokio::test]
async fn unexpected_body_is_a_decode_error() {
    let dir = TempDir::new().unwrap();
    let (url, _request_rx, handle) =
        start_one_shot_server(Reply::ok("application/json", r#"{"text":"no blocks"}"#));

    let client = HttpOcrClient::new(reqwest::Client::new(), &url);
    let err = client.recognize(&page_image(&dir, 1)).await.unwrap_err();
    handle.join().unwrap();

    assert!(matches!(err, OcrError::Decode { page: 1, .. }));
}

#[tokio::test]
async fn unreadable_image_fails_before_any_request() {
    let dir = TempDir::new().unwrap();
    let client = HttpOcrClient::new(reqwest::Client::new(), "http://127.0.0.1:9");
    let image = PageImage {
        page: 4,
        path: dir.path().join("page-4.png"),
    };

    let err = client.recognize(&image).await.unwrap_err();
    assert!(matches!(err, OcrError::Io { page: 4, .. }));
}
