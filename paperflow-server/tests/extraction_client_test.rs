//! ExtractionClient against a local stand-in inference service.

mod common;

use axum::extract::{Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

use paperflow_core::extraction::{ExtractionClient, Resolution};

fn inference_router(response: Value) -> Router {
    let response = Arc::new(response);
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "ok"})) }))
        .route(
            "/extract",
            post(
                |State(response): State<Arc<Value>>, mut multipart: Multipart| async move {
                    // Drain the uploaded file like the real service would.
                    while let Ok(Some(field)) = multipart.next_field().await {
                        let _ = field.bytes().await;
                    }
                    Json((*response).clone())
                },
            ),
        )
        .with_state(response)
}

#[tokio::test]
async fn confident_extraction_resolves_remotely() {
    let base = common::spawn_server(inference_router(json!({
        "success": true,
        "register_number": "212222240047",
        "register_confidence": 0.93,
        "subject_code": "19AI405",
        "subject_confidence": 0.88,
    })))
    .await;

    let client = ExtractionClient::new(&base);
    assert!(client.health().await);

    match client.resolve(b"%PDF-1.4 scan", "scan_0001.pdf").await {
        Resolution::Remote(identity) => {
            assert_eq!(identity.register_number, "212222240047");
            assert_eq!(identity.subject_code, "19AI405");
        }
        other => panic!("expected Remote, got {other:?}"),
    }
}

#[tokio::test]
async fn low_confidence_result_is_flagged_for_review() {
    let base = common::spawn_server(inference_router(json!({
        "success": true,
        "register_number": "212222240047",
        "register_confidence": 0.52,
        "subject_code": "19AI405",
        "subject_confidence": 0.49,
    })))
    .await;

    let client = ExtractionClient::new(&base);
    // Unparseable filename: nothing to fall back on, the low-confidence
    // fields survive for the manual-review queue.
    match client.resolve(b"%PDF-1.4 scan", "scan_0001.pdf").await {
        Resolution::LowConfidence {
            register_number, ..
        } => assert_eq!(register_number.as_deref(), Some("212222240047")),
        other => panic!("expected LowConfidence, got {other:?}"),
    }

    // A strict filename outranks a dubious remote guess.
    match client
        .resolve(b"%PDF-1.4 scan", "611221104088_ML.pdf")
        .await
    {
        Resolution::Filename(parsed) => assert_eq!(parsed.register_number, "611221104088"),
        other => panic!("expected Filename, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_service_degrades_to_filename_parse() {
    let base = common::spawn_server(inference_router(json!({
        "success": false,
        "error": "models not loaded",
    })))
    .await;

    let client = ExtractionClient::new(&base);
    match client
        .resolve(b"%PDF-1.4 scan", "212222240047_19AI405.pdf")
        .await
    {
        Resolution::Filename(parsed) => {
            assert_eq!(parsed.register_number, "212222240047");
            assert_eq!(parsed.subject_code, "19AI405");
        }
        other => panic!("expected Filename, got {other:?}"),
    }

    assert_eq!(
        client.resolve(b"%PDF-1.4 scan", "scan_0001.pdf").await,
        Resolution::None
    );
}

#[tokio::test]
async fn unreachable_service_degrades_to_filename_parse() {
    let client = ExtractionClient::new("http://127.0.0.1:1");
    assert!(!client.health().await);

    match client
        .resolve(b"%PDF-1.4 scan", "212222240047_19AI405.pdf")
        .await
    {
        Resolution::Filename(parsed) => assert_eq!(parsed.subject_code, "19AI405"),
        other => panic!("expected Filename, got {other:?}"),
    }
}
