//! integration test for the `/health` endpoint

mod common;

use axum::http::StatusCode;

use common::{send, test_app};

/// GET /health returns pass status for a healthy database
#[tokio::test]
async fn test_health_endpoint_returns_pass() {
    let (app, _db) = test_app().await;

    let (status, body, headers) = send(&app, "GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    let content_type = headers
        .get("content-type")
        .expect("should have content-type header")
        .to_str()
        .expect("content-type should be valid string");
    assert!(
        content_type.contains("application/health+json"),
        "content-type should be application/health+json, got: {}",
        content_type
    );
    assert_eq!(body, serde_json::json!({ "status": "pass" }));
}
