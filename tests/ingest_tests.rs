//! Ingestion endpoint driven through the router
mod common;

use axum::http::StatusCode;
use common::{body_json, record, test_config, TestApp, TOKEN};
use logr::queue::JobQueue;
use serde_json::json;

#[tokio::test]
async fn test_batch_with_one_invalid_record() {
    let app = TestApp::new().await;

    let response = app
        .ingest(&json!([
            record(1_000, 200, 12.0),
            record(2_000, 999, 5.0),
            record(3_000, 500, 40.0),
        ]))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["accepted"], 2);
    assert_eq!(body["rejected"], 1);
    assert!(!body["requestId"].as_str().unwrap().is_empty());

    // Accepted records are queued, not stored
    assert_eq!(app.queue.counts().await.unwrap().waiting, 2);
    let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM log_events")
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(stored, 0);
}

#[tokio::test]
async fn test_single_object_body() {
    let app = TestApp::new().await;

    let response = app.ingest(&record(0, 201, 3.5)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["accepted"], 1);
}

#[tokio::test]
async fn test_trace_id_becomes_request_id() {
    let app = TestApp::new().await;
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/v1/ingest")
        .header(logr::handlers::ingest::TOKEN_HEADER, TOKEN)
        .header(
            "traceparent",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        )
        .body(axum::body::Body::from(record(0, 200, 1.0).to_string()))
        .unwrap();

    let response = tower::ServiceExt::oneshot(app.router.clone(), request).await.unwrap();
    assert_eq!(
        body_json(response).await["requestId"],
        "4bf92f3577b34da6a3ce929d0e0e4736"
    );
}

#[tokio::test]
async fn test_missing_and_unknown_tokens() {
    let app = TestApp::new().await;
    let body = record(0, 200, 1.0).to_string();

    let response = app.ingest_raw("short", body.clone()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"]["type"], "missing_token");

    let response = app
        .ingest_raw("ffffffffffffffffffffffffffffffff", body)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"]["type"], "invalid_token");
}

#[tokio::test]
async fn test_request_rate_limit() {
    let mut config = test_config();
    // Long window so the test is not timing sensitive
    config.rate_limit.request_window_ms = 60_000;
    let app = TestApp::with_config(config).await;

    for _ in 0..100 {
        let response = app.ingest(&record(0, 200, 1.0)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.ingest(&record(0, 200, 1.0)).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "rate_limited");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Max 100 requests per minute"));

    assert_eq!(app.queue.counts().await.unwrap().waiting, 100);
}

#[tokio::test]
async fn test_event_quota() {
    let mut config = test_config();
    config.rate_limit.event_limit = 5;
    let app = TestApp::with_config(config).await;

    let batch: Vec<_> = (0..3).map(|i| record(i, 200, 1.0)).collect();
    assert_eq!(app.ingest(&json!(batch)).await.status(), StatusCode::OK);

    let response = app.ingest(&json!(batch)).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "quota_exceeded");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Max 5 events per minute"));

    // A refused batch consumes nothing, so two more still fit
    let response = app.ingest(&json!(&batch[..2])).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_oversized_batch_and_body() {
    let app = TestApp::new().await;

    let batch: Vec<_> = (0..101).map(|i| record(i, 200, 1.0)).collect();
    let response = app.ingest(&json!(batch)).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body_json(response).await["error"]["type"], "batch_too_large");

    let huge = json!({ "padding": "x".repeat(300 * 1024) });
    let response = app.ingest(&huge).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body_json(response).await["error"]["type"], "payload_too_large");
}

#[tokio::test]
async fn test_invalid_json_and_empty_batches() {
    let app = TestApp::new().await;

    let response = app.ingest_raw(TOKEN, "{not json".to_string()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["type"], "invalid_json");

    let response = app.ingest(&json!([])).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["error"]["type"], "no_valid_events");

    let response = app.ingest(&json!([{"status": 200}, 42])).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body_json(response).await["error"]["message"]
        .as_str()
        .unwrap()
        .contains("All 2 events"));

    assert_eq!(app.queue.counts().await.unwrap().waiting, 0);
}
