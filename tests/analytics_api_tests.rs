//! Analytics routes driven through the router
mod common;

use axum::http::StatusCode;
use common::{body_json, record, TestApp};
use serde_json::{json, Value};
use uuid::Uuid;

async fn app_with_traffic() -> TestApp {
    let app = TestApp::new().await;

    let mut batch: Vec<Value> = (0..12)
        .map(|i| record(i * 1_000 + 500, if i % 4 == 0 { 503 } else { 200 }, (i + 1) as f64))
        .collect();
    batch[1]["level"] = json!("warn");
    batch[1]["path"] = json!("/api/users/7");

    let response = app.ingest(&json!(batch)).await;
    assert_eq!(response.status(), StatusCode::OK);
    app.drain_queue().await;
    app
}

#[tokio::test]
async fn test_unknown_service_and_bad_ids() {
    let app = TestApp::new().await;

    let response = app
        .get(&format!("/api/services/{}/stats/overview", Uuid::new_v4()))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["type"], "not_found");

    let response = app.get("/api/services/not-a-uuid/logs").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .get(&format!("/api/services/{}/logs?period=2w", app.service_id))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_overview_shape() {
    let app = app_with_traffic().await;

    let response = app
        .get(&format!("/api/services/{}/stats/overview?period=1h", app.service_id))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    assert_eq!(body["totalRequests"], 12);
    assert_eq!(body["errorCount"], 3);
    assert_eq!(body["errorRate"], 25.0);
    assert_eq!(body["avgDuration"], 6.5);
    // Nothing in the previous hour, so no relative change
    assert!(body["comparison"]["totalRequests"]["change"].is_null());
    assert_eq!(body["comparison"]["totalRequests"]["previous"], 0.0);
}

#[tokio::test]
async fn test_timeseries_metrics_selection() {
    let app = app_with_traffic().await;
    let base = format!("/api/services/{}/stats/timeseries?period=1h", app.service_id);

    let body = body_json(app.get(&format!("{}&metrics=requests,errors", base)).await).await;
    assert_eq!(body["granularity"], "minute");
    let points = body["data"].as_array().unwrap();
    assert!(!points.is_empty());
    let total: i64 = points.iter().map(|p| p["requests"].as_i64().unwrap()).sum();
    assert_eq!(total, 12);
    assert!(points[0].get("p95Duration").is_none());

    let response = app.get(&format!("{}&metrics=bogus", base)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["type"], "invalid_metrics");
}

#[tokio::test]
async fn test_breakdowns() {
    let app = app_with_traffic().await;

    let body = body_json(
        app.get(&format!(
            "/api/services/{}/stats/status-breakdown?period=1h&groupBy=code",
            app.service_id
        ))
        .await,
    )
    .await;
    assert_eq!(body["total"], 12);
    assert_eq!(body["breakdown"][0]["status"], 200);
    assert_eq!(body["breakdown"][1]["status"], 503);

    let body = body_json(
        app.get(&format!(
            "/api/services/{}/stats/status-breakdown?period=1h",
            app.service_id
        ))
        .await,
    )
    .await;
    assert_eq!(body["breakdown"][0]["category"], "2xx");
    assert_eq!(body["breakdown"][0]["label"], "Success");
    assert_eq!(body["breakdown"][0]["percentage"], 75.0);

    let body = body_json(
        app.get(&format!(
            "/api/services/{}/stats/log-level-breakdown?period=1h",
            app.service_id
        ))
        .await,
    )
    .await;
    let levels: Vec<&str> = body["breakdown"]
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["level"].as_str().unwrap())
        .collect();
    assert_eq!(levels, vec!["info", "warn"]);
}

#[tokio::test]
async fn test_log_pagination_over_http() {
    let app = app_with_traffic().await;
    let base = format!("/api/services/{}/logs?period=1h&limit=5", app.service_id);

    let mut seen = Vec::new();
    let mut uri = base.clone();
    loop {
        let body = body_json(app.get(&uri).await).await;
        assert_eq!(body["pagination"]["totalEstimate"], 12);
        for log in body["logs"].as_array().unwrap() {
            seen.push(log["id"].as_str().unwrap().to_string());
        }
        match body["pagination"]["nextCursor"].as_str() {
            Some(cursor) => uri = format!("{}&cursor={}", base, cursor),
            None => break,
        }
    }

    assert_eq!(seen.len(), 12);
    let mut unique = seen.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 12);

    let body = body_json(
        app.get(&format!("/api/services/{}/logs?path=/api/users/*", app.service_id))
            .await,
    )
    .await;
    assert_eq!(body["logs"].as_array().unwrap().len(), 1);

    let response = app
        .get(&format!("/api/services/{}/logs?limit=500", app.service_id))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_single_log_lookup_requires_timestamp() {
    let app = app_with_traffic().await;

    let response = app
        .get(&format!("/api/services/{}/logs/{}", app.service_id, Uuid::new_v4()))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .get(&format!(
            "/api/services/{}/logs/{}?timestamp=2024-01-01T00:00:00Z",
            app.service_id,
            Uuid::new_v4()
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_and_readiness() {
    let app = TestApp::new().await;

    let response = app.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");

    app.ingest(&record(0, 200, 1.0)).await;
    let response = app.get("/ready").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["queue"]["waiting"], 1);
}
