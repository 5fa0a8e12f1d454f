use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

use super::AppState;

/// Liveness: 200 while the process is serving
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "logr",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

/// Readiness: database round-trip plus queue depth, 503 if either fails
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if let Err(e) = sqlx::query("SELECT 1").execute(&state.pool).await {
        tracing::warn!(error = %e, "Readiness probe: database unreachable");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable", "reason": "database" })),
        );
    }

    match state.queue.counts().await {
        Ok(counts) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "service": "logr",
                "queue": {
                    "waiting": counts.waiting,
                    "active": counts.active,
                    "completed": counts.completed,
                    "failed": counts.failed,
                },
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness probe: queue unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "reason": "queue" })),
            )
        }
    }
}
