//! `POST /v1/ingest`
//!
//! Authenticate, rate limit, validate and enqueue. Nothing here writes to the
//! log store; the response only waits for the enqueue.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::HeaderMap,
    Json,
};
use serde::Serialize;
use serde_json::Value;
use std::net::SocketAddr;

use super::AppState;
use crate::error::AppError;
use crate::ingest::enrich::{resolve_request_id, user_agent};
use crate::ingest::{EnrichmentContext, IngestValidator, IpHasher, RatePolicy, WindowKind};
use crate::queue::{JobOptions, NewJob, LOG_EVENT_JOB};

pub const TOKEN_HEADER: &str = "x-logr-service-token";
pub const TOKEN_LENGTH: usize = 32;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub accepted: usize,
    pub rejected: usize,
    pub request_id: String,
}

pub async fn ingest(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<IngestResponse>, AppError> {
    let remote_ip = connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "127.0.0.1".to_string());

    let result = handle_ingest(&state, &remote_ip, &headers, body).await;

    let status = match &result {
        Ok(_) => 200,
        Err(e) => e.status_code().as_u16(),
    };
    crate::metrics::record_ingest_request(status);

    result.map(Json)
}

async fn handle_ingest(
    state: &AppState,
    remote_ip: &str,
    headers: &HeaderMap,
    body: Body,
) -> Result<IngestResponse, AppError> {
    let token = headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|t| t.len() == TOKEN_LENGTH)
        .ok_or(AppError::MissingToken)?;

    let service = state
        .services
        .resolve_token(token)
        .await?
        .ok_or(AppError::InvalidToken)?;
    state.services.touch_last_used(service.token_id.clone());

    let cfg = state.config.load();
    let limits = &cfg.rate_limit;

    let request_policy = RatePolicy::new(limits.request_limit, limits.request_window_ms);
    let decision = state
        .rate_limiter
        .check_and_consume(&service.token_hash, WindowKind::Requests, request_policy, 1)
        .await?;
    if !decision.is_allowed() {
        crate::metrics::record_rate_limited("requests");
        return Err(AppError::RateLimited(format!(
            "Max {} requests per {}",
            group_thousands(limits.request_limit),
            describe_window(limits.request_window_ms)
        )));
    }

    let max_body = cfg.ingest.max_body_bytes;
    let bytes = axum::body::to_bytes(body, max_body).await.map_err(|_| {
        AppError::PayloadTooLarge(format!("request body exceeds {} bytes", max_body))
    })?;

    let payload: Value =
        serde_json::from_slice(&bytes).map_err(|e| AppError::InvalidJson(e.to_string()))?;

    let validator = IngestValidator::from_config(&cfg.ingest);
    let records = validator.split_batch(payload)?;

    let event_policy = RatePolicy::new(limits.event_limit, limits.event_window_ms);
    let decision = state
        .rate_limiter
        .check_and_consume(
            &service.token_hash,
            WindowKind::Events,
            event_policy,
            records.len() as u64,
        )
        .await?;
    if !decision.is_allowed() {
        crate::metrics::record_rate_limited("events");
        return Err(AppError::QuotaExceeded(format!(
            "Max {} events per {}",
            group_thousands(limits.event_limit),
            describe_window(limits.event_window_ms)
        )));
    }

    let ip_hasher = IpHasher::new(&cfg.security.ip_hash_key)
        .map_err(|e| AppError::InternalError(format!("ip hash key rejected: {}", e)))?;

    let ctx = EnrichmentContext {
        service_id: service.service_id,
        received_at: chrono::Utc::now().timestamp_millis(),
        request_id: resolve_request_id(headers),
        ip_hash: ip_hasher.hash(remote_ip),
        user_agent: user_agent(headers),
    };

    let outcome = validator.normalize_batch(records, &ctx);
    crate::metrics::record_batch(outcome.accepted.len(), outcome.rejected);

    if outcome.accepted.is_empty() {
        return Err(AppError::NoValidEvents {
            rejected: outcome.rejected,
        });
    }

    let options = JobOptions::from(&cfg.queue);
    let jobs = outcome
        .accepted
        .iter()
        .map(|event| {
            Ok(NewJob {
                name: LOG_EVENT_JOB.to_string(),
                payload: serde_json::to_value(event)?,
                options,
            })
        })
        .collect::<Result<Vec<_>, serde_json::Error>>()
        .map_err(|e| AppError::InternalError(format!("failed to encode job payload: {}", e)))?;

    state.queue.add_bulk(jobs).await?;

    tracing::info!(
        service_id = %ctx.service_id,
        request_id = %ctx.request_id,
        accepted = outcome.accepted.len(),
        rejected = outcome.rejected,
        "Ingested batch"
    );

    Ok(IngestResponse {
        accepted: outcome.accepted.len(),
        rejected: outcome.rejected,
        request_id: ctx.request_id,
    })
}

/// `1000` → `second`, `60000` → `minute`, anything else in milliseconds
fn describe_window(window_ms: u64) -> String {
    match window_ms {
        1_000 => "second".to_string(),
        60_000 => "minute".to_string(),
        3_600_000 => "hour".to_string(),
        ms if ms % 1_000 == 0 => format!("{} seconds", ms / 1_000),
        ms => format!("{} ms", ms),
    }
}

/// `10000` → `10,000`
fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
