//! Server-side attributes attached to every record of a batch

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Attributes shared by every record of one ingestion request
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentContext {
    pub service_id: Uuid,
    pub received_at: i64,
    pub request_id: String,
    pub ip_hash: String,
    pub user_agent: String,
}

/// Trace id of a W3C `traceparent` header (`version-traceid-parentid-flags`).
pub fn extract_trace_id(traceparent: &str) -> Option<String> {
    let parts: Vec<&str> = traceparent.trim().split('-').collect();
    if parts.len() != 4 {
        return None;
    }

    let trace_id = parts[1];
    if trace_id.len() != 32 || !trace_id.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    if trace_id.chars().all(|c| c == '0') {
        return None;
    }

    Some(trace_id.to_string())
}

/// `traceparent` trace id, else `x-request-id`, else a fresh UUID.
pub fn resolve_request_id(headers: &HeaderMap) -> String {
    headers
        .get("traceparent")
        .and_then(|v| v.to_str().ok())
        .and_then(extract_trace_id)
        .or_else(|| {
            headers
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Keyed one-way hash of client addresses, hex encoded
#[derive(Clone)]
pub struct IpHasher {
    mac: HmacSha256,
}

impl IpHasher {
    pub fn new(key: &str) -> Result<Self, hmac::digest::InvalidLength> {
        Ok(Self {
            mac: HmacSha256::new_from_slice(key.as_bytes())?,
        })
    }

    pub fn hash(&self, ip: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(ip.as_bytes());
        format!("{:x}", mac.finalize().into_bytes())
    }
}

pub fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
