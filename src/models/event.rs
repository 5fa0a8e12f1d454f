use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Log severity, `info` when absent or unrecognized at ingestion
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Lenient parse used at ingestion: anything unknown becomes `info`.
    pub fn normalize(raw: Option<&str>) -> Self {
        raw.and_then(|l| l.parse().ok()).unwrap_or_default()
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP verb of the logged request, always stored upper-case
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Connect,
    Options,
    Trace,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
        }
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    /// Case-insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "CONNECT" => Ok(Self::Connect),
            "OPTIONS" => Ok(Self::Options),
            "TRACE" => Ok(Self::Trace),
            other => Err(format!("unsupported method '{}'", other)),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical log event.
///
/// This is both the queue job payload and the row persisted by the worker.
/// Timestamps are epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    /// Assigned at the gateway and stable across redeliveries
    pub id: Uuid,
    pub service_id: Uuid,
    pub timestamp: i64,
    pub received_at: i64,
    pub level: LogLevel,
    pub method: HttpMethod,
    pub path: String,
    pub status: u16,
    pub duration: f64,
    pub environment: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_hash: Option<String>,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EventValidationError {
    #[error("status {0} outside 100-599")]
    StatusOutOfRange(i64),
    #[error("duration must be a finite, non-negative number")]
    InvalidDuration,
    #[error("field '{0}' cannot be empty")]
    EmptyField(&'static str),
    #[error("timestamp {0} is before the Unix epoch")]
    NegativeTimestamp(i64),
}

pub fn validate_timestamp(timestamp: i64) -> Result<i64, EventValidationError> {
    if timestamp >= 0 {
        Ok(timestamp)
    } else {
        Err(EventValidationError::NegativeTimestamp(timestamp))
    }
}

pub fn validate_status(status: i64) -> Result<u16, EventValidationError> {
    if (100..=599).contains(&status) {
        Ok(status as u16)
    } else {
        Err(EventValidationError::StatusOutOfRange(status))
    }
}

pub fn validate_duration(duration: f64) -> Result<f64, EventValidationError> {
    if duration.is_finite() && duration >= 0.0 {
        Ok(duration)
    } else {
        Err(EventValidationError::InvalidDuration)
    }
}

impl LogEvent {
    /// Value-level checks that the type system does not already enforce.
    pub fn validate(&self) -> Result<(), EventValidationError> {
        validate_timestamp(self.timestamp)?;
        validate_status(self.status as i64)?;
        validate_duration(self.duration)?;
        if self.path.is_empty() {
            return Err(EventValidationError::EmptyField("path"));
        }
        if self.environment.is_empty() {
            return Err(EventValidationError::EmptyField("environment"));
        }
        if self.request_id.is_empty() {
            return Err(EventValidationError::EmptyField("requestId"));
        }
        Ok(())
    }
}

/// A record as submitted by a client service
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRecord {
    #[serde(default)]
    pub level: Option<String>,
    pub timestamp: i64,
    pub environment: String,
    pub method: String,
    pub path: String,
    pub status: i64,
    pub duration: f64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub meta: Option<Map<String, Value>>,
}

/// A job that exhausted its retries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub service_id: String,
    pub failed_at: i64,
    pub reason: String,
    pub payload: Value,
}

#[cfg(test)]
pub(crate) fn sample_event(service_id: Uuid) -> LogEvent {
    LogEvent {
        id: Uuid::new_v4(),
        service_id,
        timestamp: 1_700_000_000_000,
        received_at: 1_700_000_000_050,
        level: LogLevel::Info,
        method: HttpMethod::Get,
        path: "/api/users".to_string(),
        status: 200,
        duration: 12.5,
        environment: "production".to_string(),
        request_id: "req-1".to_string(),
        message: None,
        session_id: None,
        ip_hash: Some("abc".to_string()),
        user_agent: "curl/8.0".to_string(),
        meta: Map::new(),
    }
}
