//! Shape, size and value screening of submitted records

use serde_json::Value;

use super::enrich::EnrichmentContext;
use crate::config::IngestConfig;
use crate::error::AppError;
use crate::models::event::{validate_duration, validate_status, validate_timestamp, EventValidationError};
use crate::models::{HttpMethod, IngestRecord, LogEvent, LogLevel};

/// Why a single record was dropped from its batch
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RejectReason {
    #[error("malformed record: {0}")]
    Malformed(String),
    #[error(transparent)]
    Invalid(#[from] EventValidationError),
    #[error("unsupported method '{0}'")]
    UnknownMethod(String),
    #[error("serialized event is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub accepted: Vec<LogEvent>,
    pub rejected: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct IngestValidator {
    max_batch_size: usize,
    max_event_bytes: usize,
}

impl IngestValidator {
    pub fn new(max_batch_size: usize, max_event_bytes: usize) -> Self {
        Self {
            max_batch_size,
            max_event_bytes,
        }
    }

    pub fn from_config(cfg: &IngestConfig) -> Self {
        Self::new(cfg.max_batch_size, cfg.max_event_bytes)
    }

    /// A body is one record or an array of records. Oversized batches are
    /// rejected as a whole, before any record is looked at.
    pub fn split_batch(&self, body: Value) -> Result<Vec<Value>, AppError> {
        let records = match body {
            Value::Array(items) => items,
            other => vec![other],
        };

        if records.len() > self.max_batch_size {
            return Err(AppError::BatchTooLarge {
                size: records.len(),
                max: self.max_batch_size,
            });
        }

        Ok(records)
    }

    /// Validate one raw record and turn it into a canonical event.
    pub fn normalize(&self, raw: Value, ctx: &EnrichmentContext) -> Result<LogEvent, RejectReason> {
        let record: IngestRecord =
            serde_json::from_value(raw).map_err(|e| RejectReason::Malformed(e.to_string()))?;

        let timestamp = validate_timestamp(record.timestamp)?;
        let status = validate_status(record.status)?;
        let duration = validate_duration(record.duration)?;
        let method: HttpMethod = record
            .method
            .parse()
            .map_err(|_| RejectReason::UnknownMethod(record.method.clone()))?;

        if record.path.is_empty() {
            return Err(EventValidationError::EmptyField("path").into());
        }
        if record.environment.is_empty() {
            return Err(EventValidationError::EmptyField("environment").into());
        }

        let event = LogEvent {
            id: uuid::Uuid::new_v4(),
            service_id: ctx.service_id,
            timestamp,
            received_at: ctx.received_at,
            level: LogLevel::normalize(record.level.as_deref()),
            method,
            path: record.path,
            status,
            duration,
            environment: record.environment,
            request_id: ctx.request_id.clone(),
            message: record.message,
            session_id: record.session_id,
            ip_hash: Some(ctx.ip_hash.clone()),
            user_agent: ctx.user_agent.clone(),
            meta: record.meta.unwrap_or_default(),
        };

        let size = serde_json::to_vec(&event)
            .map_err(|e| RejectReason::Malformed(e.to_string()))?
            .len();
        if size > self.max_event_bytes {
            return Err(RejectReason::TooLarge {
                size,
                max: self.max_event_bytes,
            });
        }

        Ok(event)
    }

    /// Normalize every record; one bad record never fails the batch.
    pub fn normalize_batch(&self, records: Vec<Value>, ctx: &EnrichmentContext) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for (index, raw) in records.into_iter().enumerate() {
            match self.normalize(raw, ctx) {
                Ok(event) => outcome.accepted.push(event),
                Err(reason) => {
                    tracing::debug!(
                        request_id = %ctx.request_id,
                        index,
                        reason = %reason,
                        "Rejected ingest record"
                    );
                    outcome.rejected += 1;
                }
            }
        }

        outcome
    }
}
