use serde_json::Value;
use std::sync::Arc;

use crate::models::LogEvent;
use crate::queue::FailureKind;
use crate::scrub::scrub_event;
use crate::store::LogStore;

/// Failure of one processing attempt
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProcessError {
    /// The payload can never become valid; remaining retries are skipped
    #[error("{0}")]
    Unrecoverable(String),
    /// Storage or runtime trouble; retried with backoff
    #[error("{0}")]
    Transient(String),
}

impl ProcessError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Unrecoverable(_) => FailureKind::Unrecoverable,
            Self::Transient(_) => FailureKind::Retryable,
        }
    }
}

/// Validate, scrub and persist one job payload.
#[derive(Clone)]
pub struct EventProcessor {
    store: Arc<dyn LogStore>,
}

impl EventProcessor {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    /// Returns `false` when the event was already stored by an earlier delivery.
    pub async fn process(&self, payload: &Value) -> Result<bool, ProcessError> {
        let record_id = payload
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let event: LogEvent = serde_json::from_value(payload.clone()).map_err(|e| {
            ProcessError::Unrecoverable(format!("Validation of event {} failed: {}", record_id, e))
        })?;
        event.validate().map_err(|e| {
            ProcessError::Unrecoverable(format!("Validation of event {} failed: {}", record_id, e))
        })?;

        let event = match scrub_event(&event) {
            Ok(scrubbed) => scrubbed,
            Err(e) => {
                tracing::warn!(
                    event_id = %event.id,
                    service_id = %event.service_id,
                    error = %e,
                    "Scrubbing failed, storing event unscrubbed"
                );
                event
            }
        };

        self.store
            .insert_event(&event)
            .await
            .map_err(|e| ProcessError::Transient(format!("Failed to store event {}: {}", event.id, e)))
    }
}
