//! Durable storage for processed events and dead letters
//!
//! The worker is the only writer of `log_events`; the analytics engine reads
//! the same table through `row_to_event`.

pub mod services;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{DeadLetterEntry, LogEvent};

pub use services::ServiceDirectory;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// Write side of the log store, as seen by the processing worker
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Persist one event. Returns `false` when a row with the same
    /// `(id, timestamp)` already exists (redelivered job).
    async fn insert_event(&self, event: &LogEvent) -> Result<bool, StoreError>;

    /// Record a terminally failed job with its payload verbatim.
    async fn insert_dead_letter(
        &self,
        service_id: &str,
        reason: &str,
        payload: &Value,
    ) -> Result<Uuid, StoreError>;
}

#[derive(Clone)]
pub struct SqliteLogStore {
    pool: SqlitePool,
}

impl SqliteLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Most recent dead letters first
    pub async fn list_dead_letters(
        &self,
        service_id: &str,
        limit: i64,
    ) -> Result<Vec<DeadLetterEntry>, StoreError> {
        let rows = sqlx::query_as::<_, DeadLetterRow>(
            "SELECT id, service_id, failed_at, reason, payload FROM dead_letters
             WHERE service_id = ? ORDER BY failed_at DESC LIMIT ?",
        )
        .bind(service_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DeadLetterEntry::try_from).collect()
    }
}

#[async_trait]
impl LogStore for SqliteLogStore {
    async fn insert_event(&self, event: &LogEvent) -> Result<bool, StoreError> {
        let meta = serde_json::to_string(&event.meta)?;

        let result = sqlx::query(
            r#"
            INSERT INTO log_events (
                id, timestamp, service_id, received_at, level, method, path, status,
                duration, environment, request_id, message, session_id, ip_hash,
                user_agent, meta, path_folded, message_folded
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id, timestamp) DO NOTHING
            "#,
        )
        .bind(event.id.to_string())
        .bind(event.timestamp)
        .bind(event.service_id.to_string())
        .bind(event.received_at)
        .bind(event.level.as_str())
        .bind(event.method.as_str())
        .bind(&event.path)
        .bind(event.status as i64)
        .bind(event.duration)
        .bind(&event.environment)
        .bind(&event.request_id)
        .bind(&event.message)
        .bind(&event.session_id)
        .bind(&event.ip_hash)
        .bind(&event.user_agent)
        .bind(meta)
        .bind(event.path.to_lowercase())
        .bind(event.message.as_deref().unwrap_or_default().to_lowercase())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_dead_letter(
        &self,
        service_id: &str,
        reason: &str,
        payload: &Value,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO dead_letters (id, service_id, failed_at, reason, payload) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(service_id)
        .bind(chrono::Utc::now().timestamp_millis())
        .bind(reason)
        .bind(serde_json::to_string(payload)?)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }
}

/// Raw `log_events` row
#[derive(Debug, sqlx::FromRow)]
pub struct LogEventRow {
    pub id: String,
    pub timestamp: i64,
    pub service_id: String,
    pub received_at: i64,
    pub level: String,
    pub method: String,
    pub path: String,
    pub status: i64,
    pub duration: f64,
    pub environment: String,
    pub request_id: String,
    pub message: Option<String>,
    pub session_id: Option<String>,
    pub ip_hash: Option<String>,
    pub user_agent: Option<String>,
    pub meta: String,
}

pub const LOG_EVENT_COLUMNS: &str = "id, timestamp, service_id, received_at, level, method, path, \
     status, duration, environment, request_id, message, session_id, ip_hash, user_agent, meta";

impl TryFrom<LogEventRow> for LogEvent {
    type Error = StoreError;

    fn try_from(row: LogEventRow) -> Result<Self, Self::Error> {
        let corrupt = |what: String| StoreError::CorruptRow(format!("log event {}: {}", row.id, what));

        let id = Uuid::parse_str(&row.id).map_err(|e| corrupt(e.to_string()))?;
        let service_id = Uuid::parse_str(&row.service_id).map_err(|e| corrupt(e.to_string()))?;
        let level = row.level.parse().map_err(corrupt)?;
        let method = row.method.parse().map_err(corrupt)?;
        let status = u16::try_from(row.status).map_err(|e| corrupt(e.to_string()))?;
        let meta: Map<String, Value> = serde_json::from_str(&row.meta)?;

        Ok(LogEvent {
            id,
            service_id,
            timestamp: row.timestamp,
            received_at: row.received_at,
            level,
            method,
            path: row.path,
            status,
            duration: row.duration,
            environment: row.environment,
            request_id: row.request_id,
            message: row.message,
            session_id: row.session_id,
            ip_hash: row.ip_hash,
            user_agent: row.user_agent.unwrap_or_default(),
            meta,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DeadLetterRow {
    id: String,
    service_id: String,
    failed_at: i64,
    reason: String,
    payload: String,
}

impl TryFrom<DeadLetterRow> for DeadLetterEntry {
    type Error = StoreError;

    fn try_from(row: DeadLetterRow) -> Result<Self, Self::Error> {
        Ok(DeadLetterEntry {
            id: Uuid::parse_str(&row.id).map_err(|e| StoreError::CorruptRow(e.to_string()))?,
            service_id: row.service_id,
            failed_at: row.failed_at,
            reason: row.reason,
            payload: serde_json::from_str(&row.payload)?,
        })
    }
}
