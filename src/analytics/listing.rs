use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

use super::cursor::Cursor;
use super::filters::LogFilters;
use super::AnalyticsEngine;
use crate::models::{HttpMethod, LogEvent, LogLevel};
use crate::store::{LogEventRow, StoreError, LOG_EVENT_COLUMNS};

/// An event as returned by the analytics API
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogView {
    pub id: Uuid,
    pub service_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub level: LogLevel,
    pub method: HttpMethod,
    pub path: String,
    pub status: u16,
    pub duration: f64,
    pub environment: String,
    pub request_id: String,
    pub message: Option<String>,
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub meta: Map<String, Value>,
}

impl LogView {
    /// Full record, client attributes included
    pub fn full(event: LogEvent) -> Self {
        let ip_hash = event.ip_hash.clone();
        let user_agent = Some(event.user_agent.clone());
        Self {
            ip_hash,
            user_agent,
            ..Self::summary(event)
        }
    }

    /// Listing row without client attributes
    pub fn summary(event: LogEvent) -> Self {
        Self {
            id: event.id,
            service_id: event.service_id,
            timestamp: millis_to_datetime(event.timestamp),
            received_at: millis_to_datetime(event.received_at),
            level: event.level,
            method: event.method,
            path: event.path,
            status: event.status,
            duration: event.duration,
            environment: event.environment,
            request_id: event.request_id,
            message: event.message,
            session_id: event.session_id,
            ip_hash: None,
            user_agent: None,
            meta: event.meta,
        }
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub has_next: bool,
    pub next_cursor: Option<String>,
    /// Matching events ignoring the cursor
    pub total_estimate: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogPage {
    pub logs: Vec<LogView>,
    pub pagination: Pagination,
}

impl AnalyticsEngine {
    /// Newest first, ties broken by descending id. `limit` must be positive.
    pub async fn list_logs(
        &self,
        filters: &LogFilters,
        limit: u32,
        offset: u32,
    ) -> Result<LogPage, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM log_events", LOG_EVENT_COLUMNS));
        filters.push_where(&mut qb, true);
        qb.push(" ORDER BY timestamp DESC, id DESC LIMIT ")
            .push_bind(limit as i64)
            .push(" OFFSET ")
            .push_bind(offset as i64);

        let rows = qb.build_query_as::<LogEventRow>().fetch_all(self.pool()).await?;
        let events = rows
            .into_iter()
            .map(LogEvent::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let has_next = events.len() == limit as usize;
        let next_cursor = if has_next {
            events
                .last()
                .map(|last| Cursor::new(last.timestamp, last.id.to_string()).encode())
        } else {
            None
        };

        let total_estimate = self.count(filters).await?;

        Ok(LogPage {
            logs: events.into_iter().map(LogView::summary).collect(),
            pagination: Pagination {
                has_next,
                next_cursor,
                total_estimate,
            },
        })
    }

    /// Events matching `filters`, ignoring any cursor
    pub async fn count(&self, filters: &LogFilters) -> Result<i64, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM log_events");
        filters.push_where(&mut qb, false);
        Ok(qb.build_query_scalar::<i64>().fetch_one(self.pool()).await?)
    }

    /// Lookup by the store's full key
    pub async fn get_log(
        &self,
        service_id: Uuid,
        id: Uuid,
        timestamp: i64,
    ) -> Result<Option<LogView>, StoreError> {
        let row = sqlx::query_as::<_, LogEventRow>(&format!(
            "SELECT {} FROM log_events WHERE service_id = ? AND id = ? AND timestamp = ?",
            LOG_EVENT_COLUMNS
        ))
        .bind(service_id.to_string())
        .bind(id.to_string())
        .bind(timestamp)
        .fetch_optional(self.pool())
        .await?;

        row.map(LogEvent::try_from)
            .transpose()
            .map(|event| event.map(LogView::full))
    }
}
