//! Time ranges and the conjunctive filter shared by every analytics query

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};
use std::str::FromStr;
use uuid::Uuid;

use super::cursor::Cursor;
use crate::models::{HttpMethod, LogLevel};

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Named look-back window ending now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
}

impl Period {
    pub fn duration_ms(&self) -> i64 {
        match self {
            Self::Hour => HOUR_MS,
            Self::Day => DAY_MS,
            Self::Week => 7 * DAY_MS,
            Self::Month => 30 * DAY_MS,
        }
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(Self::Hour),
            "24h" => Ok(Self::Day),
            "7d" => Ok(Self::Week),
            "30d" => Ok(Self::Month),
            other => Err(format!("unknown period '{}', expected 1h, 24h, 7d or 30d", other)),
        }
    }
}

/// Width of a time series bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Minute,
    Hour,
    Day,
}

impl Granularity {
    pub fn bucket_ms(&self) -> i64 {
        match self {
            Self::Minute => MINUTE_MS,
            Self::Hour => HOUR_MS,
            Self::Day => DAY_MS,
        }
    }

    /// 1h → minute, 24h → hour, longer → day
    pub fn for_span(span_ms: i64) -> Self {
        if span_ms <= HOUR_MS {
            Self::Minute
        } else if span_ms <= DAY_MS {
            Self::Hour
        } else {
            Self::Day
        }
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minute" => Ok(Self::Minute),
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            other => Err(format!("unknown granularity '{}', expected minute, hour or day", other)),
        }
    }
}

/// Half-open interval `[start, end)` in epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    /// A named period wins; otherwise explicit bounds; otherwise the last 24h.
    /// An explicit `to` is inclusive.
    pub fn resolve(
        period: Option<Period>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        now_ms: i64,
    ) -> Self {
        if let Some(period) = period {
            return Self::ending_at(now_ms, period.duration_ms());
        }

        match (from, to) {
            (None, None) => Self::ending_at(now_ms, Period::Day.duration_ms()),
            (from, to) => {
                let end = to.map(|t| t.timestamp_millis() + 1).unwrap_or(now_ms + 1);
                let start = from
                    .map(|f| f.timestamp_millis())
                    .unwrap_or(end - Period::Day.duration_ms());
                Self { start, end }
            }
        }
    }

    fn ending_at(now_ms: i64, span_ms: i64) -> Self {
        let end = now_ms + 1;
        Self {
            start: end - span_ms,
            end,
        }
    }

    pub fn span_ms(&self) -> i64 {
        (self.end - self.start).max(0)
    }

    /// The window of equal length immediately before this one
    pub fn previous(&self) -> Self {
        Self {
            start: self.start - self.span_ms(),
            end: self.start,
        }
    }
}

/// Conjunctive predicate over one service's events
#[derive(Debug, Clone, PartialEq)]
pub struct LogFilters {
    pub service_id: Uuid,
    pub range: TimeRange,
    pub level: Option<LogLevel>,
    pub status: Option<u16>,
    pub environment: Option<String>,
    pub method: Option<HttpMethod>,
    /// Exact match, or a pattern where `*` matches any run of characters
    pub path: Option<String>,
    /// Case-insensitive substring of path or message
    pub search: Option<String>,
    pub cursor: Option<Cursor>,
}

impl LogFilters {
    pub fn new(service_id: Uuid, range: TimeRange) -> Self {
        Self {
            service_id,
            range,
            level: None,
            status: None,
            environment: None,
            method: None,
            path: None,
            search: None,
            cursor: None,
        }
    }

    pub fn with_range(&self, range: TimeRange) -> Self {
        Self {
            range,
            ..self.clone()
        }
    }

    /// Append ` WHERE ...` for these filters.
    pub fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>, include_cursor: bool) {
        qb.push(" WHERE service_id = ")
            .push_bind(self.service_id.to_string())
            .push(" AND timestamp >= ")
            .push_bind(self.range.start)
            .push(" AND timestamp < ")
            .push_bind(self.range.end);

        if let Some(level) = self.level {
            qb.push(" AND level = ").push_bind(level.as_str());
        }
        if let Some(status) = self.status {
            qb.push(" AND status = ").push_bind(status as i64);
        }
        if let Some(environment) = &self.environment {
            qb.push(" AND environment = ").push_bind(environment.clone());
        }
        if let Some(method) = self.method {
            qb.push(" AND method = ").push_bind(method.as_str());
        }
        if let Some(path) = &self.path {
            if path.contains('*') {
                qb.push(" AND path LIKE ")
                    .push_bind(wildcard_pattern(path))
                    .push(" ESCAPE '\\'");
            } else {
                qb.push(" AND path = ").push_bind(path.clone());
            }
        }
        if let Some(search) = &self.search {
            // Both sides Unicode-lowercased; LIKE alone folds ASCII only
            let pattern = format!("%{}%", escape_like(&search.to_lowercase()));
            qb.push(" AND (path_folded LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR message_folded LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }
        if include_cursor {
            if let Some(cursor) = &self.cursor {
                qb.push(" AND (timestamp < ")
                    .push_bind(cursor.timestamp)
                    .push(" OR (timestamp = ")
                    .push_bind(cursor.timestamp)
                    .push(" AND id < ")
                    .push_bind(cursor.id.clone())
                    .push("))");
            }
        }
    }
}

/// Escape LIKE metacharacters so they match literally.
pub fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// `/api/*/orders` → `/api/%/orders`, with literal `%` and `_` escaped first
pub fn wildcard_pattern(path: &str) -> String {
    escape_like(path).replace('*', "%")
}
