//! Analytics API handlers
//!
//! Read-only views over one service's stored events:
//! - Overview with previous-period comparison
//! - Bucketed time series
//! - Status code and log level breakdowns
//! - Cursor-paginated listing and single-record lookup
//!
//! Every route is scoped by the `serviceId` path segment and answers 404 when
//! the service does not exist.

use axum::extract::{Path, Query, State};
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::str::FromStr;
use uuid::Uuid;

use super::AppState;
use crate::analytics::{
    Breakdown, Cursor, Granularity, LevelGroup, LogFilters, LogPage, LogView, Overview, Period,
    SeriesMetric, StatusGroup, StatusGrouping, TimeRange, TimeSeries,
};
use crate::error::AppError;
use crate::models::{HttpMethod, LogLevel};

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 100;

/// Query string shared by every analytics route. Values stay raw strings so
/// parse failures surface as our own 400 body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsQuery {
    pub period: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub environment: Option<String>,
    pub level: Option<String>,
    pub status: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub search: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub granularity: Option<String>,
    pub metrics: Option<String>,
    pub group_by: Option<String>,
    pub timestamp: Option<String>,
}

/// Blank query values count as absent
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_param<T>(name: &str, value: &Option<String>) -> Result<Option<T>, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    present(value)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| AppError::BadRequest(format!("invalid {}: {}", name, e)))
        })
        .transpose()
}

fn parse_datetime(name: &str, value: &Option<String>) -> Result<Option<DateTime<Utc>>, AppError> {
    present(value)
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| AppError::BadRequest(format!("invalid {}: {}", name, e)))
        })
        .transpose()
}

fn parse_uuid(name: &str, raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(format!("invalid {}: '{}'", name, raw)))
}

impl AnalyticsQuery {
    fn time_range(&self, now_ms: i64) -> Result<TimeRange, AppError> {
        let period = parse_param::<Period>("period", &self.period)?;
        let from = parse_datetime("from", &self.from)?;
        let to = parse_datetime("to", &self.to)?;

        if period.is_none() {
            if let (Some(from), Some(to)) = (from, to) {
                if from > to {
                    return Err(AppError::BadRequest("from must not be after to".to_string()));
                }
            }
        }

        Ok(TimeRange::resolve(period, from, to, now_ms))
    }

    /// Filters for `service_id` built from every filter parameter present.
    fn filters(&self, service_id: Uuid) -> Result<LogFilters, AppError> {
        let range = self.time_range(Utc::now().timestamp_millis())?;
        let mut filters = LogFilters::new(service_id, range);

        filters.level = parse_param::<LogLevel>("level", &self.level)?;
        filters.method = parse_param::<HttpMethod>("method", &self.method)?;
        filters.status = parse_param::<u16>("status", &self.status)?;
        filters.environment = present(&self.environment).map(str::to_string);
        filters.path = present(&self.path).map(str::to_string);
        filters.search = present(&self.search).map(str::to_string);

        if let Some(raw) = present(&self.cursor) {
            match Cursor::decode(raw) {
                Ok(cursor) => filters.cursor = Some(cursor),
                Err(e) => {
                    tracing::warn!(
                        service_id = %service_id,
                        error = %e,
                        "Ignoring malformed pagination cursor"
                    );
                }
            }
        }

        Ok(filters)
    }

    fn limit(&self) -> Result<u32, AppError> {
        match parse_param::<u32>("limit", &self.limit)? {
            None => Ok(DEFAULT_LIMIT),
            Some(limit) if (1..=MAX_LIMIT).contains(&limit) => Ok(limit),
            Some(limit) => Err(AppError::BadRequest(format!(
                "limit {} out of range 1-{}",
                limit, MAX_LIMIT
            ))),
        }
    }

    fn offset(&self) -> Result<u32, AppError> {
        Ok(parse_param::<u32>("offset", &self.offset)?.unwrap_or(0))
    }
}

/// Parse the path id and make sure the service exists.
async fn resolve_service(state: &AppState, raw: &str) -> Result<Uuid, AppError> {
    let service_id = parse_uuid("serviceId", raw)?;
    if !state.services.service_exists(service_id).await? {
        return Err(AppError::NotFound("Service not found".to_string()));
    }
    Ok(service_id)
}

/// GET /api/services/:serviceId/stats/overview
pub async fn overview(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<Overview>, AppError> {
    let service_id = resolve_service(&state, &service_id).await?;
    let filters = query.filters(service_id)?;
    Ok(Json(state.analytics.overview(&filters).await?))
}

/// GET /api/services/:serviceId/stats/timeseries
pub async fn timeseries(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<TimeSeries>, AppError> {
    let service_id = resolve_service(&state, &service_id).await?;
    let filters = query.filters(service_id)?;
    let granularity = parse_param::<Granularity>("granularity", &query.granularity)?;
    let metrics = SeriesMetric::parse_list(query.metrics.as_deref())
        .ok_or_else(|| AppError::InvalidMetrics(query.metrics.clone().unwrap_or_default()))?;

    Ok(Json(
        state
            .analytics
            .timeseries(&filters, granularity, &metrics)
            .await?,
    ))
}

/// GET /api/services/:serviceId/stats/status-breakdown
pub async fn status_breakdown(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<Breakdown<StatusGroup>>, AppError> {
    let service_id = resolve_service(&state, &service_id).await?;
    let filters = query.filters(service_id)?;
    let grouping = parse_param::<StatusGrouping>("groupBy", &query.group_by)?.unwrap_or_default();

    Ok(Json(state.analytics.status_breakdown(&filters, grouping).await?))
}

/// GET /api/services/:serviceId/stats/log-level-breakdown
pub async fn level_breakdown(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<Breakdown<LevelGroup>>, AppError> {
    let service_id = resolve_service(&state, &service_id).await?;
    let filters = query.filters(service_id)?;
    Ok(Json(state.analytics.level_breakdown(&filters).await?))
}

/// GET /api/services/:serviceId/logs
pub async fn list_logs(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<LogPage>, AppError> {
    let service_id = resolve_service(&state, &service_id).await?;
    let filters = query.filters(service_id)?;
    let limit = query.limit()?;
    let offset = query.offset()?;

    Ok(Json(state.analytics.list_logs(&filters, limit, offset).await?))
}

/// GET /api/services/:serviceId/logs/:logId?timestamp=<RFC3339>
///
/// Records are keyed by id and timestamp together, so both are required.
pub async fn get_log(
    State(state): State<AppState>,
    Path((service_id, log_id)): Path<(String, String)>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<LogView>, AppError> {
    let service_id = resolve_service(&state, &service_id).await?;
    let log_id = parse_uuid("logId", &log_id)?;
    let timestamp = parse_datetime("timestamp", &query.timestamp)?
        .ok_or_else(|| AppError::BadRequest("timestamp is required".to_string()))?;

    state
        .analytics
        .get_log(service_id, log_id, timestamp.timestamp_millis())
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Log not found".to_string()))
}
