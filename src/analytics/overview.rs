use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite};

use super::filters::LogFilters;
use super::ranks::{P50, P95, P99};
use super::stats::{pct_change, percentage};
use super::AnalyticsEngine;
use crate::store::StoreError;

/// Headline numbers for a service over a time range
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_requests: i64,
    pub error_count: i64,
    pub error_rate: f64,
    pub avg_duration: f64,
    pub p50_duration: f64,
    pub p95_duration: f64,
    pub p99_duration: f64,
    /// Absent when the current range holds no events
    pub comparison: Option<Comparison>,
}

/// Change against the preceding range of equal length
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    pub total_requests: MetricChange,
    pub error_rate: MetricChange,
    pub avg_duration: MetricChange,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricChange {
    pub current: f64,
    pub previous: f64,
    /// Percent; null when `previous` is zero
    pub change: Option<f64>,
}

impl MetricChange {
    fn new(current: f64, previous: f64) -> Self {
        Self {
            current,
            previous,
            change: pct_change(current, previous),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, sqlx::FromRow)]
struct SummaryRow {
    total: i64,
    errors: i64,
    avg_duration: f64,
}

impl SummaryRow {
    fn error_rate(&self) -> f64 {
        percentage(self.errors, self.total)
    }
}

impl AnalyticsEngine {
    pub async fn overview(&self, filters: &LogFilters) -> Result<Overview, StoreError> {
        let current = self.summarize(filters).await?;
        if current.total == 0 {
            return Ok(Overview::default());
        }

        let ranked = self.ranked_durations(filters, None).await?.remove(&0).unwrap_or_default();
        let percentile = |p| ranked.percentile(p).unwrap_or(0.0);

        let previous = self.summarize(&filters.with_range(filters.range.previous())).await?;

        Ok(Overview {
            total_requests: current.total,
            error_count: current.errors,
            error_rate: current.error_rate(),
            avg_duration: current.avg_duration,
            p50_duration: percentile(P50),
            p95_duration: percentile(P95),
            p99_duration: percentile(P99),
            comparison: Some(Comparison {
                total_requests: MetricChange::new(current.total as f64, previous.total as f64),
                error_rate: MetricChange::new(current.error_rate(), previous.error_rate()),
                avg_duration: MetricChange::new(current.avg_duration, previous.avg_duration),
            }),
        })
    }

    async fn summarize(&self, filters: &LogFilters) -> Result<SummaryRow, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) AS total, \
             COALESCE(SUM(CASE WHEN status >= 400 THEN 1 ELSE 0 END), 0) AS errors, \
             COALESCE(AVG(duration), 0.0) AS avg_duration \
             FROM log_events",
        );
        filters.push_where(&mut qb, false);

        Ok(qb.build_query_as::<SummaryRow>().fetch_one(self.pool()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use uuid::Uuid;

    const MIN: i64 = 60_000;

    #[tokio::test]
    async fn test_zero_events_yield_default() {
        let engine = engine_with(&[]).await;
        let overview = engine.overview(&last_hour(Uuid::new_v4())).await.unwrap();

        assert_eq!(overview, Overview::default());
        let json = serde_json::to_value(&overview).unwrap();
        assert_eq!(json["totalRequests"], 0);
        assert!(json["comparison"].is_null());
    }

    #[tokio::test]
    async fn test_overview_with_comparison() {
        let svc = Uuid::new_v4();
        let events = vec![
            // current hour
            event_at(svc, MIN, 200, 10.0),
            event_at(svc, 2 * MIN, 200, 20.0),
            event_at(svc, 3 * MIN, 500, 30.0),
            event_at(svc, 4 * MIN, 404, 40.0),
            // previous hour
            event_at(svc, 61 * MIN, 200, 10.0),
            event_at(svc, 62 * MIN, 500, 10.0),
            // other service
            event_at(Uuid::new_v4(), MIN, 500, 999.0),
        ];
        let engine = engine_with(&events).await;

        let overview = engine.overview(&last_hour(svc)).await.unwrap();
        assert_eq!(overview.total_requests, 4);
        assert_eq!(overview.error_count, 2);
        assert_eq!(overview.error_rate, 50.0);
        assert_eq!(overview.avg_duration, 25.0);
        assert_eq!(overview.p50_duration, 25.0);
        // rank 0.95 * 3 = 2.85 between 30 and 40
        assert!((overview.p95_duration - 38.5).abs() < 1e-9);

        let comparison = overview.comparison.unwrap();
        assert_eq!(comparison.total_requests.previous, 2.0);
        assert_eq!(comparison.total_requests.change, Some(100.0));
        assert_eq!(comparison.error_rate.change, Some(0.0));
        assert_eq!(comparison.avg_duration.change, Some(150.0));
    }

    #[tokio::test]
    async fn test_empty_previous_period_has_null_change() {
        let svc = Uuid::new_v4();
        let engine = engine_with(&[event_at(svc, MIN, 200, 5.0)]).await;

        let comparison = engine.overview(&last_hour(svc)).await.unwrap().comparison.unwrap();
        assert_eq!(comparison.total_requests.previous, 0.0);
        assert_eq!(comparison.total_requests.change, None);
    }

    #[tokio::test]
    async fn test_environment_filter_applies() {
        let svc = Uuid::new_v4();
        let mut staging = event_at(svc, MIN, 200, 5.0);
        staging.environment = "staging".to_string();
        let engine = engine_with(&[staging, event_at(svc, 2 * MIN, 200, 5.0)]).await;

        let mut filters = last_hour(svc);
        filters.environment = Some("staging".to_string());
        assert_eq!(engine.overview(&filters).await.unwrap().total_requests, 1);
    }
}
