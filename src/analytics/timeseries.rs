use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::BTreeMap;

use super::filters::{Granularity, LogFilters};
use super::ranks::{push_bucket, RankedGroup, P50, P95, P99};
use super::AnalyticsEngine;
use crate::store::StoreError;

/// Per-bucket value a caller can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesMetric {
    Requests,
    Errors,
    AvgDuration,
    P50Duration,
    P95Duration,
    P99Duration,
}

impl SeriesMetric {
    pub const ALL: [SeriesMetric; 6] = [
        Self::Requests,
        Self::Errors,
        Self::AvgDuration,
        Self::P50Duration,
        Self::P95Duration,
        Self::P99Duration,
    ];

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "requests" => Some(Self::Requests),
            "errors" => Some(Self::Errors),
            "avg_duration" => Some(Self::AvgDuration),
            "p50_duration" => Some(Self::P50Duration),
            "p95_duration" => Some(Self::P95Duration),
            "p99_duration" => Some(Self::P99Duration),
            _ => None,
        }
    }

    /// Comma-separated selection; absent or blank means all. Unknown names
    /// are skipped, and `None` is returned when nothing valid remains.
    pub fn parse_list(raw: Option<&str>) -> Option<Vec<Self>> {
        let raw = match raw.map(str::trim) {
            None | Some("") => return Some(Self::ALL.to_vec()),
            Some(raw) => raw,
        };

        let mut selected: Vec<Self> = Vec::new();
        for metric in raw.split(',').filter_map(|name| Self::from_name(name.trim())) {
            if !selected.contains(&metric) {
                selected.push(metric);
            }
        }

        if selected.is_empty() {
            None
        } else {
            Some(selected)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p50_duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p95_duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p99_duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeries {
    pub granularity: Granularity,
    pub data: Vec<SeriesPoint>,
}

#[derive(Debug, sqlx::FromRow)]
struct BucketRow {
    bucket: i64,
    requests: i64,
    errors: i64,
    avg_duration: f64,
}

impl BucketRow {
    fn into_point(self, ranked: Option<&RankedGroup>, metrics: &[SeriesMetric]) -> Option<SeriesPoint> {
        let mut point = SeriesPoint {
            timestamp: DateTime::from_timestamp_millis(self.bucket)?,
            requests: None,
            errors: None,
            avg_duration: None,
            p50_duration: None,
            p95_duration: None,
            p99_duration: None,
        };
        let percentile = |p| ranked.and_then(|group| group.percentile(p));

        for metric in metrics {
            match metric {
                SeriesMetric::Requests => point.requests = Some(self.requests),
                SeriesMetric::Errors => point.errors = Some(self.errors),
                SeriesMetric::AvgDuration => point.avg_duration = Some(self.avg_duration),
                SeriesMetric::P50Duration => point.p50_duration = percentile(P50),
                SeriesMetric::P95Duration => point.p95_duration = percentile(P95),
                SeriesMetric::P99Duration => point.p99_duration = percentile(P99),
            }
        }

        Some(point)
    }
}

impl SeriesMetric {
    fn is_percentile(&self) -> bool {
        matches!(self, Self::P50Duration | Self::P95Duration | Self::P99Duration)
    }
}

impl AnalyticsEngine {
    /// Epoch-aligned UTC buckets, ascending; empty buckets are omitted.
    pub async fn timeseries(
        &self,
        filters: &LogFilters,
        granularity: Option<Granularity>,
        metrics: &[SeriesMetric],
    ) -> Result<TimeSeries, StoreError> {
        let granularity = granularity.unwrap_or_else(|| Granularity::for_span(filters.range.span_ms()));
        let bucket_ms = granularity.bucket_ms();

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT ");
        push_bucket(&mut qb, Some(bucket_ms));
        qb.push(
            " AS bucket, COUNT(*) AS requests, \
             COALESCE(SUM(CASE WHEN status >= 400 THEN 1 ELSE 0 END), 0) AS errors, \
             COALESCE(AVG(duration), 0.0) AS avg_duration \
             FROM log_events",
        );
        filters.push_where(&mut qb, false);
        qb.push(" GROUP BY bucket ORDER BY bucket");

        let rows = qb.build_query_as::<BucketRow>().fetch_all(self.pool()).await?;

        let ranked: BTreeMap<i64, RankedGroup> = if metrics.iter().any(SeriesMetric::is_percentile) {
            self.ranked_durations(filters, Some(bucket_ms)).await?
        } else {
            BTreeMap::new()
        };

        let data = rows
            .into_iter()
            .filter_map(|row| {
                let group = ranked.get(&row.bucket);
                row.into_point(group, metrics)
            })
            .collect();

        Ok(TimeSeries { granularity, data })
    }
}
