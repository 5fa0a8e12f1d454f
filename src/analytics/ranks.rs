//! Duration percentiles without loading whole groups
//!
//! SQLite numbers the rows of each group by duration and returns only the
//! ranks next to each requested percentile, so a query reads at most two
//! durations per percentile and group no matter how many events match.

use sqlx::{QueryBuilder, Sqlite};
use std::collections::BTreeMap;

use super::filters::LogFilters;
use super::stats::percentile_cont;
use super::AnalyticsEngine;
use crate::store::StoreError;

pub const P50: f64 = 0.50;
pub const P95: f64 = 0.95;
pub const P99: f64 = 0.99;

const PERCENTILES: [f64; 3] = [P50, P95, P99];

/// Durations of one group keyed by 1-based rank, plus the group size
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankedGroup {
    pub count: i64,
    pub by_rank: BTreeMap<i64, f64>,
}

impl RankedGroup {
    /// Continuous percentile, interpolated between the two closest ranks.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.count == 0 {
            return None;
        }

        let rank = p.clamp(0.0, 1.0) * (self.count - 1) as f64;
        let lower = rank.floor();
        let lower_rank = lower as i64 + 1;

        let low = *self.by_rank.get(&lower_rank)?;
        let high = self.by_rank.get(&(lower_rank + 1)).copied().unwrap_or(low);
        percentile_cont(&[low, high], rank - lower)
    }
}

/// Start of the epoch-aligned bucket holding `timestamp`, floored for either sign
pub fn push_bucket(qb: &mut QueryBuilder<'_, Sqlite>, bucket_ms: Option<i64>) {
    match bucket_ms {
        Some(b) => {
            qb.push("(timestamp - ((timestamp % ")
                .push_bind(b)
                .push(") + ")
                .push_bind(b)
                .push(") % ")
                .push_bind(b)
                .push(")");
        }
        None => {
            qb.push("0");
        }
    }
}

impl AnalyticsEngine {
    /// Rank rows around the p50/p95/p99 positions of each bucket.
    /// Without `bucket_ms` the whole filtered set is one group keyed `0`.
    pub(crate) async fn ranked_durations(
        &self,
        filters: &LogFilters,
        bucket_ms: Option<i64>,
    ) -> Result<BTreeMap<i64, RankedGroup>, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT bucket, rn, n, duration FROM (\
             SELECT bucket, duration, \
             ROW_NUMBER() OVER (PARTITION BY bucket ORDER BY duration) AS rn, \
             COUNT(*) OVER (PARTITION BY bucket) AS n \
             FROM (SELECT ",
        );
        push_bucket(&mut qb, bucket_ms);
        qb.push(" AS bucket, duration FROM log_events");
        filters.push_where(&mut qb, false);
        qb.push(")) WHERE ");

        // CAST truncates, which floors the non-negative rank
        for (i, p) in PERCENTILES.iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push("(rn BETWEEN CAST(")
                .push_bind(*p)
                .push(" * (n - 1) AS INTEGER) + 1 AND CAST(")
                .push_bind(*p)
                .push(" * (n - 1) AS INTEGER) + 2)");
        }

        let rows: Vec<(i64, i64, i64, f64)> = qb.build_query_as().fetch_all(self.pool()).await?;

        let mut groups: BTreeMap<i64, RankedGroup> = BTreeMap::new();
        for (bucket, rank, count, duration) in rows {
            let group = groups.entry(bucket).or_default();
            group.count = count;
            group.by_rank.insert(rank, duration);
        }
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use uuid::Uuid;

    fn full_group(sorted: &[f64]) -> RankedGroup {
        RankedGroup {
            count: sorted.len() as i64,
            by_rank: sorted.iter().enumerate().map(|(i, d)| (i as i64 + 1, *d)).collect(),
        }
    }

    #[test]
    fn test_percentile_matches_full_interpolation() {
        let sorted: Vec<f64> = (1..=37).map(|i| (i * i) as f64).collect();
        let group = full_group(&sorted);

        for p in [0.0, P50, P95, P99, 1.0] {
            let full = percentile_cont(&sorted, p).unwrap();
            assert!((group.percentile(p).unwrap() - full).abs() < 1e-9, "p = {}", p);
        }
        assert_eq!(RankedGroup::default().percentile(P50), None);
    }

    #[tokio::test]
    async fn test_only_neighbouring_ranks_are_fetched() {
        let svc = Uuid::new_v4();
        let events: Vec<_> = (0..200)
            .map(|i| event_at(svc, 1_000 + i, 200, (200 - i) as f64))
            .collect();
        let engine = engine_with(&events).await;

        let groups = engine.ranked_durations(&last_hour(svc), None).await.unwrap();
        let group = &groups[&0];
        assert_eq!(group.count, 200);
        assert!(group.by_rank.len() <= 6);

        let sorted: Vec<f64> = (1..=200).map(|d| d as f64).collect();
        for p in [P50, P95, P99] {
            let expected = percentile_cont(&sorted, p).unwrap();
            assert!((group.percentile(p).unwrap() - expected).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_buckets_floor_before_the_epoch() {
        let svc = Uuid::new_v4();
        let mut early = event_at(svc, 0, 200, 1.0);
        early.timestamp = -1;
        let engine = engine_with(&[early]).await;

        let mut filters = last_hour(svc);
        filters.range.start = -60_000;
        let groups = engine.ranked_durations(&filters, Some(60_000)).await.unwrap();
        assert_eq!(groups.keys().copied().collect::<Vec<_>>(), vec![-60_000]);
    }
}
