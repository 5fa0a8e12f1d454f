//! Read-only analytics over stored events
//!
//! Every query is scoped to one service and composed from [`LogFilters`];
//! nothing here writes or locks.

pub mod breakdown;
pub mod cursor;
pub mod filters;
pub mod listing;
pub mod overview;
pub mod ranks;
pub mod stats;
pub mod timeseries;

use sqlx::SqlitePool;

pub use breakdown::{Breakdown, LevelGroup, StatusGroup, StatusGrouping};
pub use cursor::{Cursor, CursorError};
pub use filters::{Granularity, LogFilters, Period, TimeRange};
pub use listing::{LogPage, LogView, Pagination};
pub use overview::{Comparison, MetricChange, Overview};
pub use timeseries::{SeriesMetric, SeriesPoint, TimeSeries};

#[derive(Clone)]
pub struct AnalyticsEngine {
    pool: SqlitePool,
}

impl AnalyticsEngine {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
