pub mod analytics;
pub mod health;
pub mod ingest;
pub mod metrics_handler;

use arc_swap::ArcSwap;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::analytics::AnalyticsEngine;
use crate::config::Config;
use crate::ingest::RateLimiter;
use crate::queue::JobQueue;
use crate::store::ServiceDirectory;

/// Shared state of the HTTP API
#[derive(Clone)]
pub struct AppState {
    /// Live configuration, swapped on reload
    pub config: Arc<ArcSwap<Config>>,
    pub pool: SqlitePool,
    pub services: ServiceDirectory,
    pub rate_limiter: RateLimiter,
    pub queue: Arc<dyn JobQueue>,
    pub analytics: AnalyticsEngine,
}
