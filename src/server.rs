use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::SqlitePool;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    analytics::AnalyticsEngine,
    config::{Config, CounterBackend},
    db,
    handlers::{self, AppState},
    ingest::{CounterStore, MemoryCounterStore, RateLimiter, SqliteCounterStore},
    maintenance::{spawn_maintenance_task, Maintenance},
    queue::{JobQueue, SqliteJobQueue},
    signals::setup_signal_handlers,
    store::{ServiceDirectory, SqliteLogStore},
    worker::Worker,
};

/// Body limit applied by the router; the ingest handler enforces the
/// configured cap itself so that it can be reloaded.
const ROUTER_BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Start the HTTP API
///
/// This function:
/// 1. Opens the database and applies migrations
/// 2. Sets up signal handlers for graceful shutdown and config reload
/// 3. Starts the maintenance task and, with `with_worker`, an embedded worker pool
/// 4. Serves requests until shutdown, then waits for background tasks
pub async fn start_server(config: Config, config_path: PathBuf, with_worker: bool) -> Result<()> {
    info!("logr starting...");

    let pool = db::connect(&config.database).await?;
    let config_swap = Arc::new(ArcSwap::from_pointee(config.clone()));

    let counters = counter_store(&config, &pool);
    let queue: Arc<dyn JobQueue> = Arc::new(SqliteJobQueue::new(pool.clone(), &config.queue));

    let (shutdown_tx, signal_handle) = setup_signal_handlers(config_swap.clone(), config_path)?;
    let mut shutdown_rx = shutdown_tx.subscribe();

    let metrics_handle = if config.metrics.enabled {
        Some(crate::metrics::init_metrics()?)
    } else {
        info!("Metrics disabled");
        None
    };

    let maintenance = Maintenance::new(
        counters.clone(),
        queue.clone(),
        Arc::new(SqliteLogStore::new(pool.clone())),
        config.queue.stalled_after(),
    );
    let maintenance_handle = spawn_maintenance_task(
        maintenance,
        std::time::Duration::from_secs(config.maintenance.interval_secs),
        shutdown_tx.subscribe(),
    );

    let worker_handle = if with_worker {
        let store = Arc::new(SqliteLogStore::new(pool.clone()));
        let worker = Worker::new(queue.clone(), store, &config.worker);
        let tx = shutdown_tx.clone();
        Some(tokio::spawn(worker.run(tx)))
    } else {
        None
    };

    let state = AppState {
        config: config_swap.clone(),
        pool: pool.clone(),
        services: ServiceDirectory::new(pool.clone()),
        rate_limiter: RateLimiter::new(counters),
        queue,
        analytics: AnalyticsEngine::new(pool.clone()),
    };

    let app = create_router(state, metrics_handle, &config);

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .with_context(|| format!("Invalid server.host '{}'", config.server.host))?,
        config.server.port,
    ));

    info!(
        "Starting logr on {} (queue '{}', rate-limit backend {:?}, embedded worker: {})",
        addr, config.queue.name, config.rate_limit.backend, with_worker
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
        info!("Shutdown signal received, draining connections...");
    })
    .await?;

    if let Some(handle) = worker_handle {
        handle.await?;
    }
    maintenance_handle.await?;
    signal_handle.await?;
    pool.close().await;
    info!("Server stopped gracefully");

    Ok(())
}

/// Pick the counter store named by `rate_limit.backend`
pub fn counter_store(config: &Config, pool: &SqlitePool) -> Arc<dyn CounterStore> {
    match config.rate_limit.backend {
        CounterBackend::Sqlite => Arc::new(SqliteCounterStore::new(pool.clone())),
        CounterBackend::Memory => {
            info!("Using in-process rate-limit counters; limits are not shared across instances");
            Arc::new(MemoryCounterStore::new())
        }
    }
}

/// Create the Axum router with all routes and middleware
pub fn create_router(state: AppState, metrics: Option<PrometheusHandle>, config: &Config) -> Router {
    let api = Router::new()
        .route("/v1/ingest", post(handlers::ingest::ingest))
        .route(
            "/api/services/:serviceId/stats/overview",
            get(handlers::analytics::overview),
        )
        .route(
            "/api/services/:serviceId/stats/timeseries",
            get(handlers::analytics::timeseries),
        )
        .route(
            "/api/services/:serviceId/stats/status-breakdown",
            get(handlers::analytics::status_breakdown),
        )
        .route(
            "/api/services/:serviceId/stats/log-level-breakdown",
            get(handlers::analytics::level_breakdown),
        )
        .route("/api/services/:serviceId/logs", get(handlers::analytics::list_logs))
        .route(
            "/api/services/:serviceId/logs/:logId",
            get(handlers::analytics::get_log),
        )
        .route("/ready", get(handlers::health::readiness_check))
        .with_state(state);

    let mut app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(api);

    if let Some(handle) = metrics {
        let metrics_routes = Router::new()
            .route(&config.metrics.endpoint, get(handlers::metrics_handler::metrics))
            .with_state(Arc::new(handle));
        app = app.merge(metrics_routes);
    }

    let app = app
        .layer(DefaultBodyLimit::max(ROUTER_BODY_LIMIT))
        .layer(TraceLayer::new_for_http());

    if config.server.enable_cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}
