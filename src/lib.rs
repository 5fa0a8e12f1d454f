pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod maintenance;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod scrub;
pub mod server;
pub mod signals;
pub mod store;
pub mod worker;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

use crate::config::ServerConfig;

/// Initialize tracing/logging
///
/// `RUST_LOG` overrides the configured level. With `log_dir` set, JSON lines
/// are also written to a daily-rolling `logr.log` there; keep the returned
/// guard alive for the life of the process or buffered lines are lost.
///
/// Only the first call installs a subscriber; later calls are no-ops.
pub fn init_tracing(cfg: &ServerConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if cfg.log_format == "json" {
        layers.push(fmt::layer().json().with_target(true).boxed());
    } else {
        layers.push(fmt::layer().with_target(true).boxed());
    }

    let guard = cfg.log_dir.as_ref().map(|dir| {
        let appender = tracing_appender::rolling::daily(dir, "logr.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
        guard
    });

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init();

    guard
}
