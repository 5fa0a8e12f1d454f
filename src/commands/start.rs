use anyhow::Result;
use colored::Colorize;
use logr::{config, init_tracing, server};
use std::path::Path;
use tracing::info;

/// Execute the start command
///
/// Loads the configuration, initializes logging and serves until a shutdown
/// signal arrives.
pub async fn execute(config_path: &Path, with_worker: bool) -> Result<()> {
    let cfg = config::load_config_from(config_path)?;
    let _log_guard = init_tracing(&cfg.server);

    println!("{}", "Starting logr...".green());
    info!(config = %config_path.display(), with_worker, "Configuration loaded");

    server::start_server(cfg, config_path.to_path_buf(), with_worker).await
}
