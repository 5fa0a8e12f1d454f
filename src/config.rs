use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Optional directory for daily-rolling log files (in addition to stdout)
    #[serde(default)]
    pub log_dir: Option<String>,
    /// Allow cross-origin requests to the analytics routes
    #[serde(default)]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            log_dir: None,
            enable_cors: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecurityConfig {
    /// HMAC key used to derive `ipHash` from the client address
    pub ip_hash_key: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_max_event_bytes")]
    pub max_event_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: default_max_body_bytes(),
            max_batch_size: default_max_batch_size(),
            max_event_bytes: default_max_event_bytes(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CounterBackend {
    /// Shared SQLite tables, safe across processes
    Sqlite,
    /// In-process map, single instance only
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_counter_backend")]
    pub backend: CounterBackend,
    #[serde(default = "default_request_limit")]
    pub request_limit: u64,
    #[serde(default = "default_request_window_ms")]
    pub request_window_ms: u64,
    #[serde(default = "default_event_limit")]
    pub event_limit: u64,
    #[serde(default = "default_event_window_ms")]
    pub event_window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backend: default_counter_backend(),
            request_limit: default_request_limit(),
            request_window_ms: default_request_window_ms(),
            event_limit: default_event_limit(),
            event_window_ms: default_event_window_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_name")]
    pub name: String,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_keep_completed")]
    pub keep_completed: u32,
    #[serde(default = "default_keep_failed")]
    pub keep_failed: u32,
    #[serde(default = "default_stalled_after_secs")]
    pub stalled_after_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            attempts: default_attempts(),
            backoff_ms: default_backoff_ms(),
            keep_completed: default_keep_completed(),
            keep_failed: default_keep_failed(),
            stalled_after_secs: default_stalled_after_secs(),
        }
    }
}

impl QueueConfig {
    pub fn stalled_after(&self) -> Duration {
        Duration::from_secs(self.stalled_after_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_endpoint")]
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            endpoint: default_metrics_endpoint(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_maintenance_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_maintenance_interval_secs(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://./data/logr.db".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_max_body_bytes() -> usize {
    256 * 1024
}

fn default_max_batch_size() -> usize {
    100
}

fn default_max_event_bytes() -> usize {
    32 * 1024
}

fn default_counter_backend() -> CounterBackend {
    CounterBackend::Sqlite
}

fn default_request_limit() -> u64 {
    100
}

fn default_request_window_ms() -> u64 {
    1_000
}

fn default_event_limit() -> u64 {
    10_000
}

fn default_event_window_ms() -> u64 {
    60_000
}

fn default_queue_name() -> String {
    "log-events".to_string()
}

fn default_attempts() -> u32 {
    5
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_keep_completed() -> u32 {
    1000
}

fn default_keep_failed() -> u32 {
    2000
}

fn default_stalled_after_secs() -> u64 {
    300
}

fn default_concurrency() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_endpoint() -> String {
    "/metrics".to_string()
}

fn default_maintenance_interval_secs() -> u64 {
    60
}

/// Load configuration from `config.toml` (or `config.*`) in the working
/// directory plus `LOGR__*` environment overrides.
pub fn load_config() -> anyhow::Result<Config> {
    load_config_from(Path::new("config"))
}

/// Load configuration from an explicit file path plus environment overrides.
pub fn load_config_from(path: &Path) -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::from(path.to_path_buf()).required(false))
        .add_source(config::Environment::with_prefix("LOGR").separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.security.ip_hash_key.trim().is_empty() {
        anyhow::bail!("security.ip_hash_key must be set");
    }

    if cfg.database.url.is_empty() {
        anyhow::bail!("database.url cannot be empty");
    }
    if cfg.database.max_connections == 0 {
        anyhow::bail!("database.max_connections must be at least 1");
    }

    match cfg.server.log_format.as_str() {
        "json" | "pretty" => {}
        other => anyhow::bail!("server.log_format must be 'json' or 'pretty', got '{}'", other),
    }

    if cfg.ingest.max_batch_size == 0 {
        anyhow::bail!("ingest.max_batch_size must be at least 1");
    }
    if cfg.ingest.max_event_bytes > cfg.ingest.max_body_bytes {
        anyhow::bail!("ingest.max_event_bytes cannot exceed ingest.max_body_bytes");
    }

    let rl = &cfg.rate_limit;
    if rl.request_limit == 0 || rl.event_limit == 0 {
        anyhow::bail!("rate_limit limits must be greater than zero");
    }
    if rl.request_window_ms == 0 || rl.event_window_ms == 0 {
        anyhow::bail!("rate_limit windows must be greater than zero");
    }

    if cfg.queue.name.is_empty() {
        anyhow::bail!("queue.name cannot be empty");
    }
    if cfg.queue.attempts == 0 {
        anyhow::bail!("queue.attempts must be at least 1");
    }
    // 2^30 * backoff would overflow long before it is useful
    if cfg.queue.attempts > 30 {
        anyhow::bail!("queue.attempts cannot exceed 30");
    }

    if cfg.worker.concurrency == 0 {
        anyhow::bail!("worker.concurrency must be at least 1");
    }

    if cfg.metrics.enabled && !cfg.metrics.endpoint.starts_with('/') {
        anyhow::bail!("metrics.endpoint must start with '/'");
    }

    if cfg.maintenance.interval_secs == 0 {
        anyhow::bail!("maintenance.interval_secs must be at least 1");
    }

    Ok(())
}

#[cfg(test)]
pub(crate) fn create_test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            log_level: "debug".to_string(),
            log_format: "pretty".to_string(),
            log_dir: None,
            enable_cors: false,
        },
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            busy_timeout_ms: 5000,
        },
        security: SecurityConfig {
            ip_hash_key: "test-ip-hash-key".to_string(),
        },
        ingest: IngestConfig::default(),
        rate_limit: RateLimitConfig::default(),
        queue: QueueConfig::default(),
        worker: WorkerConfig::default(),
        metrics: MetricsConfig::default(),
        maintenance: MaintenanceConfig::default(),
    }
}
