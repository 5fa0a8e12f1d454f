//! Shared fixtures for the integration tests
#![allow(dead_code)]

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use logr::{
    analytics::AnalyticsEngine,
    config::{
        Config, CounterBackend, DatabaseConfig, IngestConfig, MaintenanceConfig, MetricsConfig,
        QueueConfig, RateLimitConfig, SecurityConfig, ServerConfig, WorkerConfig,
    },
    db,
    handlers::{ingest::TOKEN_HEADER, AppState},
    ingest::RateLimiter,
    queue::{JobQueue, SqliteJobQueue},
    server::{counter_store, create_router},
    store::{ServiceDirectory, SqliteLogStore},
    worker::{JobResult, Worker},
};
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TOKEN: &str = "0123456789abcdef0123456789abcdef";

pub fn test_config() -> Config {
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
            ip_hash_key: "integration-ip-key".to_string(),
        },
        ingest: IngestConfig::default(),
        rate_limit: RateLimitConfig {
            backend: CounterBackend::Sqlite,
            ..RateLimitConfig::default()
        },
        queue: QueueConfig::default(),
        worker: WorkerConfig::default(),
        metrics: MetricsConfig {
            enabled: false,
            endpoint: "/metrics".to_string(),
        },
        maintenance: MaintenanceConfig::default(),
    }
}

/// A router over an in-memory database with one registered service
pub struct TestApp {
    pub router: Router,
    pub pool: SqlitePool,
    pub queue: Arc<SqliteJobQueue>,
    pub service_id: Uuid,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let pool = db::connect(&config.database).await.unwrap();
        let services = ServiceDirectory::new(pool.clone());
        let service = services.create_service("Checkout API").await.unwrap();
        services
            .register_token(service.id, "default", TOKEN)
            .await
            .unwrap();

        let queue = Arc::new(SqliteJobQueue::new(pool.clone(), &config.queue));
        let state = AppState {
            config: Arc::new(ArcSwap::from_pointee(config.clone())),
            pool: pool.clone(),
            services,
            rate_limiter: RateLimiter::new(counter_store(&config, &pool)),
            queue: queue.clone(),
            analytics: AnalyticsEngine::new(pool.clone()),
        };

        Self {
            router: create_router(state, None, &config),
            pool,
            queue,
            service_id: service.id,
        }
    }

    pub async fn ingest(&self, body: &Value) -> Response<Body> {
        self.ingest_raw(TOKEN, body.to_string()).await
    }

    pub async fn ingest_raw(&self, token: &str, body: String) -> Response<Body> {
        let request = Request::builder()
            .method("POST")
            .uri("/v1/ingest")
            .header("content-type", "application/json")
            .header(TOKEN_HEADER, token)
            .body(Body::from(body))
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Process every queued job on the calling task
    pub async fn drain_queue(&self) -> Vec<JobResult> {
        let worker = Worker::new(
            self.queue.clone(),
            Arc::new(SqliteLogStore::new(self.pool.clone())),
            &WorkerConfig::default(),
        );

        let mut results = Vec::new();
        while let Some(job) = self.queue.reserve().await.unwrap() {
            results.push(worker.handle_job(job).await);
        }
        results
    }
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// A valid record `ago_ms` before now
pub fn record(ago_ms: i64, status: u16, duration: f64) -> Value {
    serde_json::json!({
        "timestamp": chrono::Utc::now().timestamp_millis() - ago_ms,
        "environment": "production",
        "method": "GET",
        "path": "/api/orders",
        "status": status,
        "duration": duration,
    })
}
