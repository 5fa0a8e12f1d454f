//! Sliding-window rate limiting per ingestion credential
//!
//! A window is a set of uniquely keyed members, each scored with the time it
//! was added. A check prunes members older than the window, counts the rest,
//! and registers `cost` new members only if the total stays within the limit.
//! Prune, count and insert happen as one indivisible step in the counter store.

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("counter store unavailable: {0}")]
    Store(#[from] sqlx::Error),
    #[error("counter store inserted {inserted} members, expected {expected}")]
    PartialInsert { inserted: u64, expected: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Exceeded,
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// The two independent windows kept per credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    /// Request count, seconds scale
    Requests,
    /// Event count, minutes scale
    Events,
}

impl WindowKind {
    fn suffix(&self) -> &'static str {
        match self {
            Self::Requests => "sec",
            Self::Events => "min",
        }
    }
}

pub fn window_key(credential: &str, kind: WindowKind) -> String {
    format!("ingest-rate-limit:{}:{}", credential, kind.suffix())
}

/// Shared counter store with an atomic prune-count-insert operation
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn check_and_consume(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        cost: u64,
        now_ms: i64,
    ) -> Result<RateDecision, RateLimitError>;

    /// Drop members whose window has passed. Returns the number removed.
    async fn purge_expired(&self, now_ms: i64) -> Result<u64, RateLimitError>;
}

/// Counter store backed by the shared SQLite database
#[derive(Clone)]
pub struct SqliteCounterStore {
    pool: SqlitePool,
}

impl SqliteCounterStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CounterStore for SqliteCounterStore {
    async fn check_and_consume(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        cost: u64,
        now_ms: i64,
    ) -> Result<RateDecision, RateLimitError> {
        if cost == 0 {
            return Ok(RateDecision::Allowed);
        }
        if cost > limit {
            return Ok(RateDecision::Exceeded);
        }

        let window_ms = window.as_millis() as i64;
        let prefix = format!("{}-{}", now_ms, Uuid::new_v4().simple());

        // The DELETE takes the database write lock, so the conditional insert
        // below sees a count no concurrent checker can change before commit.
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM rate_window_members WHERE window_key = ? AND scored_at <= ?")
            .bind(key)
            .bind(now_ms - window_ms)
            .execute(&mut *tx)
            .await?;

        let inserted = sqlx::query(
            r#"
            WITH RECURSIVE seq(i) AS (
                SELECT 0
                UNION ALL
                SELECT i + 1 FROM seq WHERE i + 1 < ?
            )
            INSERT INTO rate_window_members (window_key, member, scored_at, expires_at)
            SELECT ?, ? || '-' || i, ?, ?
            FROM seq
            WHERE (SELECT COUNT(*) FROM rate_window_members WHERE window_key = ?) + ? <= ?
            "#,
        )
        .bind(cost as i64)
        .bind(key)
        .bind(&prefix)
        .bind(now_ms)
        .bind(now_ms + window_ms)
        .bind(key)
        .bind(cost as i64)
        .bind(limit as i64)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        match inserted {
            0 => Ok(RateDecision::Exceeded),
            n if n == cost => Ok(RateDecision::Allowed),
            n => Err(RateLimitError::PartialInsert {
                inserted: n,
                expected: cost,
            }),
        }
    }

    async fn purge_expired(&self, now_ms: i64) -> Result<u64, RateLimitError> {
        let result = sqlx::query("DELETE FROM rate_window_members WHERE expires_at <= ?")
            .bind(now_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// In-process counter store for single-instance deployments.
///
/// The dashmap entry guard holds the shard lock for the whole
/// prune-count-insert step.
#[derive(Default)]
pub struct MemoryCounterStore {
    windows: DashMap<String, MemoryWindow>,
}

#[derive(Default)]
struct MemoryWindow {
    window_ms: i64,
    members: VecDeque<i64>,
}

impl MemoryWindow {
    fn prune(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.window_ms;
        while self.members.front().is_some_and(|&ts| ts <= cutoff) {
            self.members.pop_front();
        }
    }
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn check_and_consume(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        cost: u64,
        now_ms: i64,
    ) -> Result<RateDecision, RateLimitError> {
        if cost == 0 {
            return Ok(RateDecision::Allowed);
        }

        let mut entry = self.windows.entry(key.to_string()).or_default();
        entry.window_ms = window.as_millis() as i64;
        entry.prune(now_ms);

        if entry.members.len() as u64 + cost > limit {
            return Ok(RateDecision::Exceeded);
        }

        entry.members.extend(std::iter::repeat(now_ms).take(cost as usize));
        Ok(RateDecision::Allowed)
    }

    async fn purge_expired(&self, now_ms: i64) -> Result<u64, RateLimitError> {
        let mut removed = 0u64;
        self.windows.retain(|_, window| {
            let before = window.members.len();
            window.prune(now_ms);
            removed += (before - window.members.len()) as u64;
            !window.members.is_empty()
        });
        Ok(removed)
    }
}

/// One limiting rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    pub limit: u64,
    pub window: Duration,
}

impl RatePolicy {
    pub fn new(limit: u64, window_ms: u64) -> Self {
        Self {
            limit,
            window: Duration::from_millis(window_ms),
        }
    }
}

/// Applies the request-rate and event-quota policies for a credential
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Consume `cost` units from the credential's window if the policy allows it.
    pub async fn check_and_consume(
        &self,
        credential: &str,
        kind: WindowKind,
        policy: RatePolicy,
        cost: u64,
    ) -> Result<RateDecision, RateLimitError> {
        self.check_and_consume_at(credential, kind, policy, cost, chrono::Utc::now().timestamp_millis())
            .await
    }

    pub async fn check_and_consume_at(
        &self,
        credential: &str,
        kind: WindowKind,
        policy: RatePolicy,
        cost: u64,
        now_ms: i64,
    ) -> Result<RateDecision, RateLimitError> {
        let key = window_key(credential, kind);
        let decision = self
            .store
            .check_and_consume(&key, policy.limit, policy.window, cost, now_ms)
            .await?;

        if !decision.is_allowed() {
            tracing::debug!(window = kind.suffix(), limit = policy.limit, cost, "Rate window exceeded");
        }
        Ok(decision)
    }
}
