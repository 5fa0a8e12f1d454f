use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use std::time::Duration;
use uuid::Uuid;

use super::{
    FailOutcome, FailureKind, Job, JobQueue, NewJob, QueueCounts, QueueError, StalledJobs,
    STALLED_REASON,
};
use crate::config::QueueConfig;

/// Job queue stored in the shared SQLite database.
///
/// Every state transition is a single statement (or one transaction), so
/// concurrent producers and worker slots in any number of processes never
/// see a half-applied change.
#[derive(Clone)]
pub struct SqliteJobQueue {
    pool: SqlitePool,
    queue: String,
    keep_completed: u32,
    keep_failed: u32,
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    name: String,
    payload: String,
    attempts_made: i64,
    max_attempts: i64,
    lock_token: Option<String>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        // A payload that is not JSON is still delivered, and fails validation downstream
        let payload = serde_json::from_str(&row.payload).unwrap_or(Value::String(row.payload));
        Job {
            id: row.id,
            name: row.name,
            payload,
            attempts_made: row.attempts_made.max(0) as u32,
            max_attempts: row.max_attempts.max(1) as u32,
            lock_token: row.lock_token.unwrap_or_default(),
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl SqliteJobQueue {
    pub fn new(pool: SqlitePool, cfg: &QueueConfig) -> Self {
        Self {
            pool,
            queue: cfg.name.clone(),
            keep_completed: cfg.keep_completed,
            keep_failed: cfg.keep_failed,
        }
    }

    pub(crate) async fn reserve_at(&self, now: i64) -> Result<Option<Job>, QueueError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs SET state = 'active', locked_at = ?, lock_token = ?
            WHERE seq = (
                SELECT seq FROM jobs
                WHERE queue = ? AND state = 'waiting' AND available_at <= ?
                ORDER BY available_at, seq
                LIMIT 1
            )
            RETURNING id, name, payload, attempts_made, max_attempts, lock_token
            "#,
        )
        .bind(now)
        .bind(Uuid::new_v4().to_string())
        .bind(&self.queue)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Job::from))
    }

    pub(crate) async fn fail_at(
        &self,
        job: &Job,
        reason: &str,
        kind: FailureKind,
        now: i64,
    ) -> Result<FailOutcome, QueueError> {
        let attempts_made = job.attempts_made + 1;
        let backoff_ms: i64 = sqlx::query_scalar("SELECT backoff_ms FROM jobs WHERE id = ?")
            .bind(&job.id)
            .fetch_optional(&self.pool)
            .await?
            .unwrap_or(0);

        let outcome = if attempts_made >= job.max_attempts {
            FailOutcome::Exhausted { attempts_made }
        } else if kind == FailureKind::Unrecoverable {
            FailOutcome::Discarded { attempts_made }
        } else {
            let options = super::JobOptions {
                attempts: job.max_attempts,
                backoff: Duration::from_millis(backoff_ms.max(0) as u64),
            };
            FailOutcome::Retrying {
                attempts_made,
                delay: options.backoff_delay(attempts_made),
            }
        };

        let updated = match outcome {
            FailOutcome::Retrying { delay, .. } => {
                let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET state = 'waiting', attempts_made = ?, available_at = ?,
                        last_error = ?, locked_at = NULL, lock_token = NULL
                    WHERE id = ? AND state = 'active' AND lock_token = ?
                    "#,
                )
                .bind(attempts_made as i64)
                .bind(now.saturating_add(delay_ms))
                .bind(reason)
                .bind(&job.id)
                .bind(&job.lock_token)
                .execute(&self.pool)
                .await?
                .rows_affected()
            }
            _ => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET state = 'failed', attempts_made = ?, last_error = ?,
                        locked_at = NULL, lock_token = NULL, finished_at = ?
                    WHERE id = ? AND state = 'active' AND lock_token = ?
                    "#,
                )
                .bind(attempts_made as i64)
                .bind(reason)
                .bind(now)
                .bind(&job.id)
                .bind(&job.lock_token)
                .execute(&self.pool)
                .await?
                .rows_affected()
            }
        };

        if updated == 0 {
            tracing::warn!(job_id = %job.id, error = %reason, "Job lease lost, failure not recorded");
            return Ok(FailOutcome::LeaseLost);
        }

        if !matches!(outcome, FailOutcome::Retrying { .. }) {
            self.trim_state("failed", self.keep_failed).await?;
        }

        Ok(outcome)
    }

    pub(crate) async fn recover_stalled_at(
        &self,
        lock_timeout: Duration,
        now: i64,
    ) -> Result<StalledJobs, QueueError> {
        let cutoff = now.saturating_sub(i64::try_from(lock_timeout.as_millis()).unwrap_or(i64::MAX));
        let mut tx = self.pool.begin().await?;

        let exhausted = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET state = 'failed', attempts_made = attempts_made + 1, last_error = ?,
                locked_at = NULL, lock_token = NULL, finished_at = ?
            WHERE queue = ? AND state = 'active' AND locked_at <= ?
              AND attempts_made + 1 >= max_attempts
            RETURNING id, name, payload, attempts_made, max_attempts, lock_token
            "#,
        )
        .bind(STALLED_REASON)
        .bind(now)
        .bind(&self.queue)
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        // SET expressions read the pre-update attempts_made, so the delay is
        // backoff * 2^(attempts_made_after - 1) like an ordinary retry
        let retried = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'waiting', attempts_made = attempts_made + 1,
                available_at = ? + backoff_ms * (1 << MIN(attempts_made, 30)),
                last_error = ?, locked_at = NULL, lock_token = NULL
            WHERE queue = ? AND state = 'active' AND locked_at <= ?
            "#,
        )
        .bind(now)
        .bind(STALLED_REASON)
        .bind(&self.queue)
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        if !exhausted.is_empty() {
            self.trim_state("failed", self.keep_failed).await?;
        }

        Ok(StalledJobs {
            retried,
            exhausted: exhausted.into_iter().map(Job::from).collect(),
        })
    }

    async fn trim_state(&self, state: &str, keep: u32) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE queue = ? AND state = ? AND seq NOT IN (
                SELECT seq FROM jobs
                WHERE queue = ? AND state = ?
                ORDER BY finished_at DESC, seq DESC
                LIMIT ?
            )
            "#,
        )
        .bind(&self.queue)
        .bind(state)
        .bind(&self.queue)
        .bind(state)
        .bind(keep as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Last recorded error of a job, if it still exists
    #[cfg(test)]
    pub(crate) async fn last_error(&self, job_id: &str) -> Result<Option<String>, QueueError> {
        let error: Option<Option<String>> =
            sqlx::query_scalar("SELECT last_error FROM jobs WHERE id = ?")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(error.flatten())
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn add_bulk(&self, jobs: Vec<NewJob>) -> Result<Vec<String>, QueueError> {
        let now = now_ms();
        let mut ids = Vec::with_capacity(jobs.len());
        let mut tx = self.pool.begin().await?;

        for job in jobs {
            let id = Uuid::new_v4().to_string();
            let backoff_ms = i64::try_from(job.options.backoff.as_millis()).unwrap_or(i64::MAX);

            sqlx::query(
                r#"
                INSERT INTO jobs (
                    id, queue, name, payload, state, attempts_made, max_attempts,
                    backoff_ms, available_at, created_at
                ) VALUES (?, ?, ?, ?, 'waiting', 0, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&self.queue)
            .bind(&job.name)
            .bind(serde_json::to_string(&job.payload)?)
            .bind(job.options.attempts as i64)
            .bind(backoff_ms)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            ids.push(id);
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn reserve(&self) -> Result<Option<Job>, QueueError> {
        self.reserve_at(now_ms()).await
    }

    async fn complete(&self, job: &Job) -> Result<bool, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET state = 'completed', locked_at = NULL, lock_token = NULL, finished_at = ?
            WHERE id = ? AND state = 'active' AND lock_token = ?
            "#,
        )
        .bind(now_ms())
        .bind(&job.id)
        .bind(&job.lock_token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(job_id = %job.id, "Job lease lost, completion not recorded");
            return Ok(false);
        }

        self.trim_state("completed", self.keep_completed).await?;
        Ok(true)
    }

    async fn fail(&self, job: &Job, reason: &str, kind: FailureKind) -> Result<FailOutcome, QueueError> {
        self.fail_at(job, reason, kind, now_ms()).await
    }

    async fn recover_stalled(&self, lock_timeout: Duration) -> Result<StalledJobs, QueueError> {
        self.recover_stalled_at(lock_timeout, now_ms()).await
    }

    async fn trim_history(&self) -> Result<u64, QueueError> {
        let completed = self.trim_state("completed", self.keep_completed).await?;
        let failed = self.trim_state("failed", self.keep_failed).await?;
        Ok(completed + failed)
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM jobs WHERE queue = ? GROUP BY state")
                .bind(&self.queue)
                .fetch_all(&self.pool)
                .await?;

        let mut counts = QueueCounts::default();
        for (state, n) in rows {
            match state.as_str() {
                "waiting" => counts.waiting = n,
                "active" => counts.active = n,
                "completed" => counts.completed = n,
                "failed" => counts.failed = n,
                other => tracing::warn!(state = other, "Unknown job state"),
            }
        }
        Ok(counts)
    }
}
