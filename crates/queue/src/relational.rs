//! C4 — relational `QueueDriver` over a single `jobs` table (§4.4.3).
//!
//! `pop` is the three-step transaction from §4.4.3: sweep expired
//! leases, select the next ready row ordered by `priority DESC,
//! available_at ASC`, then reserve it. Uses `FOR UPDATE SKIP LOCKED` so
//! concurrent pops never contend on the same row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glueful_core::Result;
use serde_json::json;
use sqlx::{FromRow, PgPool, QueryBuilder};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::traits::QueueDriver;
use crate::types::{BulkItem, HealthCheck, Job, QueueStats, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT_SECS};

pub struct RelationalQueueDriver {
    pool: PgPool,
    retry_after_secs: i64,
}

#[derive(FromRow)]
struct JobRow {
    uuid: Uuid,
    queue: String,
    payload: serde_json::Value,
    attempts: i32,
    reserved_at: Option<DateTime<Utc>>,
    available_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    priority: i32,
    batch_uuid: Option<Uuid>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        let handler = row
            .payload
            .get("job")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let data = row.payload.get("data").cloned().unwrap_or(serde_json::Value::Null);
        let max_attempts = row
            .payload
            .get("maxAttempts")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);
        let timeout_secs = row
            .payload
            .get("timeout")
            .and_then(|v| v.as_i64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Job {
            uuid: row.uuid,
            queue: row.queue,
            handler,
            data,
            attempts: row.attempts,
            max_attempts,
            timeout_secs,
            priority: row.priority,
            reserved_at: row.reserved_at,
            available_at: row.available_at,
            batch_uuid: row.batch_uuid,
            created_at: row.created_at,
        }
    }
}

fn envelope(job_uuid: Uuid, handler: &str, data: &serde_json::Value, max_attempts: i32, timeout_secs: i64, queue: &str, batch_uuid: Option<Uuid>) -> serde_json::Value {
    json!({
        "uuid": job_uuid,
        "job": handler,
        "data": data,
        "maxAttempts": max_attempts,
        "timeout": timeout_secs,
        "queue": queue,
        "pushedAt": Utc::now().timestamp(),
        "batchUuid": batch_uuid,
    })
}

impl RelationalQueueDriver {
    pub fn new(pool: PgPool, retry_after_secs: i64) -> Self {
        Self {
            pool,
            retry_after_secs,
        }
    }

    async fn insert(&self, handler: &str, data: serde_json::Value, queue: &str, priority: i32, available_at: DateTime<Utc>) -> Result<Uuid> {
        let job_uuid = Uuid::new_v4();
        let payload = envelope(job_uuid, handler, &data, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT_SECS, queue, None);

        sqlx::query(
            "INSERT INTO jobs (uuid, queue, payload, attempts, reserved_at, available_at, created_at, priority, batch_uuid) \
             VALUES ($1, $2, $3, 0, NULL, $4, $5, $6, NULL)",
        )
        .bind(job_uuid)
        .bind(queue)
        .bind(&payload)
        .bind(available_at)
        .bind(Utc::now())
        .bind(priority)
        .execute(&self.pool)
        .await?;

        Ok(job_uuid)
    }
}

#[async_trait]
impl QueueDriver for RelationalQueueDriver {
    #[instrument(skip(self, payload))]
    async fn push(&self, handler: &str, payload: serde_json::Value, queue: &str, priority: i32) -> Result<Uuid> {
        let uuid = self.insert(handler, payload, queue, priority, Utc::now()).await?;
        debug!(%uuid, queue, "pushed job");
        Ok(uuid)
    }

    async fn later(&self, delay_secs: i64, handler: &str, payload: serde_json::Value, queue: &str, priority: i32) -> Result<Uuid> {
        let available_at = Utc::now() + chrono::Duration::seconds(delay_secs);
        self.insert(handler, payload, queue, priority, available_at).await
    }

    async fn bulk(&self, items: &[BulkItem], queue: &str) -> Result<Vec<Uuid>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let pushed_at = Utc::now();
        let rows: Vec<(Uuid, DateTime<Utc>, serde_json::Value, i32)> = items
            .iter()
            .map(|item| {
                let job_uuid = Uuid::new_v4();
                let available_at = item
                    .delay_secs
                    .map(|d| pushed_at + chrono::Duration::seconds(d))
                    .unwrap_or(pushed_at);
                let payload = envelope(job_uuid, &item.handler, &item.data, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT_SECS, queue, None);
                (job_uuid, available_at, payload, item.priority)
            })
            .collect();

        let mut builder = QueryBuilder::new(
            "INSERT INTO jobs (uuid, queue, payload, attempts, reserved_at, available_at, created_at, priority, batch_uuid) ",
        );
        builder.push_values(&rows, |mut row, (job_uuid, available_at, payload, priority)| {
            row.push_bind(*job_uuid)
                .push_bind(queue)
                .push_bind(payload.clone())
                .push_bind(0i32)
                .push_bind(Option::<DateTime<Utc>>::None)
                .push_bind(*available_at)
                .push_bind(pushed_at)
                .push_bind(*priority)
                .push_bind(Option::<Uuid>::None);
        });

        builder.build().execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(rows.into_iter().map(|(uuid, ..)| uuid).collect())
    }

    #[instrument(skip(self))]
    async fn pop(&self, queue: &str) -> Result<Option<Job>> {
        let mut tx = self.pool.begin().await?;
        let lease_cutoff = Utc::now() - chrono::Duration::seconds(self.retry_after_secs);

        let swept = sqlx::query(
            "UPDATE jobs SET reserved_at = NULL WHERE queue = $1 AND reserved_at IS NOT NULL AND reserved_at < $2",
        )
        .bind(queue)
        .bind(lease_cutoff)
        .execute(&mut *tx)
        .await?;
        if swept.rows_affected() > 0 {
            warn!(queue, count = swept.rows_affected(), "swept expired job leases");
        }

        let now = Utc::now();
        let Some(row) = sqlx::query_as::<_, JobRow>(
            "SELECT uuid, queue, payload, attempts, reserved_at, available_at, created_at, priority, batch_uuid \
             FROM jobs WHERE queue = $1 AND reserved_at IS NULL AND available_at <= $2 \
             ORDER BY priority DESC, available_at ASC LIMIT 1 FOR UPDATE SKIP LOCKED",
        )
        .bind(queue)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?
        else {
            tx.commit().await?;
            return Ok(None);
        };

        sqlx::query("UPDATE jobs SET reserved_at = $1, attempts = attempts + 1 WHERE uuid = $2")
            .bind(now)
            .bind(row.uuid)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let mut job: Job = row.into();
        job.reserved_at = Some(now);
        job.attempts += 1;
        debug!(uuid = %job.uuid, queue, attempts = job.attempts, "popped job");
        Ok(Some(job))
    }

    #[instrument(skip(self, job))]
    async fn release(&self, job: &Job, delay_secs: i64) -> Result<()> {
        let available_at = Utc::now() + chrono::Duration::seconds(delay_secs.max(0));
        sqlx::query("UPDATE jobs SET reserved_at = NULL, available_at = $1 WHERE uuid = $2")
            .bind(available_at)
            .bind(job.uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, job: &Job) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE uuid = $1")
            .bind(job.uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, job))]
    async fn fail(&self, job: &Job, error: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let payload = envelope(job.uuid, &job.handler, &job.data, job.max_attempts, job.timeout_secs, &job.queue, job.batch_uuid);
        sqlx::query(
            "INSERT INTO failed_jobs (uuid, queue, payload, exception, failed_at, batch_uuid) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(job.uuid)
        .bind(&job.queue)
        .bind(&payload)
        .bind(error)
        .bind(Utc::now())
        .bind(job.batch_uuid)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM jobs WHERE uuid = $1")
            .bind(job.uuid)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        warn!(uuid = %job.uuid, error, "job failed permanently");
        Ok(())
    }

    async fn size(&self, queue: Option<&str>) -> Result<u64> {
        let count: i64 = match queue {
            Some(q) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE queue = $1")
                    .bind(q)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => sqlx::query_scalar("SELECT COUNT(*) FROM jobs").fetch_one(&self.pool).await?,
        };
        Ok(count as u64)
    }

    async fn purge(&self, queue: Option<&str>) -> Result<u64> {
        let count = match queue {
            Some(q) => {
                sqlx::query("DELETE FROM jobs WHERE queue = $1")
                    .bind(q)
                    .execute(&self.pool)
                    .await?
                    .rows_affected()
            }
            None => sqlx::query("DELETE FROM jobs").execute(&self.pool).await?.rows_affected(),
        };
        Ok(count)
    }

    async fn stats(&self, queue: Option<&str>) -> Result<QueueStats> {
        let now = Utc::now();
        let (pending, delayed, reserved, failed, queues): (i64, i64, i64, i64, Vec<String>) = match queue {
            Some(q) => {
                let pending: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM jobs WHERE queue = $1 AND reserved_at IS NULL AND available_at <= $2",
                )
                .bind(q)
                .bind(now)
                .fetch_one(&self.pool)
                .await?;
                let delayed: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM jobs WHERE queue = $1 AND reserved_at IS NULL AND available_at > $2",
                )
                .bind(q)
                .bind(now)
                .fetch_one(&self.pool)
                .await?;
                let reserved: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE queue = $1 AND reserved_at IS NOT NULL")
                    .bind(q)
                    .fetch_one(&self.pool)
                    .await?;
                let failed: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM failed_jobs WHERE queue = $1")
                    .bind(q)
                    .fetch_one(&self.pool)
                    .await?;
                (pending, delayed, reserved, failed, vec![q.to_string()])
            }
            None => {
                let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE reserved_at IS NULL AND available_at <= $1")
                    .bind(now)
                    .fetch_one(&self.pool)
                    .await?;
                let delayed: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE reserved_at IS NULL AND available_at > $1")
                    .bind(now)
                    .fetch_one(&self.pool)
                    .await?;
                let reserved: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE reserved_at IS NOT NULL")
                    .fetch_one(&self.pool)
                    .await?;
                let failed: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM failed_jobs").fetch_one(&self.pool).await?;
                let queues: Vec<String> = sqlx::query_scalar("SELECT DISTINCT queue FROM jobs").fetch_all(&self.pool).await?;
                (pending, delayed, reserved, failed, queues)
            }
        };

        Ok(QueueStats {
            total: (pending + delayed + reserved) as u64,
            pending: pending as u64,
            delayed: delayed as u64,
            reserved: reserved as u64,
            failed: failed as u64,
            queues,
        })
    }

    async fn health_check(&self) -> Result<HealthCheck> {
        let start = std::time::Instant::now();
        let result = sqlx::query("SELECT 1").execute(&self.pool).await;
        let rtt_ms = start.elapsed().as_millis() as u64;

        Ok(match result {
            Ok(_) => HealthCheck {
                healthy: true,
                detail: "ok".into(),
                rtt_ms,
            },
            Err(err) => HealthCheck {
                healthy: false,
                detail: err.to_string(),
                rtt_ms,
            },
        })
    }
}
