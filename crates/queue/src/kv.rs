//! C4 — key/value-atomic `QueueDriver` (§4.4.4), built on Redis's list,
//! sorted-set, hash, and set primitives.
//!
//! Pending jobs live in one list **per priority tier**
//! (`queue:{name}:pending:{priority}`) rather than a single list ordered
//! by insertion side. `pop` always scans tiers highest-to-lowest and
//! never trusts `LPUSH`/`RPUSH` placement as a cross-tier ordering
//! contract — the open question in the design notes resolves this way:
//! list position is an implementation convenience, not a guarantee.

use async_trait::async_trait;
use chrono::Utc;
use glueful_core::Result;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::traits::QueueDriver;
use crate::types::{BulkItem, FailedJob, HealthCheck, Job, QueueStats, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT_SECS};

pub struct KvQueueDriver {
    redis: ConnectionManager,
    retry_after_secs: i64,
    job_expiration_secs: i64,
}

impl KvQueueDriver {
    pub fn new(redis: ConnectionManager, retry_after_secs: i64, job_expiration_secs: i64) -> Self {
        Self {
            redis,
            retry_after_secs,
            job_expiration_secs,
        }
    }

    fn job_key(uuid: Uuid) -> String {
        format!("job:{uuid}")
    }

    fn pending_key(queue: &str, priority: i32) -> String {
        format!("queue:{queue}:pending:{priority}")
    }

    fn priorities_key(queue: &str) -> String {
        format!("queue:{queue}:priorities")
    }

    fn delayed_key(queue: &str) -> String {
        format!("queue:{queue}:delayed")
    }

    fn reserved_key(queue: &str) -> String {
        format!("queue:{queue}:reserved")
    }

    fn failed_key(queue: &str) -> String {
        format!("queue:{queue}:failed")
    }

    async fn store_job(&self, job: &Job) -> Result<()> {
        let mut conn = self.redis.clone();
        let key = Self::job_key(job.uuid);
        let fields: Vec<(&str, String)> = vec![
            ("handler", job.handler.clone()),
            ("data", serde_json::to_string(&job.data)?),
            ("attempts", job.attempts.to_string()),
            ("max_attempts", job.max_attempts.to_string()),
            ("timeout_secs", job.timeout_secs.to_string()),
            ("priority", job.priority.to_string()),
            ("queue", job.queue.clone()),
            ("available_at", job.available_at.timestamp().to_string()),
            ("reserved_at", job.reserved_at.map(|t| t.timestamp().to_string()).unwrap_or_default()),
            ("batch_uuid", job.batch_uuid.map(|u| u.to_string()).unwrap_or_default()),
            ("created_at", job.created_at.timestamp().to_string()),
        ];
        conn.hset_multiple::<_, _, _, ()>(&key, &fields).await?;
        conn.expire::<_, ()>(&key, self.job_expiration_secs).await?;
        Ok(())
    }

    async fn load_job(&self, uuid: Uuid) -> Result<Option<Job>> {
        let mut conn = self.redis.clone();
        let map: HashMap<String, String> = conn.hgetall(Self::job_key(uuid)).await?;
        if map.is_empty() {
            return Ok(None);
        }

        let epoch = |key: &str| -> Option<chrono::DateTime<Utc>> {
            map.get(key).filter(|s| !s.is_empty()).and_then(|s| s.parse::<i64>().ok()).and_then(|secs| {
                chrono::DateTime::from_timestamp(secs, 0)
            })
        };

        Ok(Some(Job {
            uuid,
            queue: map.get("queue").cloned().unwrap_or_default(),
            handler: map.get("handler").cloned().unwrap_or_default(),
            data: map
                .get("data")
                .map(|s| serde_json::from_str(s).unwrap_or(serde_json::Value::Null))
                .unwrap_or(serde_json::Value::Null),
            attempts: map.get("attempts").and_then(|s| s.parse().ok()).unwrap_or(0),
            max_attempts: map
                .get("max_attempts")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            timeout_secs: map
                .get("timeout_secs")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            priority: map.get("priority").and_then(|s| s.parse().ok()).unwrap_or(0),
            reserved_at: epoch("reserved_at"),
            available_at: epoch("available_at").unwrap_or_else(Utc::now),
            batch_uuid: map.get("batch_uuid").filter(|s| !s.is_empty()).and_then(|s| s.parse().ok()),
            created_at: epoch("created_at").unwrap_or_else(Utc::now),
        }))
    }

    /// Moves a job into its pending tier. Three keys change together
    /// (`queues`, the tier's priority set, the tier's list); run as one
    /// MULTI/EXEC so a crash can't leave the job indexed under a
    /// priority that has no matching list entry, or vice versa.
    async fn enqueue_ready(&self, queue: &str, job: &Job) -> Result<()> {
        let mut conn = self.redis.clone();
        let _: () = redis::pipe()
            .atomic()
            .sadd("queues", queue).ignore()
            .sadd(Self::priorities_key(queue), job.priority).ignore()
            .rpush(Self::pending_key(queue, job.priority), job.uuid.to_string()).ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Moves delayed/expired-reservation entries into the pending tiers.
    /// Called at the top of every `pop`. Each entry's removal from its
    /// source zset and its re-enqueue run as one atomic pipeline: a
    /// crash between the two must never leave a job in neither place.
    async fn promote_ready_entries(&self, queue: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        let now = Utc::now().timestamp();

        let ready_delayed: Vec<String> = conn.zrangebyscore(Self::delayed_key(queue), 0, now).await?;
        for uuid_str in ready_delayed {
            let Ok(uuid) = uuid_str.parse::<Uuid>() else { continue };
            let Some(job) = self.load_job(uuid).await? else { continue };
            let _: () = redis::pipe()
                .atomic()
                .zrem(Self::delayed_key(queue), &uuid_str).ignore()
                .sadd("queues", queue).ignore()
                .sadd(Self::priorities_key(queue), job.priority).ignore()
                .rpush(Self::pending_key(queue, job.priority), uuid_str.clone()).ignore()
                .query_async(&mut conn)
                .await?;
        }

        let expired_reserved: Vec<String> = conn.zrangebyscore(Self::reserved_key(queue), 0, now).await?;
        for uuid_str in expired_reserved {
            let Ok(uuid) = uuid_str.parse::<Uuid>() else { continue };
            let Some(job) = self.load_job(uuid).await? else { continue };
            warn!(%uuid, queue, "reservation lease expired, returning job to pending");
            let _: () = redis::pipe()
                .atomic()
                .zrem(Self::reserved_key(queue), &uuid_str).ignore()
                .hset(Self::job_key(uuid), "reserved_at", "").ignore()
                .sadd("queues", queue).ignore()
                .sadd(Self::priorities_key(queue), job.priority).ignore()
                .rpush(Self::pending_key(queue, job.priority), uuid_str.clone()).ignore()
                .query_async(&mut conn)
                .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl QueueDriver for KvQueueDriver {
    #[instrument(skip(self, payload))]
    async fn push(&self, handler: &str, payload: serde_json::Value, queue: &str, priority: i32) -> Result<Uuid> {
        let now = Utc::now();
        let job = Job {
            uuid: Uuid::new_v4(),
            queue: queue.to_string(),
            handler: handler.to_string(),
            data: payload,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            priority,
            reserved_at: None,
            available_at: now,
            batch_uuid: None,
            created_at: now,
        };
        self.store_job(&job).await?;
        self.enqueue_ready(queue, &job).await?;
        debug!(uuid = %job.uuid, queue, "pushed job");
        Ok(job.uuid)
    }

    async fn later(&self, delay_secs: i64, handler: &str, payload: serde_json::Value, queue: &str, priority: i32) -> Result<Uuid> {
        if delay_secs <= 0 {
            return self.push(handler, payload, queue, priority).await;
        }

        let now = Utc::now();
        let available_at = now + chrono::Duration::seconds(delay_secs);
        let job = Job {
            uuid: Uuid::new_v4(),
            queue: queue.to_string(),
            handler: handler.to_string(),
            data: payload,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            priority,
            reserved_at: None,
            available_at,
            batch_uuid: None,
            created_at: now,
        };
        self.store_job(&job).await?;

        let mut conn = self.redis.clone();
        conn.sadd::<_, _, ()>("queues", queue).await?;
        conn.zadd::<_, _, _, ()>(Self::delayed_key(queue), job.uuid.to_string(), available_at.timestamp())
            .await?;
        Ok(job.uuid)
    }

    async fn bulk(&self, items: &[BulkItem], queue: &str) -> Result<Vec<Uuid>> {
        let mut uuids = Vec::with_capacity(items.len());
        for item in items {
            let uuid = match item.delay_secs {
                Some(delay) if delay > 0 => {
                    self.later(delay, &item.handler, item.data.clone(), queue, item.priority).await?
                }
                _ => self.push(&item.handler, item.data.clone(), queue, item.priority).await?,
            };
            uuids.push(uuid);
        }
        Ok(uuids)
    }

    #[instrument(skip(self))]
    async fn pop(&self, queue: &str) -> Result<Option<Job>> {
        self.promote_ready_entries(queue).await?;

        let mut conn = self.redis.clone();
        let priorities: Vec<String> = conn.smembers(Self::priorities_key(queue)).await?;
        let mut tiers: Vec<i32> = priorities.iter().filter_map(|p| p.parse().ok()).collect();
        tiers.sort_unstable_by(|a, b| b.cmp(a));

        for priority in tiers {
            let uuid_str: Option<String> = conn.lpop(Self::pending_key(queue, priority), None).await?;
            let Some(uuid_str) = uuid_str else { continue };
            let Ok(uuid) = uuid_str.parse::<Uuid>() else { continue };

            let now = Utc::now();
            let reserved_score = now.timestamp() + self.retry_after_secs;
            // One MULTI/EXEC for the reservation: a crash between lpop and
            // zadd must never leave a reserved job untracked by the
            // lease-expiry sweep in `promote_ready_entries`.
            let (attempts,): (i32,) = redis::pipe()
                .atomic()
                .hset(Self::job_key(uuid), "reserved_at", now.timestamp().to_string()).ignore()
                .hincr(Self::job_key(uuid), "attempts", 1)
                .zadd(Self::reserved_key(queue), uuid.to_string(), reserved_score).ignore()
                .query_async(&mut conn)
                .await?;

            let Some(mut job) = self.load_job(uuid).await? else { continue };
            job.attempts = attempts;
            job.reserved_at = Some(now);
            debug!(%uuid, queue, attempts, "popped job");
            return Ok(Some(job));
        }

        Ok(None)
    }

    #[instrument(skip(self, job))]
    async fn release(&self, job: &Job, delay_secs: i64) -> Result<()> {
        let mut conn = self.redis.clone();
        conn.zrem::<_, _, i64>(Self::reserved_key(&job.queue), job.uuid.to_string()).await?;
        conn.hset::<_, _, _, ()>(Self::job_key(job.uuid), "reserved_at", "").await?;

        if delay_secs > 0 {
            let available_at = Utc::now() + chrono::Duration::seconds(delay_secs);
            conn.hset::<_, _, _, ()>(Self::job_key(job.uuid), "available_at", available_at.timestamp().to_string())
                .await?;
            conn.sadd::<_, _, ()>("queues", &job.queue).await?;
            conn.zadd::<_, _, _, ()>(Self::delayed_key(&job.queue), job.uuid.to_string(), available_at.timestamp())
                .await?;
        } else if let Some(updated) = self.load_job(job.uuid).await? {
            self.enqueue_ready(&job.queue, &updated).await?;
        }
        Ok(())
    }

    async fn delete(&self, job: &Job) -> Result<()> {
        let mut conn = self.redis.clone();
        conn.zrem::<_, _, i64>(Self::reserved_key(&job.queue), job.uuid.to_string()).await?;
        conn.zrem::<_, _, i64>(Self::delayed_key(&job.queue), job.uuid.to_string()).await?;
        conn.lrem::<_, _, i64>(Self::pending_key(&job.queue, job.priority), 0, job.uuid.to_string()).await?;
        conn.del::<_, ()>(Self::job_key(job.uuid)).await?;
        Ok(())
    }

    #[instrument(skip(self, job))]
    async fn fail(&self, job: &Job, error: &str) -> Result<()> {
        let failed = FailedJob {
            uuid: job.uuid,
            queue: job.queue.clone(),
            payload: job.data.clone(),
            exception: error.to_string(),
            failed_at: Utc::now(),
            batch_uuid: job.batch_uuid,
        };

        let mut conn = self.redis.clone();
        conn.rpush::<_, _, ()>(Self::failed_key(&job.queue), serde_json::to_string(&failed)?).await?;
        conn.zrem::<_, _, i64>(Self::reserved_key(&job.queue), job.uuid.to_string()).await?;
        conn.del::<_, ()>(Self::job_key(job.uuid)).await?;
        warn!(uuid = %job.uuid, error, "job failed permanently");
        Ok(())
    }

    async fn size(&self, queue: Option<&str>) -> Result<u64> {
        let mut conn = self.redis.clone();
        let queues = self.queues_in_scope(queue).await?;
        let mut total = 0u64;
        for q in queues {
            total += self.pending_count(&q).await?;
            total += conn.zcard::<_, i64>(Self::delayed_key(&q)).await? as u64;
            total += conn.zcard::<_, i64>(Self::reserved_key(&q)).await? as u64;
        }
        Ok(total)
    }

    async fn purge(&self, queue: Option<&str>) -> Result<u64> {
        let mut conn = self.redis.clone();
        let queues = self.queues_in_scope(queue).await?;
        let mut removed = 0u64;

        for q in &queues {
            let priorities: Vec<String> = conn.smembers(Self::priorities_key(q)).await?;
            for p in &priorities {
                let uuids: Vec<String> = conn.lrange(Self::pending_key(q, p.parse().unwrap_or(0)), 0, -1).await?;
                removed += uuids.len() as u64;
                for uuid in &uuids {
                    conn.del::<_, ()>(Self::job_key(uuid.parse().unwrap_or_default())).await?;
                }
                conn.del::<_, ()>(Self::pending_key(q, p.parse().unwrap_or(0))).await?;
            }
            conn.del::<_, ()>(Self::priorities_key(q)).await?;

            let delayed: Vec<String> = conn.zrange(Self::delayed_key(q), 0, -1).await?;
            removed += delayed.len() as u64;
            for uuid in delayed {
                conn.del::<_, ()>(Self::job_key(uuid.parse().unwrap_or_default())).await?;
            }
            conn.del::<_, ()>(Self::delayed_key(q)).await?;

            let reserved: Vec<String> = conn.zrange(Self::reserved_key(q), 0, -1).await?;
            removed += reserved.len() as u64;
            for uuid in reserved {
                conn.del::<_, ()>(Self::job_key(uuid.parse().unwrap_or_default())).await?;
            }
            conn.del::<_, ()>(Self::reserved_key(q)).await?;

            conn.srem::<_, _, ()>("queues", q).await?;
        }

        Ok(removed)
    }

    async fn stats(&self, queue: Option<&str>) -> Result<QueueStats> {
        let mut conn = self.redis.clone();
        let queues = self.queues_in_scope(queue).await?;
        let mut stats = QueueStats {
            queues: queues.clone(),
            ..Default::default()
        };

        for q in &queues {
            stats.pending += self.pending_count(q).await?;
            stats.delayed += conn.zcard::<_, i64>(Self::delayed_key(q)).await? as u64;
            stats.reserved += conn.zcard::<_, i64>(Self::reserved_key(q)).await? as u64;
            stats.failed += conn.llen::<_, i64>(Self::failed_key(q)).await? as u64;
        }
        stats.total = stats.pending + stats.delayed + stats.reserved;
        Ok(stats)
    }

    async fn health_check(&self) -> Result<HealthCheck> {
        let mut conn = self.redis.clone();
        let start = std::time::Instant::now();
        let result: std::result::Result<String, redis::RedisError> = redis::cmd("PING").query_async(&mut conn).await;
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

impl KvQueueDriver {
    async fn queues_in_scope(&self, queue: Option<&str>) -> Result<Vec<String>> {
        match queue {
            Some(q) => Ok(vec![q.to_string()]),
            None => {
                let mut conn = self.redis.clone();
                Ok(conn.smembers("queues").await?)
            }
        }
    }

    async fn pending_count(&self, queue: &str) -> Result<u64> {
        let mut conn = self.redis.clone();
        let priorities: Vec<String> = conn.smembers(Self::priorities_key(queue)).await?;
        let mut total = 0u64;
        for p in priorities {
            let priority: i32 = p.parse().unwrap_or(0);
            total += conn.llen::<_, i64>(Self::pending_key(queue, priority)).await? as u64;
        }
        Ok(total)
    }
}
