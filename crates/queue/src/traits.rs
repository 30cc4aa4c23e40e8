//! C4 — `QueueDriver`: the polymorphic contract both the relational and
//! kv-atomic drivers implement. Also the handler-side contract consumed
//! by `JobRunner`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glueful_core::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::types::{BulkItem, HealthCheck, Job, QueueStats};

#[async_trait]
pub trait QueueDriver: Send + Sync {
    /// Returns the new job uuid. Visible at `now`. `priority` defaults to
    /// 0 at the call sites that don't care about ordering (§4.4.2's table
    /// elides it; §8 scenario 4 requires it to be settable).
    async fn push(
        &self,
        handler: &str,
        payload: serde_json::Value,
        queue: &str,
        priority: i32,
    ) -> Result<Uuid>;

    /// Visible at `now + delaySecs`.
    async fn later(
        &self,
        delay_secs: i64,
        handler: &str,
        payload: serde_json::Value,
        queue: &str,
        priority: i32,
    ) -> Result<Uuid>;

    /// Atomic batch; returns uuids in input order.
    async fn bulk(&self, items: &[BulkItem], queue: &str) -> Result<Vec<Uuid>>;

    /// Highest priority first, oldest `availableAt` next, within `availableAt <= now`.
    /// Marks the row reserved atomically. `None` if nothing is ready.
    async fn pop(&self, queue: &str) -> Result<Option<Job>>;

    /// Returns the job to pending (`delay == 0`) or delayed (`delay > 0`);
    /// preserves `attempts`.
    async fn release(&self, job: &Job, delay_secs: i64) -> Result<()>;

    /// Irreversible.
    async fn delete(&self, job: &Job) -> Result<()>;

    /// Writes a `FailedJob` record and removes the job from the active set.
    async fn fail(&self, job: &Job, error: &str) -> Result<()>;

    /// Pending + delayed + reserved, for one queue or all queues.
    async fn size(&self, queue: Option<&str>) -> Result<u64>;

    /// Deletes everything in scope; returns the count removed.
    async fn purge(&self, queue: Option<&str>) -> Result<u64>;

    async fn stats(&self, queue: Option<&str>) -> Result<QueueStats>;

    async fn health_check(&self) -> Result<HealthCheck>;
}

/// Outcome of a handler invocation, mirroring the JobRunner's
/// success/retry/fail branching in §4.5.
#[derive(Debug, Clone)]
pub enum JobResult {
    Success {
        result: Option<serde_json::Value>,
    },
    /// Retryable failure. `delay_secs` overrides the runner's configured
    /// backoff for this attempt when set.
    Retry {
        error: String,
        delay_secs: Option<i64>,
    },
    /// Terminal failure, written straight to `FailedJob` regardless of
    /// remaining attempts.
    Failed {
        error: String,
    },
}

impl JobResult {
    pub fn success() -> Self {
        Self::Success { result: None }
    }

    pub fn success_with(result: serde_json::Value) -> Self {
        Self::Success {
            result: Some(result),
        }
    }

    pub fn retry(error: impl Into<String>) -> Self {
        Self::Retry {
            error: error.into(),
            delay_secs: None,
        }
    }

    pub fn retry_after(error: impl Into<String>, delay_secs: i64) -> Self {
        Self::Retry {
            error: error.into(),
            delay_secs: Some(delay_secs),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }
}

/// Context passed to a handler for one invocation.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_uuid: Uuid,
    pub queue: String,
    pub attempt: i32,
    pub max_attempts: i32,
    pub started_at: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl JobContext {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_uuid: job.uuid,
            queue: job.queue.clone(),
            attempt: job.attempts,
            max_attempts: job.max_attempts,
            started_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// A job handler, registered with a `JobRunner` under its `handler` name.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn handler_name(&self) -> &'static str;

    async fn handle(&self, data: &serde_json::Value, context: &JobContext) -> JobResult;

    /// Overrides the runner's default timeout for this handler, in seconds.
    fn timeout_secs(&self) -> Option<i64> {
        None
    }
}

/// Object-safe holder so a `Scheduler` can enqueue without knowing the
/// concrete handler type, mirroring the payload that crosses the wire to
/// a `QueueDriver`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPayload {
    pub handler: String,
    pub data: serde_json::Value,
}
