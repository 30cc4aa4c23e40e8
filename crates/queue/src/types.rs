//! Job envelope and state-machine types shared by every `QueueDriver`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A job's position in the state machine (§4.4.1). Drivers derive this
/// from their own bookkeeping rather than storing it as a column —
/// `deleted` and `failed` are represented by the row's absence / its
/// presence in `failed_jobs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Delayed,
    Reserved,
    Deleted,
    Failed,
}

/// A queued unit of work. Mirrors the job payload envelope plus the
/// bookkeeping columns a driver needs to enforce the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub uuid: Uuid,
    pub queue: String,
    /// Handler class/identifier the runner dispatches to.
    pub handler: String,
    pub data: serde_json::Value,
    pub attempts: i32,
    pub max_attempts: i32,
    pub timeout_secs: i64,
    /// Higher values run first.
    pub priority: i32,
    pub reserved_at: Option<DateTime<Utc>>,
    pub available_at: DateTime<Utc>,
    pub batch_uuid: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn state(&self, now: DateTime<Utc>) -> JobState {
        if self.reserved_at.is_some() {
            JobState::Reserved
        } else if self.available_at > now {
            JobState::Delayed
        } else {
            JobState::Pending
        }
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Archival record written when a job exhausts `max_attempts` or a
/// handler reports a terminal failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedJob {
    pub uuid: Uuid,
    pub queue: String,
    pub payload: serde_json::Value,
    pub exception: String,
    pub failed_at: DateTime<Utc>,
    pub batch_uuid: Option<Uuid>,
}

/// One entry of a `bulk` push.
#[derive(Debug, Clone)]
pub struct BulkItem {
    pub handler: String,
    pub data: serde_json::Value,
    pub delay_secs: Option<i64>,
    pub priority: i32,
}

impl BulkItem {
    pub fn new(handler: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            handler: handler.into(),
            data,
            delay_secs: None,
            priority: 0,
        }
    }

    pub fn with_delay(mut self, delay_secs: i64) -> Self {
        self.delay_secs = Some(delay_secs);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// `{total, pending, delayed, reserved, failed, queues[]}` per §4.4.2.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueueStats {
    pub total: u64,
    pub pending: u64,
    pub delayed: u64,
    pub reserved: u64,
    pub failed: u64,
    pub queues: Vec<String>,
}

/// `{healthy, detail, rttMs}` per §4.4.2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub healthy: bool,
    pub detail: String,
    pub rtt_ms: u64,
}

pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;
pub const DEFAULT_TIMEOUT_SECS: i64 = 60;
pub const DEFAULT_RETRY_AFTER_SECS: i64 = 90;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job(reserved_at: Option<DateTime<Utc>>, available_at: DateTime<Utc>) -> Job {
        Job {
            uuid: Uuid::new_v4(),
            queue: "default".into(),
            handler: "SendEmail".into(),
            data: serde_json::json!({}),
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            priority: 0,
            reserved_at,
            available_at,
            batch_uuid: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn state_reflects_reservation_and_availability() {
        let now = Utc::now();
        assert_eq!(sample_job(None, now - chrono::Duration::seconds(1)).state(now), JobState::Pending);
        assert_eq!(sample_job(None, now + chrono::Duration::seconds(60)).state(now), JobState::Delayed);
        assert_eq!(sample_job(Some(now), now).state(now), JobState::Reserved);
    }

    #[test]
    fn can_retry_respects_max_attempts() {
        let mut job = sample_job(None, Utc::now());
        job.attempts = 2;
        job.max_attempts = 3;
        assert!(job.can_retry());
        job.attempts = 3;
        assert!(!job.can_retry());
    }
}
