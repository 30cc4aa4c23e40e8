//! C6 — Scheduler: a tick-driven registry of `(id, cronExpression,
//! handler)` that enqueues onto a `QueueDriver`. Never executes a
//! handler itself (§4.6).

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use cron::Schedule;
use glueful_core::{Error, Result};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::traits::{QueueDriver, ScheduledPayload};

struct ScheduledJob {
    id: String,
    schedule: Schedule,
    payload: ScheduledPayload,
    queue: String,
    priority: i32,
}

/// Expands the cron grammar's named aliases (§6) into standard 5-field
/// expressions, then prepends a seconds field for the `cron` crate.
fn normalize_cron(expr: &str) -> Result<Schedule> {
    let expanded = match expr.trim() {
        "@yearly" | "@annually" => "0 0 1 1 *",
        "@monthly" => "0 0 1 * *",
        "@weekly" => "0 0 * * 0",
        "@daily" | "@midnight" => "0 0 * * *",
        "@hourly" => "0 * * * *",
        other => other,
    };

    let with_seconds = if expanded.split_whitespace().count() == 5 {
        format!("0 {expanded}")
    } else {
        expanded.to_string()
    };

    Schedule::from_str(&with_seconds)
        .map_err(|err| Error::validation(format!("invalid cron expression '{expr}': {err}")))
}

pub struct Scheduler {
    driver: Arc<dyn QueueDriver>,
    jobs: Arc<RwLock<Vec<ScheduledJob>>>,
}

impl Scheduler {
    pub fn new(driver: Arc<dyn QueueDriver>) -> Self {
        Self {
            driver,
            jobs: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn register(
        &self,
        id: impl Into<String>,
        cron_expr: &str,
        handler: impl Into<String>,
        data: serde_json::Value,
        queue: impl Into<String>,
        priority: i32,
    ) -> Result<()> {
        let schedule = normalize_cron(cron_expr)?;
        let mut jobs = self.jobs.write().await;
        jobs.push(ScheduledJob {
            id: id.into(),
            schedule,
            payload: ScheduledPayload {
                handler: handler.into(),
                data,
            },
            queue: queue.into(),
            priority,
        });
        Ok(())
    }

    pub async fn unregister(&self, id: &str) {
        self.jobs.write().await.retain(|job| job.id != id);
    }

    /// Enqueues every registered job whose cron expression matches the
    /// minute containing `now`. Ordering across jobs within the same
    /// tick is unspecified.
    #[instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize> {
        let minute_start = now
            .date_naive()
            .and_hms_opt(now.time().hour(), now.time().minute(), 0)
            .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
            .unwrap_or(now);

        let jobs = self.jobs.read().await;
        let mut fired = 0usize;

        for job in jobs.iter() {
            let matches = job
                .schedule
                .after(&(minute_start - chrono::Duration::seconds(1)))
                .next()
                .map(|next| next <= minute_start)
                .unwrap_or(false);

            if !matches {
                continue;
            }

            self.driver
                .push(&job.payload.handler, job.payload.data.clone(), &job.queue, job.priority)
                .await?;
            debug!(job_id = %job.id, queue = %job.queue, "scheduler enqueued job");
            fired += 1;
        }

        Ok(fired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_expand_to_standard_expressions() {
        assert!(normalize_cron("@hourly").is_ok());
        assert!(normalize_cron("@daily").is_ok());
        assert!(normalize_cron("0 9 * * 1-5").is_ok());
    }

    #[test]
    fn invalid_expression_is_rejected() {
        assert!(normalize_cron("not a cron expression").is_err());
    }
}
