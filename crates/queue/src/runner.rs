//! C5 — JobRunner: a single-threaded worker pulling from one
//! `QueueDriver` (§4.5). Multiple `JobRunner`s may run concurrently
//! against the same queue; the driver's reservation guarantees
//! at-most-one in-flight claim per job.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use rand::Rng;
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use glueful_core::Result;

use crate::traits::{JobContext, JobHandler, JobResult, QueueDriver};

/// Backoff applied to `release(job, delay)` after a retryable failure.
#[derive(Debug, Clone)]
pub enum BackoffStrategy {
    Linear { base_secs: i64 },
    Exponential { base_secs: i64, max_secs: i64 },
}

impl BackoffStrategy {
    pub fn delay_for(&self, attempt: i32, jitter: bool) -> i64 {
        let base = match self {
            BackoffStrategy::Linear { base_secs } => base_secs * attempt.max(1) as i64,
            BackoffStrategy::Exponential { base_secs, max_secs } => {
                (base_secs * 2i64.pow(attempt.max(0) as u32)).min(*max_secs)
            }
        };
        if jitter {
            let jitter_secs = rand::thread_rng().gen_range(0..=(base / 4).max(1));
            base + jitter_secs
        } else {
            base
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential {
            base_secs: 2,
            max_secs: 300,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub worker_id: String,
    pub queue: String,
    pub poll_interval: StdDuration,
    pub default_timeout: StdDuration,
    pub backoff: BackoffStrategy,
    pub jitter: bool,
}

impl RunnerConfig {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
            queue: queue.into(),
            poll_interval: StdDuration::from_secs(1),
            default_timeout: StdDuration::from_secs(60),
            backoff: BackoffStrategy::default(),
            jitter: true,
        }
    }
}

pub struct JobRunner {
    driver: Arc<dyn QueueDriver>,
    handlers: Arc<RwLock<HashMap<String, Arc<dyn JobHandler>>>>,
    config: RunnerConfig,
}

impl JobRunner {
    pub fn new(driver: Arc<dyn QueueDriver>, config: RunnerConfig) -> Self {
        Self {
            driver,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub async fn register_handler(&self, handler: Arc<dyn JobHandler>) {
        let name = handler.handler_name().to_string();
        self.handlers.write().await.insert(name.clone(), handler);
        info!(handler = %name, "registered job handler");
    }

    /// Runs until `shutdown_rx` fires, polling `config.poll_interval`
    /// whenever the queue is empty.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(worker_id = %self.config.worker_id, queue = %self.config.queue, "job runner started");
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(worker_id = %self.config.worker_id, "shutdown received, stopping job runner");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(err) = self.run_once().await {
                        error!(error = %err, "job runner iteration failed");
                    }
                }
            }
        }
    }

    /// Pops and processes at most one job. Returns immediately if the
    /// queue is empty.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<()> {
        let Some(job) = self.driver.pop(&self.config.queue).await? else {
            return Ok(());
        };

        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&job.handler).cloned()
        };

        let Some(handler) = handler else {
            error!(handler = %job.handler, uuid = %job.uuid, "no handler registered for job type");
            self.driver.fail(&job, &format!("no handler registered for '{}'", job.handler)).await?;
            return Ok(());
        };

        let context = JobContext::from_job(&job);
        let job_timeout = handler
            .timeout_secs()
            .map(|s| StdDuration::from_secs(s.max(0) as u64))
            .unwrap_or(self.config.default_timeout);

        let result = match timeout(job_timeout, handler.handle(&job.data, &context)).await {
            Ok(result) => result,
            Err(_) => JobResult::retry("job execution timed out"),
        };

        match result {
            JobResult::Success { .. } => {
                debug!(uuid = %job.uuid, "job completed");
                self.driver.delete(&job).await?;
            }
            JobResult::Retry { error, delay_secs } => {
                if job.can_retry() {
                    let delay = delay_secs.unwrap_or_else(|| self.config.backoff.delay_for(job.attempts, self.config.jitter));
                    warn!(uuid = %job.uuid, attempts = job.attempts, error, "job failed, retrying");
                    self.driver.release(&job, delay).await?;
                } else {
                    warn!(uuid = %job.uuid, attempts = job.attempts, "job exhausted retries, archiving");
                    self.driver.fail(&job, &error).await?;
                }
            }
            JobResult::Failed { error } => {
                warn!(uuid = %job.uuid, error, "job failed permanently");
                self.driver.fail(&job, &error).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_caps_at_max() {
        let backoff = BackoffStrategy::Exponential {
            base_secs: 2,
            max_secs: 300,
        };
        assert_eq!(backoff.delay_for(0, false), 2);
        assert_eq!(backoff.delay_for(3, false), 16);
        assert_eq!(backoff.delay_for(20, false), 300);
    }

    #[test]
    fn linear_backoff_scales_with_attempt() {
        let backoff = BackoffStrategy::Linear { base_secs: 5 };
        assert_eq!(backoff.delay_for(1, false), 5);
        assert_eq!(backoff.delay_for(4, false), 20);
    }
}
