//! Multi-driver job queue and scheduler: at-least-once delivery, priority
//! ordering, delayed execution, reservation leases, and cron-like
//! periodic enqueueing.

pub mod kv;
pub mod relational;
pub mod runner;
pub mod scheduler;
pub mod traits;
pub mod types;

pub use kv::KvQueueDriver;
pub use relational::RelationalQueueDriver;
pub use runner::{BackoffStrategy, JobRunner, RunnerConfig};
pub use scheduler::Scheduler;
pub use traits::{JobContext, JobHandler, JobResult, QueueDriver, ScheduledPayload};
pub use types::{BulkItem, FailedJob, HealthCheck, Job, JobState, QueueStats};
