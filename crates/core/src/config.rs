//! Hierarchical configuration for the queue, authorization and validation
//! components.
//!
//! Configuration loads from three sources in order of increasing
//! precedence, mirroring the layered approach used throughout the stack:
//!
//! 1. `config/default.toml` (lowest precedence)
//! 2. `config/{environment}.toml`, selected by the `ENVIRONMENT` variable
//! 3. Environment variables (highest precedence, `_` separated)
//!
//! Loading fails fast: [`Config::load`] runs [`Config::validate`] before
//! returning, so a misconfigured deployment never starts serving requests
//! with values it can't use.

use config::{ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub kv_store: KvStoreConfig,
    pub queue: QueueConfig,
    pub permissions: PermissionsConfig,
    pub validation: ValidationConfig,
    pub app: AppConfig,
    pub metrics: MetricsConfig,
}

/// Relational store configuration, used by the relational `QueueDriver`
/// and the `AssignmentStore`.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Key-value store configuration, used by the kv-atomic `QueueDriver` and
/// the role-graph / permission-check caches when they need to be shared
/// across processes.
#[derive(Debug, Deserialize, Clone)]
pub struct KvStoreConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Queue and scheduler tuning. Field names match the operational knobs a
/// deployment actually needs to adjust.
#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// Which `QueueDriver` backend to construct: "relational" or "kv".
    pub default_driver: String,
    /// How often a worker polls the driver for ready work, in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum jobs a single `JobRunner` processes concurrently.
    pub max_concurrent_jobs: usize,
    /// How long a reservation lease lasts before a job is eligible for
    /// redelivery, in seconds. Fed directly to `RelationalQueueDriver::new`
    /// and `KvQueueDriver::new`.
    pub retry_after_secs: i64,
    /// How long a completed or dead job payload is retained in the kv
    /// driver's job hash before it is eligible for expiry, in seconds. Fed
    /// directly to `KvQueueDriver::new`.
    pub job_expiration_secs: i64,
    /// Default `max_attempts` for jobs that don't specify their own.
    pub default_max_attempts: u32,
    /// Per-job execution timeout, in seconds, before the runner treats the
    /// job as failed and releases or fails it.
    pub job_timeout_seconds: u64,
    /// Upper bound on how many rows a single bulk insert call accepts.
    pub max_bulk_batch_size: usize,
    /// How often the scheduler evaluates registered cron expressions, in
    /// seconds.
    pub scheduler_tick_seconds: u64,
}

/// Authorization engine tuning.
#[derive(Debug, Deserialize, Clone)]
pub struct PermissionsConfig {
    /// How long a cached role-graph snapshot is considered valid before a
    /// refresh is triggered, in seconds.
    pub role_graph_cache_ttl_seconds: u64,
    /// How long the `(userUuid) -> active role uuids` cache is valid, in
    /// seconds. Kept shorter than the role graph cache since grants churn
    /// more often than role definitions.
    pub active_roles_cache_ttl_seconds: u64,
}

/// Validation pipeline tuning.
#[derive(Debug, Deserialize, Clone)]
pub struct ValidationConfig {
    /// Stop evaluating a field's remaining rules after the first failure
    /// instead of collecting every violation.
    pub fail_fast_per_field: bool,
    /// Whether referencing an unregistered rule name is an error (true)
    /// or silently skipped (false). Production deployments should keep
    /// this `true`.
    pub strict_unknown_rule: bool,
    /// Whether the `Validator` keeps registered `ObjectDescriptor`s in its
    /// in-memory cache between calls. Fed directly to `Validator::new`.
    pub cache_descriptors: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub environment: String,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
    pub namespace: String,
}

impl Config {
    /// Loads configuration from `config/default.toml`, then
    /// `config/{ENVIRONMENT}.toml`, then environment variables, validating
    /// the merged result before returning it.
    pub fn load() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let builder = config::Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            .add_source(Environment::with_prefix("").separator("_"));

        let built = builder.build()?;
        let loaded: Config = built.try_deserialize()?;
        loaded.validate(&environment)?;
        Ok(loaded)
    }

    fn validate(&self, environment: &str) -> Result<(), ConfigError> {
        if !self.database.url.starts_with("postgresql://") {
            return Err(ConfigError::Message(
                "database.url must be a PostgreSQL connection string starting with 'postgresql://'"
                    .to_string(),
            ));
        }
        if !self.kv_store.url.starts_with("redis://") {
            return Err(ConfigError::Message(
                "kv_store.url must be a connection string starting with 'redis://'".to_string(),
            ));
        }
        if self.queue.default_driver != "relational" && self.queue.default_driver != "kv" {
            return Err(ConfigError::Message(format!(
                "queue.default_driver must be 'relational' or 'kv', got '{}'",
                self.queue.default_driver
            )));
        }
        if self.queue.max_concurrent_jobs == 0 {
            return Err(ConfigError::Message(
                "queue.max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        if self.queue.retry_after_secs <= 0 {
            return Err(ConfigError::Message(
                "queue.retry_after_secs must be positive".to_string(),
            ));
        }
        if self.queue.job_expiration_secs <= 0 {
            return Err(ConfigError::Message(
                "queue.job_expiration_secs must be positive".to_string(),
            ));
        }
        if self.queue.max_bulk_batch_size == 0 {
            return Err(ConfigError::Message(
                "queue.max_bulk_batch_size must be at least 1".to_string(),
            ));
        }

        if environment == "production" {
            let error_indicators = ["CHANGE_THIS", "NOT_SET", "PLACEHOLDER"];
            for indicator in &error_indicators {
                if self.database.url.contains(indicator) {
                    return Err(ConfigError::Message(format!(
                        "Production deployment detected missing database configuration (contains '{indicator}')"
                    )));
                }
                if self.kv_store.url.contains(indicator) {
                    return Err(ConfigError::Message(format!(
                        "Production deployment detected missing key-value store configuration (contains '{indicator}')"
                    )));
                }
            }
        }

        Ok(())
    }
}
