pub mod config;
pub mod database;
pub mod error;
pub mod types;

pub use config::Config;
pub use database::DatabasePool;
pub use error::{Error, ErrorCategory, ErrorCode, ErrorContext, ErrorMetrics, RequestContext, Result};
pub use types::*;

// Re-export commonly used types from dependencies so downstream crates pin
// a single version through `glueful-core` rather than their own.
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
