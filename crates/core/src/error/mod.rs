//! Structured error handling shared by the authorization, queue and
//! validation components.
//!
//! Errors carry a stable numeric [`ErrorCode`], which maps to one of seven
//! [`ErrorCategory`] kinds: `NotFound`, `Conflict`, `Validation`,
//! `Configuration`, `Integrity`, `Transient`, `Expired`. Callers branch on
//! the category, log routing is driven by [`ErrorSeverity`], and
//! [`ErrorContext`] / [`RequestContext`] carry tracing metadata end to end.
//!
//! ```
//! use glueful_core::error::{Error, Result};
//!
//! fn lookup(id: &str) -> Result<()> {
//!     if id.is_empty() {
//!         return Err(Error::not_found("role not found"));
//!     }
//!     Ok(())
//! }
//! ```

pub mod codes;
pub mod context;
pub mod framework;
pub mod metrics;

pub use codes::{ErrorCategory, ErrorCode};
pub use context::{ErrorContext, RequestContext};
pub use framework::{Error, ErrorSeverity, Result};
pub use metrics::ErrorMetrics;
