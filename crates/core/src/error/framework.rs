//! Structured error type shared by the authorization, queue and validation
//! components.
//!
//! Every fallible operation returns `crate::error::Result<T>`. Errors carry
//! an `ErrorCode` (for programmatic matching), a human message, optional
//! structured `details`, an `ErrorContext` for tracing, a severity for log
//! routing, and an optional boxed cause for the underlying error.

use super::codes::{ErrorCategory, ErrorCode};
use super::context::ErrorContext;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

/// How loudly an error should be logged. Distinct from `ErrorCategory`:
/// a `Validation` error is always `Low` (the caller sent bad input), while
/// a `Transient` error might be `Medium` on first occurrence and escalate
/// only if it persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// One variant per taxonomy kind in the error handling design (`Internal`
/// is a catch-all for unexpected states rather than a reportable category).
/// Every variant carries the same fields; `thiserror` derives `Display` and
/// `std::error::Error` from the `#[error(...)]`/`#[source]` attributes below.
#[derive(Debug, ThisError, Serialize, Deserialize)]
pub enum Error {
    #[error("[{code}] {message}")]
    NotFound {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
        context: ErrorContext,
        severity: ErrorSeverity,
        #[serde(skip)]
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    #[error("[{code}] {message}")]
    Conflict {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
        context: ErrorContext,
        severity: ErrorSeverity,
        #[serde(skip)]
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    #[error("[{code}] {message}")]
    Validation {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
        context: ErrorContext,
        severity: ErrorSeverity,
        #[serde(skip)]
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    #[error("[{code}] {message}")]
    Configuration {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
        context: ErrorContext,
        severity: ErrorSeverity,
        #[serde(skip)]
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    #[error("[{code}] {message}")]
    Integrity {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
        context: ErrorContext,
        severity: ErrorSeverity,
        #[serde(skip)]
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    #[error("[{code}] {message}")]
    Transient {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
        context: ErrorContext,
        severity: ErrorSeverity,
        #[serde(skip)]
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    #[error("[{code}] {message}")]
    Expired {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
        context: ErrorContext,
        severity: ErrorSeverity,
        #[serde(skip)]
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    #[error("[{code}] {message}")]
    Internal {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
        context: ErrorContext,
        severity: ErrorSeverity,
        #[serde(skip)]
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

macro_rules! for_each_variant {
    ($self:expr, |$code:ident, $message:ident, $details:ident, $context:ident, $severity:ident, $cause:ident| $body:expr) => {
        match $self {
            Error::NotFound { code: $code, message: $message, details: $details, context: $context, severity: $severity, cause: $cause }
            | Error::Conflict { code: $code, message: $message, details: $details, context: $context, severity: $severity, cause: $cause }
            | Error::Validation { code: $code, message: $message, details: $details, context: $context, severity: $severity, cause: $cause }
            | Error::Configuration { code: $code, message: $message, details: $details, context: $context, severity: $severity, cause: $cause }
            | Error::Integrity { code: $code, message: $message, details: $details, context: $context, severity: $severity, cause: $cause }
            | Error::Transient { code: $code, message: $message, details: $details, context: $context, severity: $severity, cause: $cause }
            | Error::Expired { code: $code, message: $message, details: $details, context: $context, severity: $severity, cause: $cause }
            | Error::Internal { code: $code, message: $message, details: $details, context: $context, severity: $severity, cause: $cause } => $body,
        }
    };
}

impl Error {
    /// Builds the variant matching `code`'s category (`Internal` is
    /// reserved for `ErrorCode::Internal` regardless of its nominal
    /// category, matching the `Internal` catch-all's role as "unexpected
    /// state" rather than a taxonomy kind callers branch on).
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        let severity = default_severity_for_code(code);
        let context = ErrorContext::new();

        if matches!(code, ErrorCode::Internal) {
            return Error::Internal { code, message, details: None, context, severity, cause: None };
        }

        match code.category() {
            ErrorCategory::NotFound => {
                Error::NotFound { code, message, details: None, context, severity, cause: None }
            }
            ErrorCategory::Conflict => {
                Error::Conflict { code, message, details: None, context, severity, cause: None }
            }
            ErrorCategory::Validation => {
                Error::Validation { code, message, details: None, context, severity, cause: None }
            }
            ErrorCategory::Configuration => {
                Error::Configuration { code, message, details: None, context, severity, cause: None }
            }
            ErrorCategory::Integrity => {
                Error::Integrity { code, message, details: None, context, severity, cause: None }
            }
            ErrorCategory::Transient => {
                Error::Transient { code, message, details: None, context, severity, cause: None }
            }
            ErrorCategory::Expired => {
                Error::Expired { code, message, details: None, context, severity, cause: None }
            }
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        for_each_variant!(&mut self, |_code, _message, d, _context, _severity, _cause| {
            *d = Some(details)
        });
        self
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        for_each_variant!(&mut self, |_code, _message, _details, c, _severity, _cause| {
            *c = context
        });
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        for_each_variant!(&mut self, |_code, _message, _details, _context, s, _cause| {
            *s = severity
        });
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        for_each_variant!(&mut self, |_code, _message, _details, _context, _severity, c| {
            *c = Some(Box::new(cause))
        });
        self
    }

    pub fn add_trace(mut self, trace: impl Into<String>) -> Self {
        let trace = trace.into();
        for_each_variant!(&mut self, |_code, _message, _details, context, _severity, _cause| {
            *context = std::mem::take(context).add_trace(trace)
        });
        self
    }

    pub fn add_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        let key = key.into();
        for_each_variant!(&mut self, |_code, _message, _details, context, _severity, _cause| {
            context.add_metadata(key, value)
        });
        self
    }

    pub fn code(&self) -> ErrorCode {
        for_each_variant!(self, |code, _message, _details, _context, _severity, _cause| *code)
    }

    pub fn message(&self) -> &str {
        for_each_variant!(self, |_code, message, _details, _context, _severity, _cause| message)
    }

    pub fn details(&self) -> Option<&serde_json::Value> {
        for_each_variant!(self, |_code, _message, details, _context, _severity, _cause| details.as_ref())
    }

    pub fn context(&self) -> &ErrorContext {
        for_each_variant!(self, |_code, _message, _details, context, _severity, _cause| context)
    }

    pub fn severity(&self) -> ErrorSeverity {
        for_each_variant!(self, |_code, _message, _details, _context, severity, _cause| *severity)
    }

    pub fn category(&self) -> ErrorCategory {
        self.code().category()
    }

    pub fn http_status(&self) -> u16 {
        self.code().http_status()
    }

    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    pub fn should_log_as_error(&self) -> bool {
        matches!(self.severity(), ErrorSeverity::High | ErrorSeverity::Critical)
    }

    // --- Convenience constructors, one per taxonomy kind ---

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Configuration, message)
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RoleCycleDetected, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StoreUnreachable, message)
    }

    pub fn expired(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::GrantExpired, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message).with_severity(ErrorSeverity::High)
    }

    /// API-facing JSON envelope. Omits `cause` and any detail that could
    /// leak internal state when `production` is true.
    pub fn to_api_response(&self, production: bool) -> serde_json::Value {
        if production {
            self.sanitize_for_production()
        } else {
            serde_json::json!({
                "error": {
                    "code": self.code() as u16,
                    "category": self.category().to_string(),
                    "message": self.message(),
                    "details": self.details(),
                    "error_id": self.context().error_id,
                    "request_id": self.context().request_id,
                }
            })
        }
    }

    /// A generic, safe-to-expose message per category, used in production
    /// responses so internal details never reach an external caller.
    fn sanitize_for_production(&self) -> serde_json::Value {
        let message = match self.category() {
            ErrorCategory::NotFound => "The requested resource was not found.",
            ErrorCategory::Conflict => "The request conflicts with the current state.",
            ErrorCategory::Validation => self.message(),
            ErrorCategory::Configuration => "The service is misconfigured.",
            ErrorCategory::Integrity => "The request violates a data integrity constraint.",
            ErrorCategory::Transient => "The service is temporarily unavailable. Please retry.",
            ErrorCategory::Expired => "The referenced grant or reservation has expired.",
        };
        serde_json::json!({
            "error": {
                "code": self.code() as u16,
                "category": self.category().to_string(),
                "message": message,
                "error_id": self.context().error_id,
            }
        })
    }

    pub fn to_debug_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code() as u16,
            "category": self.category().to_string(),
            "message": self.message(),
            "details": self.details(),
            "severity": format!("{:?}", self.severity()),
            "context": self.context(),
            "cause": std::error::Error::source(self).map(|c| c.to_string()),
        })
    }
}

fn default_severity_for_code(code: ErrorCode) -> ErrorSeverity {
    match code.category() {
        ErrorCategory::Validation | ErrorCategory::NotFound | ErrorCategory::Expired => {
            ErrorSeverity::Low
        }
        ErrorCategory::Conflict | ErrorCategory::Transient => ErrorSeverity::Medium,
        ErrorCategory::Integrity => ErrorSeverity::High,
        ErrorCategory::Configuration => ErrorSeverity::Critical,
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Error::new(ErrorCode::NotFound, "Record not found"),
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    Error::new(ErrorCode::Conflict, "Unique constraint violated").with_cause(err)
                } else if db_err.is_foreign_key_violation() {
                    Error::new(
                        ErrorCode::StoreConstraintViolation,
                        "Foreign key constraint violated",
                    )
                    .with_cause(err)
                } else {
                    Error::new(ErrorCode::StoreQueryFailed, "Database query failed").with_cause(err)
                }
            }
            sqlx::Error::PoolTimedOut => {
                Error::new(ErrorCode::StoreUnreachable, "Connection pool exhausted").with_cause(err)
            }
            sqlx::Error::Io(_) => {
                Error::new(ErrorCode::StoreUnreachable, "Database connection error").with_cause(err)
            }
            _ => Error::new(ErrorCode::StoreTransactionFailed, "Database error").with_cause(err),
        }
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
            Error::new(ErrorCode::StoreUnreachable, "Key-value store unreachable").with_cause(err)
        } else {
            Error::new(ErrorCode::StoreQueryFailed, "Key-value store error").with_cause(err)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::new(
            ErrorCode::JobDeserializationFailed,
            "Payload (de)serialization failed",
        )
        .with_cause(err)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::new(ErrorCode::Configuration, format!("Configuration error: {err}")).with_cause(err)
    }
}

impl From<cron::error::Error> for Error {
    fn from(err: cron::error::Error) -> Self {
        Error::new(
            ErrorCode::ScheduleExpressionInvalid,
            format!("Invalid cron expression: {err}"),
        )
        .with_cause(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_severity_matches_category() {
        let err = Error::validation("bad field");
        assert_eq!(err.severity(), ErrorSeverity::Low);
        assert_eq!(err.http_status(), 422);
        assert!(!err.is_retryable());
    }

    #[test]
    fn transient_errors_are_retryable() {
        let err = Error::transient("store down");
        assert!(err.is_retryable());
        assert_eq!(err.category(), ErrorCategory::Transient);
    }

    #[test]
    fn production_response_hides_internal_message() {
        let err = Error::internal("leaked table name: user_secrets")
            .with_details(serde_json::json!({"table": "user_secrets"}));
        let response = err.to_api_response(true);
        let message = response["error"]["message"].as_str().unwrap();
        assert!(!message.contains("user_secrets"));
    }
}
