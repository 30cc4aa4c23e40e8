//! Numeric error codes shared across the authorization, queue and validation
//! components. Ranges mirror the taxonomy in the error handling design:
//! each 1000-block maps to one `ErrorCategory`.

use std::fmt;

/// Stable numeric identifier for every error condition the system can raise.
///
/// Numbers are part of the wire contract (they show up in error envelopes)
/// so existing variants must never be renumbered; add new ones at the end
/// of their block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorCode {
    // --- System / internal (1000s) ---
    Internal = 1000,
    Configuration = 1001,
    ExtensionUnavailable = 1002,
    Timeout = 1003,

    // --- Store (2000s) ---
    StoreUnreachable = 2000,
    StoreConstraintViolation = 2001,
    StoreTransactionFailed = 2002,
    StoreQueryFailed = 2003,

    // --- Network / serialization (3000s) ---
    NetworkError = 3000,
    SerializationFailed = 3001,

    // --- Integrity (4000s) ---
    RoleCycleDetected = 4000,
    DanglingGrantReference = 4001,
    UnknownRole = 4002,
    UnknownPermission = 4003,

    // --- Validation (5000s) ---
    ValidationFailed = 5000,
    UnknownRule = 5001,
    InvalidRuleArguments = 5002,

    // --- Resource (6000s) ---
    NotFound = 6000,
    Conflict = 6001,

    // --- Expiry (7000s) ---
    GrantExpired = 7000,
    ReservationExpired = 7001,

    // --- Queue / job (8000s) ---
    QueueUnavailable = 8000,
    JobExecutionFailed = 8001,
    JobTimedOut = 8002,
    JobDeserializationFailed = 8003,

    // --- Scheduler / cron (9000s) ---
    ScheduleExpressionInvalid = 9000,
}

/// The seven error kinds the rest of the system reasons about. Every
/// `ErrorCode` belongs to exactly one category; callers branch on the
/// category, not the numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    NotFound,
    Conflict,
    Validation,
    Configuration,
    Integrity,
    Transient,
    Expired,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Integrity => "integrity",
            ErrorCategory::Transient => "transient",
            ErrorCategory::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

impl ErrorCode {
    pub fn category(&self) -> ErrorCategory {
        use ErrorCategory::*;
        match self {
            ErrorCode::Internal
            | ErrorCode::Configuration
            | ErrorCode::ExtensionUnavailable
            | ErrorCode::SerializationFailed
            | ErrorCode::ScheduleExpressionInvalid => Configuration,

            ErrorCode::StoreUnreachable
            | ErrorCode::StoreTransactionFailed
            | ErrorCode::StoreQueryFailed
            | ErrorCode::NetworkError
            | ErrorCode::Timeout
            | ErrorCode::QueueUnavailable
            | ErrorCode::JobExecutionFailed
            | ErrorCode::JobTimedOut => Transient,

            ErrorCode::RoleCycleDetected
            | ErrorCode::DanglingGrantReference
            | ErrorCode::UnknownRole
            | ErrorCode::UnknownPermission => Integrity,

            ErrorCode::ValidationFailed
            | ErrorCode::UnknownRule
            | ErrorCode::InvalidRuleArguments
            | ErrorCode::JobDeserializationFailed => Validation,

            ErrorCode::NotFound => NotFound,
            ErrorCode::Conflict | ErrorCode::StoreConstraintViolation => Conflict,

            ErrorCode::GrantExpired | ErrorCode::ReservationExpired => Expired,
        }
    }

    /// HTTP status an API boundary would report for this code. The core
    /// components never speak HTTP themselves, but every embedding service
    /// wants this mapping once rather than reinventing it.
    pub fn http_status(&self) -> u16 {
        match self.category() {
            ErrorCategory::NotFound => 404,
            ErrorCategory::Conflict => 409,
            ErrorCategory::Validation => 422,
            ErrorCategory::Configuration => 500,
            ErrorCategory::Integrity => 409,
            ErrorCategory::Transient => 503,
            ErrorCategory::Expired => 410,
        }
    }

    /// Whether a caller can reasonably retry the operation that produced
    /// this code. Only `Transient` errors are retryable; everything else
    /// requires the caller (or an operator) to change something first.
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} ({})", *self as u16)
    }
}
