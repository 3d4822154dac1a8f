//! Error taxonomy for the Pulse backend.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// A single field-level validation failure, usually decoded from a
/// JSON:API `errors[].source.pointer`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

/// Main error type for backend operations.
///
/// Variants carry owned strings so the error is `Clone`; coalesced
/// in-flight requests hand the same error to every waiter.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Upstream rejected our credential (401/403)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Input failed validation
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        fields: Vec<FieldError>,
    },

    /// Upstream asked us to slow down (429)
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Upstream returned a 5xx
    #[error("Upstream server error: {0}")]
    Server(String),

    /// Transport-level failure before a response was received
    #[error("Network error: {0}")]
    Network(String),

    /// A deadline or per-attempt timeout expired
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Database failure that is not worth retrying
    #[error("Database error: {0}")]
    Database(String),

    /// Database failure classified as transient (connection reset,
    /// serialization failure); bounded retry applies
    #[error("Transient database error: {0}")]
    TransientDatabase(String),

    /// Constraint violation (foreign key, unique)
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// Operation cancelled by deadline or shutdown
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Serialization / deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a validation error without field detail.
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
            fields: Vec::new(),
        }
    }

    /// Whether a local retry is appropriate for this error kind.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RateLimited { .. }
                | Error::Server(_)
                | Error::Network(_)
                | Error::Timeout(_)
                | Error::TransientDatabase(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }

    /// Delay requested by the upstream, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Stable machine-readable code surfaced to API callers.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Authentication(_) => "AUTHENTICATION",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Validation { .. } => "VALIDATION",
            Error::RateLimited { .. } => "RATE_LIMITED",
            Error::Server(_) => "UPSTREAM_SERVER",
            Error::Network(_) => "NETWORK",
            Error::Timeout(_) => "TIMEOUT",
            Error::Database(_) => "DATABASE",
            Error::TransientDatabase(_) => "DATABASE_TRANSIENT",
            Error::Integrity(_) => "INTEGRITY",
            Error::Cancelled(_) => "CANCELLED",
            Error::Serialization(_) => "SERIALIZATION",
            Error::Config(_) => "CONFIG",
            Error::Internal(_) => "INTERNAL",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::Config(format!("invalid URL: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(Error::Server("boom".into()).is_retryable());
        assert!(Error::Network("reset".into()).is_retryable());
        assert!(Error::Timeout("deadline".into()).is_retryable());
        assert!(Error::TransientDatabase("40001".into()).is_retryable());
        assert!(Error::RateLimited {
            message: "slow down".into(),
            retry_after: None
        }
        .is_retryable());

        assert!(!Error::Authentication("bad key".into()).is_retryable());
        assert!(!Error::NotFound("campaign x".into()).is_retryable());
        assert!(!Error::validation("bad input").is_retryable());
        assert!(!Error::Integrity("fk".into()).is_retryable());
    }

    #[test]
    fn retry_after_only_on_rate_limit() {
        let err = Error::RateLimited {
            message: "429".into(),
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(Error::Server("x".into()).retry_after(), None);
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::validation("x").code(), "VALIDATION");
        assert_eq!(Error::Cancelled("x".into()).code(), "CANCELLED");
    }
}
