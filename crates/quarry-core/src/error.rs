use std::time::Duration;

use thiserror::Error;

/// Application-wide error types for Quarry.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (non-success status, bad URL, unreadable body).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request or source call timed out.
    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    /// The remote source told us to slow down (HTTP 429).
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// A caller-imposed bound elapsed while waiting for a rate-limit permit.
    #[error("Gave up waiting for a rate-limit permit for '{source_id}' after {}ms", waited.as_millis())]
    RateLimitTimeout { source_id: String, waited: Duration },

    /// A source payload could not be mapped into listings.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A cache tier could not serve a read or accept a write.
    #[error("Cache tier '{tier}' unavailable: {message}")]
    CacheTierUnavailable { tier: String, message: String },

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying on a later run.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::RateLimitExceeded
            | AppError::RateLimitTimeout { .. }
            | AppError::CacheTierUnavailable { .. } => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("HTTP 5")
            }
            _ => false,
        }
    }
}

/// A single connector could not complete its fetch.
///
/// Recovered locally by the orchestrator (isolation + fallback); never
/// propagated to the caller of `discover`.
#[derive(Error, Debug)]
#[error("source '{source_id}' failed: {cause}")]
pub struct SourceFailure {
    pub source_id: String,
    pub cause: AppError,
}

impl SourceFailure {
    pub fn new(source_id: impl Into<String>, cause: AppError) -> Self {
        Self {
            source_id: source_id.into(),
            cause,
        }
    }

    /// The connector did not answer within the per-source timeout.
    pub fn timed_out(source_id: impl Into<String>, after: Duration) -> Self {
        Self::new(source_id, AppError::Timeout(after.as_secs()))
    }

    /// The connector task panicked or was aborted.
    pub fn aborted(source_id: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self::new(
            source_id,
            AppError::Generic(format!("connector task aborted: {detail}")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(AppError::NetworkError("reset".into()).is_retryable());
        assert!(AppError::Timeout(30).is_retryable());
        assert!(AppError::RateLimitExceeded.is_retryable());
        assert!(
            AppError::RateLimitTimeout {
                source_id: "remoteok".into(),
                waited: Duration::from_secs(1),
            }
            .is_retryable()
        );
        assert!(AppError::HttpError("HTTP 503 for https://x".into()).is_retryable());
        assert!(!AppError::HttpError("HTTP 404 for https://x".into()).is_retryable());
        assert!(!AppError::ParseError("bad json".into()).is_retryable());
    }

    #[test]
    fn test_source_failure_display() {
        let failure = SourceFailure::timed_out("greenhouse", Duration::from_secs(30));
        assert_eq!(
            failure.to_string(),
            "source 'greenhouse' failed: Timed out after 30 seconds"
        );
    }

    #[test]
    fn test_rate_limit_timeout_display() {
        let err = AppError::RateLimitTimeout {
            source_id: "remoteok".into(),
            waited: Duration::from_millis(250),
        };
        assert!(err.to_string().contains("'remoteok' after 250ms"));
    }
}
