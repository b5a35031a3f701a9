//! Error types for aegis-llm

use std::time::Duration;
use thiserror::Error;

/// LLM error type
#[derive(Debug, Error)]
pub enum Error {
    /// Provider not configured
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    /// Non-retryable API error (4xx other than 429)
    #[error("api error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Sanitized error message
        message: String,
    },

    /// Rate limit exceeded (HTTP 429)
    #[error("rate limit exceeded")]
    RateLimit {
        /// Server-provided wait hint, if any
        retry_after: Option<Duration>,
    },

    /// Server-side failure (5xx)
    #[error("server error: {0}")]
    ServerError(String),

    /// Invalid response
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Network error
    #[error("network error: {0}")]
    Network(String),

    /// Timeout
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// Provider construction error
    #[error("provider error: {0}")]
    Provider(String),
}

impl Error {
    /// Whether the failure is worth retrying (rate limit, 5xx, network, timeout)
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RateLimit { .. } | Error::ServerError(_) | Error::Network(_) | Error::Timeout(_)
        )
    }

    /// Whether the server explicitly said "too many requests"
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimit { .. })
    }

    /// Server-provided wait hint
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimit { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::RateLimit { retry_after: None }.is_retryable());
        assert!(Error::ServerError("502".to_string()).is_retryable());
        assert!(Error::Network("connection reset".to_string()).is_retryable());
        assert!(Error::Timeout(30_000).is_retryable());

        assert!(!Error::Api {
            status: 401,
            message: "unauthorized".to_string()
        }
        .is_retryable());
        assert!(!Error::InvalidResponse("no choices".to_string()).is_retryable());
        assert!(!Error::NotConfigured("DEEPSEEK_API_KEY".to_string()).is_retryable());
    }

    #[test]
    fn test_retry_after_only_on_rate_limit() {
        let err = Error::RateLimit {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));

        assert_eq!(Error::Timeout(10).retry_after(), None);
    }
}
