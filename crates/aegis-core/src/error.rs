//! Error types for aegis-core
//!
//! Only terminal outcomes are represented here. Shared-counter faults stay in
//! [`QuotaStoreError`] and are absorbed by the fallback path; an over-quota
//! tenant is an ordinary [`crate::Decision::Deny`], not an error.

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Downstream rejected the request in a way retrying cannot fix
    #[error("permanent downstream error after {attempts} attempt(s): {cause}")]
    PermanentDownstream {
        /// Attempts made (always 1 unless the failure changed class mid-way)
        attempts: u32,
        /// Cause description
        cause: String,
    },

    /// Retry schedule exhausted on transient failures
    #[error("retries exhausted after {attempts} attempts: {last_cause}")]
    ExhaustedRetries {
        /// Attempts made
        attempts: u32,
        /// Last transient failure
        last_cause: String,
    },

    /// Enclosing request was cancelled
    #[error("request cancelled")]
    Cancelled,

    /// Concurrency gate was closed (shutdown)
    #[error("concurrency gate closed")]
    GateClosed,

    /// Invalid configuration
    #[error("invalid configuration: {field}")]
    InvalidConfig {
        /// Config field name
        field: String,
        /// Detailed message
        message: String,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Quota store failure (absorbed by the fallback path, never surfaced to users)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaStoreError {
    /// Shared backend could not be reached or returned an error
    #[error("shared counter backend unavailable: {0}")]
    Unavailable(String),

    /// Shared backend did not answer in time
    #[error("shared counter backend timed out after {0}ms")]
    Timeout(u64),

    /// Local counter is tracking as many tenants as it may
    #[error("local quota counter full ({0} tenants)")]
    LocalCapacity(usize),
}

/// Trait for user-friendly error messages
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get a suggestion for how to fix the error
    fn suggestion(&self) -> Option<String>;
}

impl UserFriendlyError for Error {
    fn user_message(&self) -> String {
        match self {
            Error::PermanentDownstream { .. } => {
                "🤖 The assistant could not process this request.".to_string()
            }
            Error::ExhaustedRetries { attempts, .. } => {
                format!("⏳ The assistant did not respond after {} attempts.", attempts)
            }
            Error::Cancelled => "✋ Request cancelled.".to_string(),
            Error::GateClosed => "🛑 The assistant is shutting down.".to_string(),
            Error::InvalidConfig { field, message } => {
                format!("⚙️ Configuration error in '{}': {}", field, message)
            }
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            Error::PermanentDownstream { .. } => {
                Some("💡 Check DEEPSEEK_API_KEY and the request payload.".to_string())
            }
            Error::ExhaustedRetries { .. } => {
                Some("💡 The provider is overloaded; try again in a few minutes.".to_string())
            }
            Error::InvalidConfig { field, .. } => Some(format!(
                "💡 Check the '{}' setting in config/default.toml or .env file.",
                field
            )),
            Error::Cancelled | Error::GateClosed => None,
        }
    }
}

/// Format an error for display in the CLI
pub fn format_error_for_cli(error: &Error) -> String {
    let mut output = error.user_message();

    if let Some(suggestion) = error.suggestion() {
        output.push_str("\n\n");
        output.push_str(&suggestion);
    }

    output
}
