//! Resilience layer configuration
//!
//! Deserializable from the `[resilience]` table of the application config.
//! Every field has a serde default so partial tables are valid.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level resilience configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Per-tenant quota tracking
    #[serde(default)]
    pub quota: QuotaConfig,
    /// Process-wide concurrency cap
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    /// Retry/backoff schedule
    #[serde(default)]
    pub retry: RetryConfig,
    /// User-facing degradation messages
    #[serde(default)]
    pub messages: MessagesConfig,
}

impl ResilienceConfig {
    /// Reject settings that would make the layer meaningless
    pub fn validate(&self) -> Result<()> {
        if self.quota.request_limit == 0 {
            return Err(invalid("quota.request_limit", "must be greater than 0"));
        }
        if self.quota.window_secs == 0 {
            return Err(invalid("quota.window_secs", "must be greater than 0"));
        }
        if !(self.quota.warn_ratio > 0.0 && self.quota.warn_ratio <= 1.0) {
            return Err(invalid("quota.warn_ratio", "must be in (0, 1]"));
        }
        if self.concurrency.max_concurrency == 0 {
            return Err(invalid("concurrency.max_concurrency", "must be greater than 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.backoff_min_secs > self.retry.backoff_max_secs {
            return Err(invalid(
                "retry.backoff_min_secs",
                "must not exceed retry.backoff_max_secs",
            ));
        }
        if !(self.retry.backoff_base >= 1.0 && self.retry.backoff_base.is_finite()) {
            return Err(invalid("retry.backoff_base", "must be a finite number of at least 1.0"));
        }
        let multiplier = self.retry.backoff_multiplier_secs;
        if !(0.0..=self.retry.backoff_max_secs as f64).contains(&multiplier) {
            return Err(invalid(
                "retry.backoff_multiplier_secs",
                "must be between 0 and retry.backoff_max_secs",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> Error {
    Error::InvalidConfig {
        field: field.to_string(),
        message: message.to_string(),
    }
}

/// Quota tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Requests allowed per tenant per window
    #[serde(default = "default_request_limit")]
    pub request_limit: u64,
    /// Fixed window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Fraction of the limit above which a warning is logged
    #[serde(default = "default_warn_ratio")]
    pub warn_ratio: f64,
    /// Counter key prefix (`{prefix}{tenant}:quota`)
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Count locally when the shared backend fails
    #[serde(default = "default_true")]
    pub local_fallback: bool,
    /// Maximum tenants tracked by the local counter
    #[serde(default = "default_local_max_keys")]
    pub local_max_keys: usize,
    /// Timeout for a single shared-backend command
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Slash commands shorter than this are admitted without counting (0 disables)
    #[serde(default = "default_command_bypass_max_len")]
    pub command_bypass_max_len: usize,
}

fn default_request_limit() -> u64 {
    50
}
fn default_window_secs() -> u64 {
    3600
}
fn default_warn_ratio() -> f64 {
    0.8
}
fn default_key_prefix() -> String {
    "user:".to_string()
}
fn default_true() -> bool {
    true
}
fn default_local_max_keys() -> usize {
    100_000
}
fn default_command_timeout_ms() -> u64 {
    500
}
fn default_command_bypass_max_len() -> usize {
    10
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            request_limit: default_request_limit(),
            window_secs: default_window_secs(),
            warn_ratio: default_warn_ratio(),
            key_prefix: default_key_prefix(),
            local_fallback: true,
            local_max_keys: default_local_max_keys(),
            command_timeout_ms: default_command_timeout_ms(),
            command_bypass_max_len: default_command_bypass_max_len(),
        }
    }
}

impl QuotaConfig {
    /// Window length
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Shared-backend command timeout
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Concurrency gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Maximum simultaneous downstream calls
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_max_concurrency() -> usize {
    10
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Retry schedule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Lower clamp of the computed delay
    #[serde(default = "default_backoff_min_secs")]
    pub backoff_min_secs: u64,
    /// Upper clamp of the computed delay (and of server wait hints)
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    /// Multiplier applied to `base^(attempt-1)`
    #[serde(default = "default_backoff_multiplier_secs")]
    pub backoff_multiplier_secs: f64,
    /// Exponential base
    #[serde(default = "default_backoff_base")]
    pub backoff_base: f64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_min_secs() -> u64 {
    2
}
fn default_backoff_max_secs() -> u64 {
    60
}
fn default_backoff_multiplier_secs() -> f64 {
    1.0
}
fn default_backoff_base() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_min_secs: default_backoff_min_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            backoff_multiplier_secs: default_backoff_multiplier_secs(),
            backoff_base: default_backoff_base(),
        }
    }
}

/// Placeholder replaced with the seconds until the quota window resets
pub const RETRY_AFTER_PLACEHOLDER: &str = "{retry_after}";

/// User-facing messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesConfig {
    /// Sent when the tenant is over quota
    #[serde(default = "default_throttle_message")]
    pub throttle: String,
    /// Sent when the downstream call could not be completed
    #[serde(default = "default_fallback_message")]
    pub fallback: String,
}

fn default_throttle_message() -> String {
    "⌛ You have used up your hourly request limit.\nPlease try again in {retry_after} seconds."
        .to_string()
}

fn default_fallback_message() -> String {
    "⚠️ The assistant is temporarily unavailable. Please try again in a few minutes.".to_string()
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            throttle: default_throttle_message(),
            fallback: default_fallback_message(),
        }
    }
}
