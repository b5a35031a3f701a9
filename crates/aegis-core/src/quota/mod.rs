//! Per-tenant quota tracking
//!
//! A fixed-window request counter per tenant, behind the [`QuotaStore`] trait:
//!
//! - [`DistributedQuotaStore`]: shared atomic counter (Redis `INCR`/`EXPIRE`)
//!   with a per-call local fallback when the backend fails
//! - [`LocalQuotaStore`]: single-process counter with its own window expiry
//!
//! Which one is used is decided once, at startup, by [`probe`].

mod backend;
mod distributed;
mod local;

pub use backend::{CounterBackend, RedisBackend, TTL_MISSING, TTL_NO_EXPIRY};
pub use distributed::DistributedQuotaStore;
pub use local::{LocalQuotaStore, QuotaRecord};

#[cfg(test)]
pub use backend::MockCounterBackend;

use crate::config::QuotaConfig;
use crate::error::QuotaStoreError;
use crate::tenant::TenantId;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Result type for quota store operations
pub type QuotaResult<T> = std::result::Result<T, QuotaStoreError>;

/// Counter key for one tenant
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuotaKey(String);

impl QuotaKey {
    /// Build `{prefix}{tenant}:quota`
    #[must_use]
    pub fn new(prefix: &str, tenant: &TenantId) -> Self {
        Self(format!("{}{}:quota", prefix, tenant))
    }

    /// Borrow as str
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuotaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remaining lifetime of a quota window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Window resets after this long
    Remaining(Duration),
    /// No window is being tracked for the key
    Untracked,
}

impl Ttl {
    /// Map a raw backend `TTL` reply (negative sentinels mean untracked)
    #[must_use]
    pub fn from_backend(raw: i64) -> Self {
        if raw >= 0 {
            Ttl::Remaining(Duration::from_secs(raw as u64))
        } else {
            Ttl::Untracked
        }
    }

    /// Remaining seconds, if tracked
    #[must_use]
    pub fn as_secs(&self) -> Option<u64> {
        match self {
            Ttl::Remaining(d) => Some(d.as_secs()),
            Ttl::Untracked => None,
        }
    }
}

/// Which implementation the capability probe selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuotaMode {
    /// Shared counter service, globally synchronized
    Distributed,
    /// In-process counter only
    Local,
}

impl fmt::Display for QuotaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaMode::Distributed => f.write_str("DISTRIBUTED"),
            QuotaMode::Local => f.write_str("LOCAL"),
        }
    }
}

/// Fixed-window counter store
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Mode selected at construction
    fn mode(&self) -> QuotaMode;

    /// Count one request and return the post-increment count
    async fn increment(&self, key: &QuotaKey) -> QuotaResult<u64>;

    /// Time left in the key's current window
    async fn ttl(&self, key: &QuotaKey) -> QuotaResult<Ttl>;

    /// Current count without incrementing (0 when untracked)
    async fn current(&self, key: &QuotaKey) -> QuotaResult<u64>;
}

/// Build the local fallback counter described by `config`, if enabled
#[must_use]
pub fn local_fallback(config: &QuotaConfig) -> Option<LocalQuotaStore> {
    config
        .local_fallback
        .then(|| LocalQuotaStore::new(config.window(), config.local_max_keys))
}

/// Capability probe: DISTRIBUTED when the backend answers, LOCAL otherwise
pub async fn probe<B>(backend: B, config: &QuotaConfig) -> Arc<dyn QuotaStore>
where
    B: CounterBackend + 'static,
{
    match backend.ping().await {
        Ok(()) => {
            info!(mode = %QuotaMode::Distributed, "Quota store initialized");
            let mut store = DistributedQuotaStore::new(backend, config.window());
            if let Some(local) = local_fallback(config) {
                store = store.with_fallback(local);
            }
            Arc::new(store)
        }
        Err(e) => {
            warn!(
                mode = %QuotaMode::Local,
                error = %e,
                "Shared quota backend unreachable, using local counter"
            );
            Arc::new(LocalQuotaStore::new(config.window(), config.local_max_keys))
        }
    }
}

/// Select a store for a Redis URL (`None` forces LOCAL)
pub async fn select_quota_store(
    redis_url: Option<&str>,
    config: &QuotaConfig,
) -> Arc<dyn QuotaStore> {
    let Some(url) = redis_url else {
        info!(mode = %QuotaMode::Local, "Shared quota backend disabled");
        return Arc::new(LocalQuotaStore::new(config.window(), config.local_max_keys));
    };

    match RedisBackend::new(url, config.command_timeout()) {
        Ok(backend) => probe(backend, config).await,
        Err(e) => {
            warn!(error = %e, "Invalid Redis URL, using local counter");
            Arc::new(LocalQuotaStore::new(config.window(), config.local_max_keys))
        }
    }
}

#[cfg(test)]
mod tests;
