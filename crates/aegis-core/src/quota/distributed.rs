use super::{
    CounterBackend, LocalQuotaStore, QuotaKey, QuotaMode, QuotaResult, QuotaStore, Ttl,
    TTL_NO_EXPIRY,
};
use crate::error::QuotaStoreError;
use async_trait::async_trait;
use dashmap::DashSet;
use std::time::Duration;
use tracing::{error, info, warn};

/// Shared-counter quota store with per-call local fallback
///
/// A transport failure degrades only the failing call to the local counter;
/// the next call tries the shared backend again. Counts taken locally during
/// an outage are never reconciled with the shared counter.
///
/// A counter key must never be left without an expiry, or its window would
/// never reset. A failed `EXPIRE` is retried on this process's next increment
/// of the key, and any reader that finds a key with no expiry arms it.
pub struct DistributedQuotaStore<B> {
    backend: B,
    fallback: Option<LocalQuotaStore>,
    window: Duration,
    unarmed: DashSet<String>,
}

impl<B: CounterBackend> DistributedQuotaStore<B> {
    /// Create a store without a local fallback
    pub fn new(backend: B, window: Duration) -> Self {
        Self {
            backend,
            fallback: None,
            window,
            unarmed: DashSet::new(),
        }
    }

    /// Attach the local counter used when the backend fails
    #[must_use]
    pub fn with_fallback(mut self, local: LocalQuotaStore) -> Self {
        self.fallback = Some(local);
        self
    }

    /// The local fallback counter, if any
    #[must_use]
    pub fn fallback(&self) -> Option<&LocalQuotaStore> {
        self.fallback.as_ref()
    }

    async fn increment_shared(&self, key: &str) -> QuotaResult<u64> {
        let count = self.backend.incr(key).await?;

        // The caller that opened the window sets its expiry
        if count == 1 || self.unarmed.contains(key) {
            self.arm_expiry(key).await;
        }

        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Set the window expiry; on failure remember the key so the next
    /// increment tries again
    async fn arm_expiry(&self, key: &str) -> bool {
        match self.backend.expire(key, self.window.as_secs()).await {
            Ok(set) => {
                self.unarmed.remove(key);
                set
            }
            Err(e) => {
                error!(key = %key, error = %e, "Failed to set quota window expiry");
                self.unarmed.insert(key.to_string());
                false
            }
        }
    }

    fn degrade(&self, key: &QuotaKey, cause: &QuotaStoreError) -> QuotaResult<&LocalQuotaStore> {
        match &self.fallback {
            Some(local) => {
                warn!(
                    key = %key,
                    error = %cause,
                    "Shared quota backend unavailable, counting locally for this call"
                );
                Ok(local)
            }
            None => Err(cause.clone()),
        }
    }
}

#[async_trait]
impl<B: CounterBackend> QuotaStore for DistributedQuotaStore<B> {
    fn mode(&self) -> QuotaMode {
        QuotaMode::Distributed
    }

    async fn increment(&self, key: &QuotaKey) -> QuotaResult<u64> {
        match self.increment_shared(key.as_str()).await {
            Ok(count) => Ok(count),
            Err(e) => self.degrade(key, &e)?.increment_key(key.as_str()),
        }
    }

    async fn ttl(&self, key: &QuotaKey) -> QuotaResult<Ttl> {
        match self.backend.ttl(key.as_str()).await {
            Ok(TTL_NO_EXPIRY) => {
                info!(key = %key, "Quota key has no expiry, arming a fresh window");
                if self.arm_expiry(key.as_str()).await {
                    Ok(Ttl::Remaining(self.window))
                } else {
                    Ok(Ttl::Untracked)
                }
            }
            Ok(raw) => Ok(Ttl::from_backend(raw)),
            Err(e) => self.degrade(key, &e)?.ttl(key).await,
        }
    }

    async fn current(&self, key: &QuotaKey) -> QuotaResult<u64> {
        match self.backend.get(key.as_str()).await {
            Ok(value) => Ok(value.and_then(|v| u64::try_from(v).ok()).unwrap_or(0)),
            Err(e) => self.degrade(key, &e)?.current(key).await,
        }
    }
}
