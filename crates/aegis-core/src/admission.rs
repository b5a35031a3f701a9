//! Admission middleware
//!
//! Decides, before any downstream cost is incurred, whether a tenant's request
//! may proceed. Counting happens here and only here: a denied request never
//! reaches the concurrency gate.

use crate::config::QuotaConfig;
use crate::quota::{QuotaKey, QuotaMode, QuotaResult, QuotaStore, Ttl};
use crate::tenant::{InboundMessage, TenantId};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Outcome of admission for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Proceed
    Allow,
    /// Proceed, but the tenant is close to its limit
    WarnThreshold {
        /// Post-increment count
        count: u64,
        /// Configured limit
        limit: u64,
    },
    /// Over quota for the current window
    Deny {
        /// Post-increment count
        count: u64,
        /// Configured limit
        limit: u64,
        /// Time until the window resets, when known
        retry_after: Option<Duration>,
    },
}

impl Decision {
    /// Whether the request may proceed
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Deny { .. })
    }
}

/// Read-only view of a tenant's quota
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    /// Tenant
    pub tenant_id: TenantId,
    /// Store mode
    pub mode: QuotaMode,
    /// Requests counted in the current window
    pub count: u64,
    /// Configured limit
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Seconds until the window resets; `None` when no window is open
    pub reset_in_secs: Option<u64>,
}

/// Fixed-window admission control over a [`QuotaStore`]
pub struct AdmissionMiddleware {
    store: Arc<dyn QuotaStore>,
    config: QuotaConfig,
}

impl AdmissionMiddleware {
    /// Create middleware over `store`
    pub fn new(store: Arc<dyn QuotaStore>, config: QuotaConfig) -> Self {
        Self { store, config }
    }

    /// The underlying store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn QuotaStore> {
        &self.store
    }

    /// Quota settings
    #[must_use]
    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Counter key for `tenant`
    #[must_use]
    pub fn key_for(&self, tenant: &TenantId) -> QuotaKey {
        QuotaKey::new(&self.config.key_prefix, tenant)
    }

    fn near_limit(&self, count: u64) -> bool {
        let limit = self.config.request_limit;
        count <= limit && count as f64 > limit as f64 * self.config.warn_ratio
    }

    /// Count one request for `tenant` and decide.
    ///
    /// A store failure fails open: the request is allowed.
    pub async fn evaluate(&self, tenant: &TenantId) -> Decision {
        let key = self.key_for(tenant);
        let limit = self.config.request_limit;

        let count = match self.store.increment(&key).await {
            Ok(count) => count,
            Err(e) => {
                error!(
                    tenant = %tenant,
                    mode = %self.store.mode(),
                    error = %e,
                    "Quota store unavailable, admitting request"
                );
                return Decision::Allow;
            }
        };

        if count > limit {
            let retry_after = match self.store.ttl(&key).await {
                Ok(Ttl::Remaining(remaining)) if !remaining.is_zero() => Some(remaining),
                Ok(_) => None,
                Err(e) => {
                    debug!(tenant = %tenant, error = %e, "Quota TTL lookup failed");
                    None
                }
            };
            info!(
                tenant = %tenant,
                count,
                limit,
                retry_after_secs = retry_after.map(|d| d.as_secs()),
                "Request denied, quota exceeded"
            );
            return Decision::Deny {
                count,
                limit,
                retry_after,
            };
        }

        if self.near_limit(count) {
            warn!(tenant = %tenant, count, limit, "Tenant approaching request limit");
            return Decision::WarnThreshold { count, limit };
        }

        Decision::Allow
    }

    /// Admit an inbound message. Anonymous messages and short slash commands
    /// pass without being counted.
    pub async fn admit(&self, message: &InboundMessage) -> Decision {
        let Some(tenant) = &message.tenant else {
            debug!("Anonymous message admitted without counting");
            return Decision::Allow;
        };

        if self.config.command_bypass_max_len > 0
            && message.is_short_command(self.config.command_bypass_max_len)
        {
            debug!(tenant = %tenant, "Short command admitted without counting");
            return Decision::Allow;
        }

        self.evaluate(tenant).await
    }

    /// Current usage for `tenant`, without counting a request
    pub async fn usage(&self, tenant: &TenantId) -> QuotaResult<QuotaUsage> {
        let key = self.key_for(tenant);
        let count = self.store.current(&key).await?;
        let reset_in_secs = self.store.ttl(&key).await?.as_secs();
        let limit = self.config.request_limit;

        Ok(QuotaUsage {
            tenant_id: tenant.clone(),
            mode: self.store.mode(),
            count,
            limit,
            remaining: limit.saturating_sub(count),
            reset_in_secs,
        })
    }
}
