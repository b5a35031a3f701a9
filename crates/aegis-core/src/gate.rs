//! Concurrency Gate
//!
//! Caps how many downstream generation calls run at once, process-wide.
//! Shared by all tenants: no per-tenant sub-limits and no ordering guarantee
//! among waiters.

use crate::error::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Bounded pool of downstream-call slots
#[derive(Debug)]
pub struct ConcurrencyGate {
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

/// Point-in-time gate usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateStats {
    /// Configured capacity
    pub capacity: usize,
    /// Slots currently held
    pub in_use: usize,
}

impl ConcurrencyGate {
    /// Create a gate with `capacity` slots
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Wait for a slot. Suspends cooperatively; fails only once the gate is closed.
    pub async fn acquire(&self) -> Result<GatePermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::GateClosed)?;
        debug!(in_use = self.in_use(), capacity = self.capacity, "Gate slot acquired");
        Ok(GatePermit { _permit: permit })
    }

    /// Wait for a slot unless `cancel` fires first. A cancelled wait holds nothing.
    pub async fn acquire_cancellable(&self, cancel: &CancellationToken) -> Result<GatePermit> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            permit = self.acquire() => permit,
        }
    }

    /// Take a slot only if one is free right now
    pub fn try_acquire(&self) -> Option<GatePermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| GatePermit { _permit: permit })
    }

    /// Stop handing out slots; current and future waiters get [`Error::GateClosed`]
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Configured capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }

    /// Usage snapshot
    #[must_use]
    pub fn stats(&self) -> GateStats {
        GateStats {
            capacity: self.capacity,
            in_use: self.in_use(),
        }
    }
}

/// A held slot. Released when dropped, so every exit path (success, error,
/// panic unwind, cancellation of the owning future) gives it back exactly once.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl GatePermit {
    /// Release the slot now
    pub fn release(self) {
        drop(self);
    }
}
