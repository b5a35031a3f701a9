use super::{QuotaKey, QuotaMode, QuotaResult, QuotaStore, Ttl};
use crate::error::QuotaStoreError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// One tenant's counter in the current window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaRecord {
    /// Requests counted in this window
    pub count: u64,
    /// When the window opened
    pub window_start: Instant,
}

impl QuotaRecord {
    fn open(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    fn is_expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.window_start) >= window
    }

    /// Time left until the window resets
    #[must_use]
    pub fn remaining(&self, now: Instant, window: Duration) -> Duration {
        window.saturating_sub(now.saturating_duration_since(self.window_start))
    }
}

/// In-process fixed-window counter
///
/// There is no external TTL mechanism, so every access compares the record's
/// window start against the clock and resets it once the window has elapsed.
/// Best-effort only: counts are not shared between processes.
#[derive(Debug)]
pub struct LocalQuotaStore {
    records: DashMap<String, QuotaRecord>,
    /// Slots reserved for keys; never exceeds `max_keys`
    tracked: AtomicUsize,
    window: Duration,
    max_keys: usize,
}

impl LocalQuotaStore {
    /// Create a counter for `window`, tracking at most `max_keys` tenants
    #[must_use]
    pub fn new(window: Duration, max_keys: usize) -> Self {
        Self {
            records: DashMap::new(),
            tracked: AtomicUsize::new(0),
            window,
            max_keys,
        }
    }

    /// Window length
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Number of tracked keys (including not-yet-purged expired ones)
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no keys are tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of a key's live record
    #[must_use]
    pub fn record(&self, key: &str) -> Option<QuotaRecord> {
        let now = Instant::now();
        self.records
            .get(key)
            .map(|r| *r)
            .filter(|r| !r.is_expired(now, self.window))
    }

    /// Drop records whose window has elapsed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        self.records.retain(|_, r| {
            let keep = !r.is_expired(now, self.window);
            if !keep {
                purged += 1;
            }
            keep
        });
        if purged > 0 {
            self.tracked.fetch_sub(purged, Ordering::SeqCst);
            debug!(purged, "Purged expired local quota records");
        }
        purged
    }

    fn reserve_slot(&self) -> bool {
        self.tracked
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_keys).then_some(n + 1)
            })
            .is_ok()
    }

    /// Count one request for `key`
    pub fn increment_key(&self, key: &str) -> QuotaResult<u64> {
        let now = Instant::now();
        // The shard guard makes check-reset-increment atomic per key
        let bump = |record: &mut QuotaRecord| {
            if record.is_expired(now, self.window) {
                *record = QuotaRecord::open(now);
            }
            record.count += 1;
            record.count
        };

        if let Some(mut record) = self.records.get_mut(key) {
            return Ok(bump(record.value_mut()));
        }

        if !self.reserve_slot() {
            self.purge_expired();
            if !self.reserve_slot() {
                return Err(QuotaStoreError::LocalCapacity(self.max_keys));
            }
        }

        match self.records.entry(key.to_string()) {
            // Another caller inserted the key first
            Entry::Occupied(mut occupied) => {
                self.tracked.fetch_sub(1, Ordering::SeqCst);
                Ok(bump(occupied.get_mut()))
            }
            Entry::Vacant(vacant) => {
                let mut record = QuotaRecord::open(now);
                let count = bump(&mut record);
                vacant.insert(record);
                Ok(count)
            }
        }
    }
}

#[async_trait]
impl QuotaStore for LocalQuotaStore {
    fn mode(&self) -> QuotaMode {
        QuotaMode::Local
    }

    async fn increment(&self, key: &QuotaKey) -> QuotaResult<u64> {
        self.increment_key(key.as_str())
    }

    async fn ttl(&self, key: &QuotaKey) -> QuotaResult<Ttl> {
        let now = Instant::now();
        Ok(self
            .record(key.as_str())
            .map_or(Ttl::Untracked, |r| Ttl::Remaining(r.remaining(now, self.window))))
    }

    async fn current(&self, key: &QuotaKey) -> QuotaResult<u64> {
        Ok(self.record(key.as_str()).map_or(0, |r| r.count))
    }
}
