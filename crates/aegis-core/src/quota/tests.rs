use super::*;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::time::{advance, Instant};

const WINDOW: Duration = Duration::from_secs(60);

/// In-memory stand-in for the shared counter service, with Redis TTL semantics
#[derive(Default)]
struct MemoryBackend {
    entries: Mutex<HashMap<String, (i64, Option<Instant>)>>,
    down: AtomicBool,
}

impl MemoryBackend {
    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> QuotaResult<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(QuotaStoreError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }

    fn live(entries: &mut HashMap<String, (i64, Option<Instant>)>, key: &str) {
        let now = Instant::now();
        if matches!(entries.get(key), Some((_, Some(at))) if *at <= now) {
            entries.remove(key);
        }
    }
}

#[async_trait]
impl CounterBackend for MemoryBackend {
    async fn ping(&self) -> QuotaResult<()> {
        self.check()
    }

    async fn incr(&self, key: &str) -> QuotaResult<i64> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        Self::live(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert((0, None));
        entry.0 += 1;
        Ok(entry.0)
    }

    async fn expire(&self, key: &str, seconds: u64) -> QuotaResult<bool> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        Self::live(&mut entries, key);
        match entries.get_mut(key) {
            Some(entry) => {
                entry.1 = Some(Instant::now() + Duration::from_secs(seconds));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> QuotaResult<i64> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        Self::live(&mut entries, key);
        Ok(match entries.get(key) {
            None => TTL_MISSING,
            Some((_, None)) => TTL_NO_EXPIRY,
            Some((_, Some(at))) => at.saturating_duration_since(Instant::now()).as_secs() as i64,
        })
    }

    async fn get(&self, key: &str) -> QuotaResult<Option<i64>> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        Self::live(&mut entries, key);
        Ok(entries.get(key).map(|e| e.0))
    }
}

fn key(tenant: &str) -> QuotaKey {
    QuotaKey::new("user:", &TenantId::new(tenant))
}

#[test]
fn test_quota_key_format() {
    assert_eq!(key("42").as_str(), "user:42:quota");
}

#[test]
fn test_ttl_from_backend_sentinels() {
    assert_eq!(Ttl::from_backend(TTL_MISSING), Ttl::Untracked);
    assert_eq!(Ttl::from_backend(TTL_NO_EXPIRY), Ttl::Untracked);
    assert_eq!(Ttl::from_backend(30).as_secs(), Some(30));
}

// ----------------------------------------------------------------------------
// LocalQuotaStore
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_local_counts_within_window_and_resets() {
    let store = LocalQuotaStore::new(WINDOW, 100);
    let k = key("a");

    assert_eq!(store.increment(&k).await.unwrap(), 1);
    advance(Duration::from_secs(10)).await;
    assert_eq!(store.increment(&k).await.unwrap(), 2);
    assert_eq!(store.current(&k).await.unwrap(), 2);

    advance(Duration::from_secs(51)).await;
    assert_eq!(store.current(&k).await.unwrap(), 0);
    assert_eq!(store.increment(&k).await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_local_ttl() {
    let store = LocalQuotaStore::new(WINDOW, 100);
    let k = key("a");

    assert_eq!(store.ttl(&k).await.unwrap(), Ttl::Untracked);

    store.increment(&k).await.unwrap();
    advance(Duration::from_secs(20)).await;
    assert_eq!(store.ttl(&k).await.unwrap(), Ttl::Remaining(Duration::from_secs(40)));

    advance(Duration::from_secs(40)).await;
    assert_eq!(store.ttl(&k).await.unwrap(), Ttl::Untracked);
}

#[tokio::test(start_paused = true)]
async fn test_local_capacity_and_purge() {
    let store = LocalQuotaStore::new(WINDOW, 2);

    store.increment(&key("a")).await.unwrap();
    store.increment(&key("b")).await.unwrap();
    assert_eq!(
        store.increment(&key("c")).await,
        Err(QuotaStoreError::LocalCapacity(2))
    );
    // Known keys still count at capacity
    assert_eq!(store.increment(&key("a")).await.unwrap(), 2);

    advance(WINDOW).await;
    assert_eq!(store.increment(&key("c")).await.unwrap(), 1);
    assert_eq!(store.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_local_capacity_holds_under_concurrent_new_keys() {
    let store = Arc::new(LocalQuotaStore::new(Duration::from_secs(3600), 10));

    let tasks: Vec<_> = (0..64)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move { store.increment(&key(&format!("t{i}"))).await })
        })
        .collect();
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let admitted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(admitted, 10);
    assert!(results
        .iter()
        .filter(|r| r.is_err())
        .all(|r| *r == Err(QuotaStoreError::LocalCapacity(10))));
    assert_eq!(store.len(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_local_concurrent_increments_are_not_lost() {
    let store = Arc::new(LocalQuotaStore::new(Duration::from_secs(3600), 10));
    let k = key("hot");

    let tasks: Vec<_> = (0..200)
        .map(|_| {
            let store = store.clone();
            let k = k.clone();
            tokio::spawn(async move { store.increment(&k).await.unwrap() })
        })
        .collect();

    let mut counts: Vec<u64> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    counts.sort_unstable();

    assert_eq!(counts, (1..=200).collect::<Vec<u64>>());
    assert_eq!(store.current(&k).await.unwrap(), 200);
}

// ----------------------------------------------------------------------------
// DistributedQuotaStore
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_expiry_set_only_when_window_opens() {
    let mut backend = MockCounterBackend::new();
    let mut next = 0;
    backend.expect_incr().times(3).returning(move |_| {
        next += 1;
        Ok(next)
    });
    backend
        .expect_expire()
        .withf(|key, secs| key.to_string() == "user:a:quota" && *secs == 3600)
        .times(1)
        .returning(|_, _| Ok(true));

    let store = DistributedQuotaStore::new(backend, Duration::from_secs(3600));
    let k = key("a");
    assert_eq!(store.increment(&k).await.unwrap(), 1);
    assert_eq!(store.increment(&k).await.unwrap(), 2);
    assert_eq!(store.increment(&k).await.unwrap(), 3);
}

#[tokio::test]
async fn test_failed_expiry_is_rearmed_on_next_increment() {
    let mut backend = MockCounterBackend::new();
    let mut next = 0;
    backend.expect_incr().times(3).returning(move |_| {
        next += 1;
        Ok(next)
    });
    let mut failed = false;
    backend.expect_expire().times(2).returning(move |_, _| {
        if failed {
            Ok(true)
        } else {
            failed = true;
            Err(QuotaStoreError::Timeout(500))
        }
    });

    let local = LocalQuotaStore::new(WINDOW, 10);
    let store = DistributedQuotaStore::new(backend, WINDOW).with_fallback(local);
    let k = key("a");

    assert_eq!(store.increment(&k).await.unwrap(), 1);
    assert_eq!(store.increment(&k).await.unwrap(), 2);
    // Armed by the second increment, the third leaves the expiry alone
    assert_eq!(store.increment(&k).await.unwrap(), 3);
    // Counts came from the shared backend, not the fallback
    assert!(store.fallback().unwrap().is_empty());
}

/// Fails the first `EXPIRE`, otherwise behaves like [`MemoryBackend`]
#[derive(Default)]
struct FirstExpireFails {
    inner: MemoryBackend,
    failed: AtomicBool,
}

#[async_trait]
impl CounterBackend for FirstExpireFails {
    async fn ping(&self) -> QuotaResult<()> {
        self.inner.ping().await
    }

    async fn incr(&self, key: &str) -> QuotaResult<i64> {
        self.inner.incr(key).await
    }

    async fn expire(&self, key: &str, seconds: u64) -> QuotaResult<bool> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(QuotaStoreError::Timeout(500));
        }
        self.inner.expire(key, seconds).await
    }

    async fn ttl(&self, key: &str) -> QuotaResult<i64> {
        self.inner.ttl(key).await
    }

    async fn get(&self, key: &str) -> QuotaResult<Option<i64>> {
        self.inner.get(key).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_window_resets_after_failed_expiry() {
    let store = DistributedQuotaStore::new(FirstExpireFails::default(), WINDOW);
    let k = key("a");

    for expected in 1..=3 {
        assert_eq!(store.increment(&k).await.unwrap(), expected);
    }
    assert_eq!(store.ttl(&k).await.unwrap(), Ttl::Remaining(WINDOW));

    advance(WINDOW * 10).await;
    assert_eq!(store.increment(&k).await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reader_arms_key_without_expiry() {
    let backend = Arc::new(MemoryBackend::default());
    let k = key("a");
    // Another process counted but never set the expiry
    backend.incr(k.as_str()).await.unwrap();
    backend.incr(k.as_str()).await.unwrap();
    assert_eq!(backend.ttl(k.as_str()).await.unwrap(), TTL_NO_EXPIRY);

    let store = DistributedQuotaStore::new(backend.clone(), WINDOW);
    assert_eq!(store.ttl(&k).await.unwrap(), Ttl::Remaining(WINDOW));

    advance(WINDOW).await;
    assert_eq!(store.increment(&k).await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shared_window_expires() {
    let store = DistributedQuotaStore::new(MemoryBackend::default(), WINDOW);
    let k = key("a");

    store.increment(&k).await.unwrap();
    store.increment(&k).await.unwrap();
    assert_eq!(store.ttl(&k).await.unwrap(), Ttl::Remaining(WINDOW));
    assert_eq!(store.current(&k).await.unwrap(), 2);

    advance(WINDOW + Duration::from_secs(1)).await;
    assert_eq!(store.ttl(&k).await.unwrap(), Ttl::Untracked);
    assert_eq!(store.increment(&k).await.unwrap(), 1);
}

#[tokio::test]
async fn test_transport_failure_degrades_single_call() {
    let backend = Arc::new(MemoryBackend::default());
    let store = DistributedQuotaStore::new(backend.clone(), WINDOW)
        .with_fallback(LocalQuotaStore::new(WINDOW, 10));
    let k = key("a");

    assert_eq!(store.increment(&k).await.unwrap(), 1);

    backend.set_down(true);
    assert_eq!(store.increment(&k).await.unwrap(), 1);
    assert_eq!(store.increment(&k).await.unwrap(), 2);
    assert_eq!(store.fallback().unwrap().record(k.as_str()).unwrap().count, 2);

    // Recovery: trust the shared counter again, no reconciliation
    backend.set_down(false);
    assert_eq!(store.increment(&k).await.unwrap(), 2);
    assert_eq!(store.mode(), QuotaMode::Distributed);
}

#[tokio::test]
async fn test_failure_without_fallback_surfaces_error() {
    let backend = MemoryBackend::default();
    backend.set_down(true);
    let store = DistributedQuotaStore::new(backend, WINDOW);

    let err = store.increment(&key("a")).await.unwrap_err();
    assert!(matches!(err, QuotaStoreError::Unavailable(_)));
    assert!(store.ttl(&key("a")).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_stores_share_one_counter() {
    let backend = Arc::new(MemoryBackend::default());
    let a = Arc::new(DistributedQuotaStore::new(backend.clone(), WINDOW));
    let b = Arc::new(DistributedQuotaStore::new(backend.clone(), WINDOW));
    let k = key("tenant");

    let tasks: Vec<_> = (0..100)
        .map(|i| {
            let store = if i % 2 == 0 { a.clone() } else { b.clone() };
            let k = k.clone();
            tokio::spawn(async move { store.increment(&k).await.unwrap() })
        })
        .collect();
    join_all(tasks).await;

    assert_eq!(a.current(&k).await.unwrap(), 100);
    let ttl = backend.ttl(k.as_str()).await.unwrap();
    assert!((59..=60).contains(&ttl));
}

// ----------------------------------------------------------------------------
// Capability probe
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_probe_selects_distributed_when_reachable() {
    let store = probe(MemoryBackend::default(), &QuotaConfig::default()).await;
    assert_eq!(store.mode(), QuotaMode::Distributed);
}

#[tokio::test]
async fn test_probe_selects_local_when_unreachable() {
    let backend = MemoryBackend::default();
    backend.set_down(true);

    let store = probe(backend, &QuotaConfig::default()).await;
    assert_eq!(store.mode(), QuotaMode::Local);
    assert_eq!(store.increment(&key("a")).await.unwrap(), 1);
}

#[tokio::test]
async fn test_select_without_url_is_local() {
    let store = select_quota_store(None, &QuotaConfig::default()).await;
    assert_eq!(store.mode(), QuotaMode::Local);
}

#[tokio::test]
async fn test_select_with_invalid_url_is_local() {
    let store = select_quota_store(Some("not a url"), &QuotaConfig::default()).await;
    assert_eq!(store.mode(), QuotaMode::Local);
}

#[test]
fn test_local_fallback_respects_config() {
    let mut config = QuotaConfig::default();
    assert!(local_fallback(&config).is_some());
    config.local_fallback = false;
    assert!(local_fallback(&config).is_none());
}
