use super::QuotaResult;
use crate::error::QuotaStoreError;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::FromRedisValue;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

/// `TTL` reply for a key that exists without an expiry
pub const TTL_NO_EXPIRY: i64 = -1;

/// `TTL` reply for a key that does not exist
pub const TTL_MISSING: i64 = -2;

/// Shared atomic counter service
///
/// `incr` must be atomic across processes; that is what makes the
/// distributed quota race-free.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CounterBackend: Send + Sync {
    /// Liveness check used by the capability probe
    async fn ping(&self) -> QuotaResult<()>;

    /// Atomically increment, returning the new value
    async fn incr(&self, key: &str) -> QuotaResult<i64>;

    /// Set a key's expiry; `false` when the key does not exist
    async fn expire(&self, key: &str, seconds: u64) -> QuotaResult<bool>;

    /// Seconds to expiry, or [`TTL_NO_EXPIRY`] / [`TTL_MISSING`]
    async fn ttl(&self, key: &str) -> QuotaResult<i64>;

    /// Current value
    async fn get(&self, key: &str) -> QuotaResult<Option<i64>>;
}

#[async_trait]
impl<T: CounterBackend + ?Sized> CounterBackend for std::sync::Arc<T> {
    async fn ping(&self) -> QuotaResult<()> {
        (**self).ping().await
    }

    async fn incr(&self, key: &str) -> QuotaResult<i64> {
        (**self).incr(key).await
    }

    async fn expire(&self, key: &str, seconds: u64) -> QuotaResult<bool> {
        (**self).expire(key, seconds).await
    }

    async fn ttl(&self, key: &str) -> QuotaResult<i64> {
        (**self).ttl(key).await
    }

    async fn get(&self, key: &str) -> QuotaResult<Option<i64>> {
        (**self).get(key).await
    }
}

/// Redis-backed counter
///
/// The multiplexed connection is opened on first use and dropped after any
/// transport error, so the next call reconnects.
pub struct RedisBackend {
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
    command_timeout: Duration,
}

impl RedisBackend {
    /// Create a backend for `redis_url`
    ///
    /// # Errors
    ///
    /// Returns error if the Redis URL is invalid
    pub fn new(redis_url: &str, command_timeout: Duration) -> QuotaResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QuotaStoreError::Unavailable(format!("invalid Redis URL: {}", e)))?;

        Ok(Self {
            client,
            conn: Mutex::new(None),
            command_timeout,
        })
    }

    fn timeout_error(&self) -> QuotaStoreError {
        QuotaStoreError::Timeout(self.command_timeout.as_millis() as u64)
    }

    async fn connection(&self) -> QuotaResult<MultiplexedConnection> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = timeout(
            self.command_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| self.timeout_error())?
        .map_err(|e| QuotaStoreError::Unavailable(format!("Redis connection failed: {}", e)))?;

        debug!("Redis quota connection established");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn reset(&self) {
        self.conn.lock().await.take();
    }

    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> QuotaResult<T> {
        let mut conn = self.connection().await?;

        match timeout(self.command_timeout, cmd.query_async::<T>(&mut conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                self.reset().await;
                Err(QuotaStoreError::Unavailable(e.to_string()))
            }
            Err(_) => {
                self.reset().await;
                Err(self.timeout_error())
            }
        }
    }
}

#[async_trait]
impl CounterBackend for RedisBackend {
    async fn ping(&self) -> QuotaResult<()> {
        self.query::<String>(&redis::cmd("PING")).await.map(|_| ())
    }

    async fn incr(&self, key: &str) -> QuotaResult<i64> {
        let mut cmd = redis::cmd("INCR");
        cmd.arg(key);
        self.query(&cmd).await
    }

    async fn expire(&self, key: &str, seconds: u64) -> QuotaResult<bool> {
        let mut cmd = redis::cmd("EXPIRE");
        cmd.arg(key).arg(seconds);
        let set: i64 = self.query(&cmd).await?;
        Ok(set == 1)
    }

    async fn ttl(&self, key: &str) -> QuotaResult<i64> {
        let mut cmd = redis::cmd("TTL");
        cmd.arg(key);
        self.query(&cmd).await
    }

    async fn get(&self, key: &str) -> QuotaResult<Option<i64>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query(&cmd).await
    }
}
