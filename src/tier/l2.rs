//! L2 tier - shared remote key-value store
//!
//! Thin client over Redis. Every call may incur network latency and is
//! wrapped in a bounded timeout; a timeout or connection error surfaces as a
//! tier failure, never as a cache miss, so the orchestrator does not treat a
//! down L2 as "empty".
//!
//! Construction only parses the URL; the connection is dialed lazily on the
//! first call and re-dialed after a transport error. A Redis outage therefore
//! shows up as per-call `TierUnavailable`/`TierTimeout` errors, and the tier
//! recovers on its own once the server is back.
//!
//! Values are framed with a one-byte compressed flag (see
//! [`TierValue::to_frame`]) so the flag survives the external store.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::entry::CacheLevel;
use crate::error::{Error, Result};
use crate::tier::{CacheTier, TierValue};

/// Remote L2 cache tier backed by Redis
pub struct RemoteTier {
    client: redis::Client,
    /// Cached connection; `None` until first use and after a transport error
    connection: tokio::sync::Mutex<Option<MultiplexedConnection>>,
    /// Bound on every network call, dialing included
    timeout: Duration,
}

impl std::fmt::Debug for RemoteTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTier").finish_non_exhaustive()
    }
}

impl RemoteTier {
    /// Create a remote tier. Does not dial; a malformed URL is the only
    /// construction-time failure.
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Config(format!("invalid remote tier url: {e}")))?;
        Ok(Self {
            client,
            connection: tokio::sync::Mutex::new(None),
            timeout,
        })
    }

    fn unavailable(&self, e: impl std::fmt::Display) -> Error {
        Error::TierUnavailable {
            level: CacheLevel::L2Remote,
            reason: e.to_string(),
        }
    }

    fn timed_out(&self) -> Error {
        Error::TierTimeout {
            level: CacheLevel::L2Remote,
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }

    /// The cached connection, dialing a fresh one if needed
    async fn connection(&self) -> Result<MultiplexedConnection> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let conn = tokio::time::timeout(self.timeout, self.client.get_multiplexed_tokio_connection())
            .await
            .map_err(|_| self.timed_out())?
            .map_err(|e| self.unavailable(e))?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Forget the cached connection so the next call dials fresh
    async fn reset_connection(&self) {
        *self.connection.lock().await = None;
    }

    /// Run a remote call under the bounded timeout, mapping transport
    /// failures to tier errors and invalidating the cached connection on any
    /// failure.
    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                self.reset_connection().await;
                Err(self.unavailable(e))
            }
            Err(_) => {
                self.reset_connection().await;
                Err(self.timed_out())
            }
        }
    }
}

#[async_trait]
impl CacheTier for RemoteTier {
    fn level(&self) -> CacheLevel {
        CacheLevel::L2Remote
    }

    async fn get(&self, key: &str) -> Result<Option<TierValue>> {
        let mut conn = self.connection().await?;
        let key = key.to_string();
        let frame: Option<Vec<u8>> = self
            .bounded(async move { conn.get(&key).await })
            .await?;

        match frame {
            Some(bytes) => TierValue::from_frame(Bytes::from(bytes)).map(Some),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: TierValue, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        let key = key.to_string();
        let frame = value.to_frame().to_vec();
        let ttl_secs = ttl.as_secs();

        self.bounded(async move {
            if ttl_secs > 0 {
                conn.set_ex::<_, _, ()>(&key, frame, ttl_secs).await
            } else {
                conn.set::<_, _, ()>(&key, frame).await
            }
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let key = key.to_string();
        let removed: i64 = self
            .bounded(async move { conn.del(&key).await })
            .await?;
        Ok(removed > 0)
    }

    async fn clear(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        self.bounded(async move {
            redis::cmd("FLUSHDB").query_async::<()>(&mut conn).await
        })
        .await
    }
}

// =============================================================================
// Tests
// =============================================================================
