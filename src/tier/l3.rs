//! L3 tier - durable store
//!
//! The authoritative tier for cached values that must survive process and L2
//! restarts. The storage contract is a narrow async trait; an in-memory
//! backend ships for tests and embedding, and production deployments plug in
//! a persistent store behind the same trait.
//!
//! Same failure/timeout discipline as L2: a backend error or timeout is a
//! tier failure, not a miss.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::entry::{epoch_secs, CacheLevel};
use crate::error::{Error, Result};
use crate::tier::{CacheTier, TierValue};

/// Record persisted by the durable store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DurableRecord {
    /// Cache key
    pub key: String,
    /// Stored bytes (compressed iff `compressed`)
    pub value: Vec<u8>,
    /// Whether `value` holds compressed bytes
    pub compressed: bool,
    /// TTL in seconds; zero means no expiry
    pub ttl_seconds: u64,
    /// Creation timestamp (epoch seconds)
    pub created_at_unix: u64,
}

impl DurableRecord {
    /// True iff a TTL is set and the record has outlived it
    pub fn is_expired(&self) -> bool {
        self.ttl_seconds > 0
            && epoch_secs().saturating_sub(self.created_at_unix) > self.ttl_seconds
    }
}

/// Storage contract the cache needs from a durable store
#[async_trait]
pub trait DurableBackend: Send + Sync {
    /// Fetch a record by key
    async fn fetch(&self, key: &str) -> Result<Option<DurableRecord>>;

    /// Store a record, replacing any existing one for the same key
    async fn store(&self, record: DurableRecord) -> Result<()>;

    /// Remove a record. Returns whether it was present.
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Remove every record
    async fn clear(&self) -> Result<()>;
}

/// In-memory durable backend for tests and single-process embedding
#[derive(Default)]
pub struct InMemoryDurableBackend {
    records: DashMap<String, DurableRecord>,
}

impl InMemoryDurableBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the backend holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl DurableBackend for InMemoryDurableBackend {
    async fn fetch(&self, key: &str) -> Result<Option<DurableRecord>> {
        Ok(self.records.get(key).map(|r| r.clone()))
    }

    async fn store(&self, record: DurableRecord) -> Result<()> {
        self.records.insert(record.key.clone(), record);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.records.remove(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.records.clear();
        Ok(())
    }
}

/// Durable L3 cache tier
pub struct DurableTier {
    backend: std::sync::Arc<dyn DurableBackend>,
    /// Bound on every backend call
    timeout: Duration,
}

impl DurableTier {
    /// Create an L3 tier over the given backend
    pub fn new(backend: std::sync::Arc<dyn DurableBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::TierTimeout {
                level: CacheLevel::L3Durable,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl CacheTier for DurableTier {
    fn level(&self) -> CacheLevel {
        CacheLevel::L3Durable
    }

    async fn get(&self, key: &str) -> Result<Option<TierValue>> {
        let record = self.bounded(self.backend.fetch(key)).await?;

        match record {
            Some(record) if record.is_expired() => {
                // Expired on read: drop it so it does not linger in storage.
                let _ = self.backend.remove(key).await;
                Ok(None)
            }
            Some(record) => {
                let payload = Bytes::from(record.value);
                Ok(Some(if record.compressed {
                    TierValue::compressed(payload)
                } else {
                    TierValue::raw(payload)
                }))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: TierValue, ttl: Duration) -> Result<()> {
        let record = DurableRecord {
            key: key.to_string(),
            value: value.payload.to_vec(),
            compressed: value.compressed,
            ttl_seconds: ttl.as_secs(),
            created_at_unix: epoch_secs(),
        };
        self.bounded(self.backend.store(record)).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.bounded(self.backend.remove(key)).await
    }

    async fn clear(&self) -> Result<()> {
        self.bounded(self.backend.clear()).await
    }
}

// =============================================================================
// Tests
// =============================================================================
