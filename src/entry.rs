//! Cache entry types and tier/strategy enums

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Epoch seconds now. Saturates to 0 on a pre-epoch clock.
pub(crate) fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Cache levels in the hierarchy, fastest to most durable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheLevel {
    /// L1 - in-process memory (hot)
    L1Memory,
    /// L2 - shared remote key-value store (warm)
    L2Remote,
    /// L3 - durable store (cold)
    L3Durable,
}

impl std::fmt::Display for CacheLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheLevel::L1Memory => write!(f, "L1 (memory)"),
            CacheLevel::L2Remote => write!(f, "L2 (remote)"),
            CacheLevel::L3Durable => write!(f, "L3 (durable)"),
        }
    }
}

/// Caching strategies selectable per call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheStrategy {
    /// Caller owns the loader; cache is populated on demand (default)
    #[default]
    CacheAside,
    /// Writes go to all enabled tiers synchronously
    WriteThrough,
    /// L1 is written synchronously; L2/L3 writes are deferred to a task
    WriteBehind,
    /// Read path identical to cache-aside; the cache owns the loader
    ReadThrough,
}

/// A cache entry with access bookkeeping
///
/// Access time and count are atomics so a read does not need `&mut` - the
/// same discipline the L1 tier relies on for concurrent `get`s.
#[derive(Debug)]
pub struct CacheEntry {
    /// Cache key
    pub key: String,
    /// Payload bytes (possibly compressed, see `compressed`)
    pub value: Bytes,
    /// Tier that owns this entry
    pub level: CacheLevel,
    /// Creation timestamp (epoch seconds)
    created_at: u64,
    /// Last access timestamp (epoch seconds)
    accessed_at: AtomicU64,
    /// Access count
    access_count: AtomicU32,
    /// TTL; zero means no expiry
    pub ttl: Duration,
    /// Tags registered at write time for bulk invalidation
    pub tags: HashSet<String>,
    /// Whether `value` holds compressed bytes (explicit flag, never sniffed)
    pub compressed: bool,
}

impl CacheEntry {
    /// Create a new entry owned by the given tier
    pub fn new(key: impl Into<String>, value: Bytes, level: CacheLevel, ttl: Duration) -> Self {
        let now = epoch_secs();
        Self {
            key: key.into(),
            value,
            level,
            created_at: now,
            accessed_at: AtomicU64::new(now),
            access_count: AtomicU32::new(0),
            ttl,
            tags: HashSet::new(),
            compressed: false,
        }
    }

    /// Set the compressed flag
    pub fn with_compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    /// Attach tags
    pub fn with_tags(mut self, tags: HashSet<String>) -> Self {
        self.tags = tags;
        self
    }

    /// True iff a TTL is set and `now - created_at > ttl`
    #[inline]
    pub fn is_expired(&self) -> bool {
        let ttl = self.ttl.as_secs();
        if ttl == 0 {
            return false;
        }
        epoch_secs().saturating_sub(self.created_at) > ttl
    }

    /// Record an access: bump the access count and refresh the access time
    #[inline]
    pub fn touch(&self) {
        self.accessed_at.store(epoch_secs(), Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Creation timestamp (epoch seconds)
    #[inline]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Last access timestamp (epoch seconds)
    #[inline]
    pub fn accessed_at(&self) -> u64 {
        self.accessed_at.load(Ordering::Relaxed)
    }

    /// Access count
    #[inline]
    pub fn access_count(&self) -> u32 {
        self.access_count.load(Ordering::Relaxed)
    }
}

impl Clone for CacheEntry {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            value: self.value.clone(),
            level: self.level,
            created_at: self.created_at,
            accessed_at: AtomicU64::new(self.accessed_at.load(Ordering::Relaxed)),
            access_count: AtomicU32::new(self.access_count.load(Ordering::Relaxed)),
            ttl: self.ttl,
            tags: self.tags.clone(),
            compressed: self.compressed,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
