//! StrataCache - Multi-Level Distributed Cache Engine
//!
//! A three-tier caching hierarchy for read-heavy services:
//!
//! ```text
//! L1 (in-process memory) → L2 (shared remote KV) → L3 (durable store)
//! ```
//!
//! Reads probe the tiers in order and promote hits back up, so a value served
//! from a slow tier is cheap to serve again. Writes go through every enabled
//! tier. Each tier can fail independently; the orchestrator absorbs tier
//! failures and degrades to the next tier or a plain miss, never to the
//! caller.
//!
//! # Features
//!
//! - TTL expiry plus bounded-capacity LRU eviction in L1
//! - Tag-based bulk invalidation
//! - Threshold-based LZ4 compression with an explicit compressed flag
//! - Single-flight deduplication of concurrent cache-miss loads
//! - Cross-instance invalidation over pub/sub
//! - Background cleanup, warming, and invalidation-listener loops
//! - Per-tier hit/error analytics with a single shared miss counter
//!
//! # Modules
//!
//! - [`analytics`] - Operation counters and snapshots
//! - [`bus`] - Invalidation pub/sub transports
//! - [`compression`] - Threshold-based LZ4 codec
//! - [`config`] - Cache configuration
//! - [`entry`] - Entry, level, and strategy types
//! - [`error`] - Error types
//! - [`orchestrator`] - The multi-level cache façade
//! - [`scheduler`] - Background loops
//! - [`singleflight`] - Stampede protection
//! - [`tags`] - Tag-to-keys index
//! - [`tier`] - The tier contract and its three implementations
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use stratacache::{CacheConfig, DistributedCache};
//!
//! # async fn run() -> stratacache::Result<()> {
//! let cache = DistributedCache::connect(CacheConfig::default())?;
//! cache.start().await;
//!
//! cache.set("user:42", Bytes::from_static(b"{\"name\":\"Ada\"}"), None, None).await;
//! let profile = cache.get("user:42").await;
//! assert!(profile.is_some());
//!
//! cache.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod analytics;
pub mod bus;
pub mod compression;
pub mod config;
pub mod entry;
pub mod error;
pub mod orchestrator;
pub mod scheduler;
pub mod singleflight;
pub mod tags;
pub mod tier;

// Re-export commonly used types
pub use analytics::{AnalyticsSnapshot, CacheAnalytics};
pub use bus::{InProcessBus, InvalidationBus, InvalidationMessage, RedisBus};
pub use config::CacheConfig;
pub use entry::{CacheEntry, CacheLevel, CacheStrategy};
pub use error::{Error, Result};
pub use orchestrator::DistributedCache;
pub use tier::{
    CacheTier, DurableBackend, DurableRecord, DurableTier, InMemoryDurableBackend, MemoryTier,
    RemoteTier, TierValue,
};
