//! Distributed cache orchestrator
//!
//! The façade composing tiers, codec, tag index, single-flight coordinator,
//! analytics, and the invalidation bus into `get`/`set`/`delete`/
//! `invalidate_by_tag`/`clear`/`prefetch`/`warmup`.
//!
//! Reads probe tiers sequentially (L1 → L2 → L3) with fallback; a hit in a
//! slower tier is promoted into the faster tiers on the way back. Tier
//! failures are absorbed: they increment the tier's error counter and the
//! probe falls through, so a fully degraded cache behaves as a pass-through
//! with an elevated miss rate - it never blocks or crashes the caller.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::analytics::{AnalyticsSnapshot, CacheAnalytics};
use crate::bus::{InvalidationBus, InvalidationMessage, RedisBus};
use crate::compression::Codec;
use crate::config::CacheConfig;
use crate::entry::{CacheLevel, CacheStrategy};
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::singleflight::SingleFlight;
use crate::tags::TagIndex;
use crate::tier::{
    CacheTier, DurableBackend, DurableTier, InMemoryDurableBackend, MemoryTier, RemoteTier,
    TierValue,
};

/// Multi-level distributed cache
pub struct DistributedCache {
    config: CacheConfig,
    l1: Option<Arc<MemoryTier>>,
    l2: Option<Arc<dyn CacheTier>>,
    l3: Option<Arc<dyn CacheTier>>,
    codec: Codec,
    analytics: Arc<CacheAnalytics>,
    tags: TagIndex,
    flight: SingleFlight,
    bus: Option<Arc<dyn InvalidationBus>>,
    scheduler: Mutex<Option<Scheduler>>,
    /// Back-reference handed to the scheduler's spawned loops
    self_ref: Weak<DistributedCache>,
}

impl std::fmt::Debug for DistributedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedCache").finish_non_exhaustive()
    }
}

impl DistributedCache {
    /// Build a cache per the configuration: Redis-backed L2 and invalidation
    /// bus, in-memory durable backend for L3.
    ///
    /// Connections are dialed lazily, so an unreachable Redis at startup is
    /// not fatal and not permanent: every L2 call fails with a tier error
    /// (counted per tier) until the server is reachable, and the invalidation
    /// listener keeps retrying with backoff. Only configuration errors are
    /// hard failures here.
    pub fn connect(config: CacheConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let l2: Option<Arc<dyn CacheTier>> = if config.enable_l2 {
            Some(Arc::new(RemoteTier::new(
                &config.redis_url,
                config.remote_timeout,
            )?))
        } else {
            None
        };

        let bus: Option<Arc<dyn InvalidationBus>> = if config.invalidation_propagation {
            Some(Arc::new(RedisBus::new(&config.redis_url)?))
        } else {
            None
        };

        Self::assemble(config, l2, Arc::new(InMemoryDurableBackend::new()), bus)
    }

    /// Build a cache from explicitly injected collaborators.
    ///
    /// This is the seam for embedding a real durable store, an alternative
    /// remote tier, or test doubles.
    pub fn with_components(
        config: CacheConfig,
        l2: Option<Arc<dyn CacheTier>>,
        l3_backend: Arc<dyn DurableBackend>,
        bus: Option<Arc<dyn InvalidationBus>>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let l2 = if config.enable_l2 { l2 } else { None };
        Self::assemble(config, l2, l3_backend, bus)
    }

    fn assemble(
        config: CacheConfig,
        l2: Option<Arc<dyn CacheTier>>,
        l3_backend: Arc<dyn DurableBackend>,
        bus: Option<Arc<dyn InvalidationBus>>,
    ) -> Result<Arc<Self>> {
        let analytics = Arc::new(CacheAnalytics::new());

        let l1 = config
            .enable_l1
            .then(|| Arc::new(MemoryTier::new(config.max_memory_items, Arc::clone(&analytics))));
        let l3: Option<Arc<dyn CacheTier>> = config
            .enable_l3
            .then(|| {
                Arc::new(DurableTier::new(l3_backend, config.remote_timeout))
                    as Arc<dyn CacheTier>
            });
        let bus = if config.invalidation_propagation {
            bus
        } else {
            None
        };

        Ok(Arc::new_cyclic(|weak| Self {
            codec: Codec::new(config.compression_threshold),
            config,
            l1,
            l2,
            l3,
            analytics,
            tags: TagIndex::new(),
            flight: SingleFlight::new(),
            bus,
            scheduler: Mutex::new(None),
            self_ref: weak.clone(),
        }))
    }

    /// Start the background loops (cleanup, warming, invalidation listener).
    /// Restart-safe: a running scheduler is stopped first, and the swap
    /// happens under a single lock so concurrent starts cannot leak loops.
    pub async fn start(&self) {
        // Always succeeds: the cache is only ever handed out inside an Arc.
        let Some(me) = self.self_ref.upgrade() else {
            return;
        };
        let previous = self.scheduler.lock().replace(Scheduler::start(me));
        if let Some(previous) = previous {
            previous.stop().await;
        }
        info!("distributed cache started");
    }

    /// Stop the background loops
    pub async fn stop(&self) {
        let scheduler = self.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.stop().await;
        }
        info!("distributed cache stopped");
    }

    /// Cache configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Point-in-time analytics snapshot
    pub fn analytics(&self) -> AnalyticsSnapshot {
        self.analytics.snapshot()
    }

    pub(crate) fn bus(&self) -> Option<&Arc<dyn InvalidationBus>> {
        self.bus.as_ref()
    }

    /// Eagerly sweep expired L1 entries; returns the number removed.
    /// Driven by the scheduler's cleanup loop, callable directly as well.
    pub fn sweep_expired(&self) -> usize {
        self.l1.as_ref().map_or(0, |l1| l1.sweep_expired())
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// Get a value, probing L1 → L2 → L3 with promotion on hit
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.get_with_strategy(key, CacheStrategy::default()).await
    }

    /// Get with an explicit strategy. All strategies share the sequential
    /// probe-and-promote read path; they differ on the write side.
    pub async fn get_with_strategy(&self, key: &str, _strategy: CacheStrategy) -> Option<Bytes> {
        // L1
        if let Some(l1) = &self.l1 {
            if let Some(value) = self.probe(l1.as_ref() as &dyn CacheTier, key).await {
                self.analytics.record_hit(CacheLevel::L1Memory);
                return Some(value);
            }
        }

        // L2, promoting into L1 on hit
        if let Some(l2) = &self.l2 {
            if let Some(raw) = self.probe_raw(l2.as_ref(), key).await {
                if let Some(value) = self.decode_or_evict(l2.as_ref(), key, raw.clone()).await {
                    self.analytics.record_hit(CacheLevel::L2Remote);
                    self.promote(key, &raw, &[(self.l1_as_tier(), self.config.l1_ttl)])
                        .await;
                    return Some(value);
                }
            }
        }

        // L3, promoting into L2 then L1 on hit
        if let Some(l3) = &self.l3 {
            if let Some(raw) = self.probe_raw(l3.as_ref(), key).await {
                if let Some(value) = self.decode_or_evict(l3.as_ref(), key, raw.clone()).await {
                    self.analytics.record_hit(CacheLevel::L3Durable);
                    self.promote(
                        key,
                        &raw,
                        &[
                            (self.l2.as_deref(), self.config.l2_ttl),
                            (self.l1_as_tier(), self.config.l1_ttl),
                        ],
                    )
                    .await;
                    return Some(value);
                }
            }
        }

        // One shared miss counter, bumped only when every enabled tier missed
        self.analytics.record_miss();
        None
    }

    /// Get, running `loader` through the single-flight coordinator on a miss
    /// and populating every tier with the loaded value.
    ///
    /// Concurrent callers for the same cold key share one loader invocation.
    pub async fn get_or_load<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        tags: Option<HashSet<String>>,
        loader: F,
    ) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        self.flight
            .run(key, || async {
                // Another flight may have populated the cache while this
                // caller was waiting to lead.
                if let Some(value) = self.get(key).await {
                    return Ok(value);
                }
                let value = loader().await?;
                self.set(key, value.clone(), ttl, tags).await;
                Ok(value)
            })
            .await
    }

    fn l1_as_tier(&self) -> Option<&dyn CacheTier> {
        self.l1.as_ref().map(|l1| l1.as_ref() as &dyn CacheTier)
    }

    /// Probe one tier, absorbing tier failures into the error counter.
    /// Errors are attributed to the level they name, falling back to the
    /// tier that was being probed.
    async fn probe_raw(&self, tier: &dyn CacheTier, key: &str) -> Option<TierValue> {
        match tier.get(key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key, level = %tier.level(), error = %e, "tier probe failed");
                self.analytics.record_error(e.level().unwrap_or_else(|| tier.level()));
                None
            }
        }
    }

    /// Probe and decode in one step (L1 path, no promotion needed)
    async fn probe(&self, tier: &dyn CacheTier, key: &str) -> Option<Bytes> {
        let raw = self.probe_raw(tier, key).await?;
        self.decode_or_evict(tier, key, raw).await
    }

    /// Decode a stored value, failing closed: malformed bytes count as a
    /// miss and the corrupt entry is evicted from the tier that served it.
    async fn decode_or_evict(
        &self,
        tier: &dyn CacheTier,
        key: &str,
        raw: TierValue,
    ) -> Option<Bytes> {
        match self.codec.decode(raw).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, level = %tier.level(), error = %e, "corrupt cached value, evicting");
                self.analytics.record_error(tier.level());
                let _ = tier.delete(key).await;
                None
            }
        }
    }

    /// Best-effort promotion of a hit into faster tiers. A failed promotion
    /// is an optimization missed, not an error worth surfacing.
    async fn promote(&self, key: &str, value: &TierValue, targets: &[(Option<&dyn CacheTier>, Duration)]) {
        for (tier, ttl) in targets {
            if let Some(tier) = tier {
                if let Err(e) = tier.set(key, value.clone(), *ttl).await {
                    debug!(key, level = %tier.level(), error = %e, "promotion skipped");
                }
            }
        }
    }

    // =========================================================================
    // Write path
    // =========================================================================

    /// Store a value in every enabled tier (write-through).
    ///
    /// Returns `true` only if all enabled tiers accepted the write. Partial
    /// failure increments the failing tier's error counter but still leaves
    /// the value in the tiers that succeeded - a stale read elsewhere is
    /// preferable to blocking the caller.
    pub async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        tags: Option<HashSet<String>>,
    ) -> bool {
        self.set_with_strategy(key, value, ttl, tags, CacheStrategy::WriteThrough)
            .await
    }

    /// Store with an explicit write strategy
    pub async fn set_with_strategy(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        tags: Option<HashSet<String>>,
        strategy: CacheStrategy,
    ) -> bool {
        let encoded = match self.codec.encode(value).await {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key, error = %e, "failed to encode value");
                return false;
            }
        };

        let mut success = true;

        if let Some(l1) = &self.l1 {
            // The in-process tier stores the full entry, tags included
            l1.set_with_tags(
                key,
                encoded.clone(),
                self.config.ttl_for_l1(ttl),
                tags.clone().unwrap_or_default(),
            );
        }

        match strategy {
            CacheStrategy::WriteBehind => {
                // L1 is visible immediately; slower tiers catch up off-path.
                self.spawn_deferred_writes(key, encoded, ttl);
            }
            _ => {
                if let Some(l2) = &self.l2 {
                    success &= self
                        .write_tier(l2.as_ref(), key, &encoded, self.config.ttl_for_l2(ttl))
                        .await;
                }
                if let Some(l3) = &self.l3 {
                    success &= self
                        .write_tier(l3.as_ref(), key, &encoded, self.config.ttl_for_l3(ttl))
                        .await;
                }
            }
        }

        if let Some(tags) = tags {
            self.tags.insert(key, &tags);
        }
        self.analytics.record_set();
        success
    }

    async fn write_tier(
        &self,
        tier: &dyn CacheTier,
        key: &str,
        value: &TierValue,
        ttl: Duration,
    ) -> bool {
        match tier.set(key, value.clone(), ttl).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key, level = %tier.level(), error = %e, "tier write failed");
                self.analytics.record_error(e.level().unwrap_or_else(|| tier.level()));
                false
            }
        }
    }

    fn spawn_deferred_writes(&self, key: &str, value: TierValue, ttl: Option<Duration>) {
        let key = key.to_string();
        let l2 = self.l2.clone();
        let l3 = self.l3.clone();
        let l2_ttl = self.config.ttl_for_l2(ttl);
        let l3_ttl = self.config.ttl_for_l3(ttl);
        let analytics = Arc::clone(&self.analytics);

        tokio::spawn(async move {
            if let Some(l2) = l2 {
                if let Err(e) = l2.set(&key, value.clone(), l2_ttl).await {
                    warn!(key, error = %e, "deferred L2 write failed");
                    analytics.record_error(CacheLevel::L2Remote);
                }
            }
            if let Some(l3) = l3 {
                if let Err(e) = l3.set(&key, value, l3_ttl).await {
                    warn!(key, error = %e, "deferred L3 write failed");
                    analytics.record_error(CacheLevel::L3Durable);
                }
            }
        });
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Delete a key from every enabled tier and propagate the invalidation
    /// to peer instances.
    ///
    /// Returns `true` if local removal succeeded across tiers; a publish
    /// failure is logged and never fails the call.
    pub async fn delete(&self, key: &str) -> bool {
        let success = self.delete_local(key).await;

        if let Some(bus) = &self.bus {
            let msg = InvalidationMessage::invalidate(key);
            if let Err(e) = bus.publish(&msg).await {
                warn!(key, error = %e, "invalidation publish failed");
            }
        }

        success
    }

    /// Remove a key locally without re-publishing. Used by the invalidation
    /// listener; idempotent, so replayed or self-originated messages are
    /// harmless no-ops.
    pub async fn apply_invalidation(&self, key: &str) -> bool {
        debug!(key, "applying invalidation");
        self.delete_local(key).await
    }

    async fn delete_local(&self, key: &str) -> bool {
        let mut success = true;

        if let Some(l1) = &self.l1 {
            success &= self.remove_tier(l1.as_ref(), key).await;
        }
        if let Some(l2) = &self.l2 {
            success &= self.remove_tier(l2.as_ref(), key).await;
        }
        if let Some(l3) = &self.l3 {
            success &= self.remove_tier(l3.as_ref(), key).await;
        }

        self.tags.remove_key(key);
        self.analytics.record_delete();
        success
    }

    async fn remove_tier(&self, tier: &dyn CacheTier, key: &str) -> bool {
        match tier.delete(key).await {
            Ok(_present) => true,
            Err(e) => {
                warn!(key, level = %tier.level(), error = %e, "tier delete failed");
                self.analytics.record_error(e.level().unwrap_or_else(|| tier.level()));
                false
            }
        }
    }

    /// Delete every key registered under `tag`; returns the count removed.
    ///
    /// Eventually consistent: a concurrent `set` on a tagged key during the
    /// sweep may or may not be invalidated.
    pub async fn invalidate_by_tag(&self, tag: &str) -> usize {
        let keys = self.tags.keys_for(tag);
        let mut removed = 0;

        for key in &keys {
            if self.delete(key).await {
                removed += 1;
            }
        }

        info!(tag, removed, "tag invalidation complete");
        removed
    }

    /// Clear every enabled tier and reset the tag index wholesale
    pub async fn clear(&self) -> bool {
        let mut success = true;

        if let Some(l1) = &self.l1 {
            success &= self.clear_tier(l1.as_ref()).await;
        }
        if let Some(l2) = &self.l2 {
            success &= self.clear_tier(l2.as_ref()).await;
        }
        if let Some(l3) = &self.l3 {
            success &= self.clear_tier(l3.as_ref()).await;
        }

        self.tags.clear();
        success
    }

    async fn clear_tier(&self, tier: &dyn CacheTier) -> bool {
        match tier.clear().await {
            Ok(()) => true,
            Err(e) => {
                warn!(level = %tier.level(), error = %e, "tier clear failed");
                self.analytics.record_error(e.level().unwrap_or_else(|| tier.level()));
                false
            }
        }
    }

    // =========================================================================
    // Warming
    // =========================================================================

    /// Fetch several keys concurrently to pull them into the fast tiers.
    /// Failures are swallowed; prefetch never blocks the caller's critical
    /// path with an error.
    pub async fn prefetch(&self, keys: &[String]) {
        if !self.config.prefetch_enabled {
            return;
        }
        futures::future::join_all(keys.iter().map(|key| self.get(key))).await;
    }

    /// Re-populate the given hot keys by reading them through the hierarchy,
    /// promoting whatever the slower tiers still hold.
    pub async fn warmup(&self, keys: &[String]) {
        for key in keys {
            if self.get(key).await.is_none() {
                debug!(key, "warmup found nothing to promote");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessBus;
    use crate::error::Error;
    use crate::tier::DurableRecord;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use dashmap::DashMap;

    /// In-memory stand-in for the remote L2 tier
    #[derive(Default)]
    struct StubRemoteTier {
        frames: DashMap<String, Bytes>,
    }

    #[async_trait]
    impl CacheTier for StubRemoteTier {
        fn level(&self) -> CacheLevel {
            CacheLevel::L2Remote
        }

        async fn get(&self, key: &str) -> Result<Option<TierValue>> {
            match self.frames.get(key) {
                Some(frame) => TierValue::from_frame(frame.clone()).map(Some),
                None => Ok(None),
            }
        }

        async fn set(&self, key: &str, value: TierValue, _ttl: Duration) -> Result<()> {
            self.frames.insert(key.to_string(), value.to_frame());
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            Ok(self.frames.remove(key).is_some())
        }

        async fn clear(&self) -> Result<()> {
            self.frames.clear();
            Ok(())
        }
    }

    /// Tier that is always unreachable
    struct DownTier(CacheLevel);

    #[async_trait]
    impl CacheTier for DownTier {
        fn level(&self) -> CacheLevel {
            self.0
        }

        async fn get(&self, _key: &str) -> Result<Option<TierValue>> {
            Err(self.unavailable())
        }

        async fn set(&self, _key: &str, _value: TierValue, _ttl: Duration) -> Result<()> {
            Err(self.unavailable())
        }

        async fn delete(&self, _key: &str) -> Result<bool> {
            Err(self.unavailable())
        }

        async fn clear(&self) -> Result<()> {
            Err(self.unavailable())
        }
    }

    impl DownTier {
        fn unavailable(&self) -> Error {
            Error::TierUnavailable {
                level: self.0,
                reason: "simulated outage".into(),
            }
        }
    }

    fn make_cache() -> (Arc<DistributedCache>, Arc<InMemoryDurableBackend>) {
        let backend = Arc::new(InMemoryDurableBackend::new());
        let cache = DistributedCache::with_components(
            CacheConfig::default(),
            Some(Arc::new(StubRemoteTier::default())),
            backend.clone(),
            Some(Arc::new(InProcessBus::default())),
        )
        .unwrap();
        (cache, backend)
    }

    fn tag_set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_construction_requires_a_tier() {
        let config = CacheConfig {
            enable_l1: false,
            enable_l2: false,
            enable_l3: false,
            ..Default::default()
        };
        let result = DistributedCache::with_components(
            config,
            None,
            Arc::new(InMemoryDurableBackend::new()),
            None,
        );
        assert_matches!(result, Err(Error::Config(_)));
    }

    #[tokio::test]
    async fn test_set_then_get_hits_l1() {
        let (cache, _) = make_cache();

        assert!(cache.set("k", Bytes::from_static(b"v"), None, None).await);
        assert_eq!(cache.get("k").await.unwrap().as_ref(), b"v");

        let snap = cache.analytics();
        assert_eq!(snap.l1_hits, 1);
        assert_eq!(snap.sets, 1);
        assert_eq!(snap.misses, 0);
    }

    #[tokio::test]
    async fn test_miss_records_single_miss() {
        let (cache, _) = make_cache();

        assert!(cache.get("absent").await.is_none());

        let snap = cache.analytics();
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.hits, 0);
    }

    #[tokio::test]
    async fn test_l3_hit_promotes_to_l1() {
        let (cache, backend) = make_cache();

        // Seed only the durable tier
        backend
            .store(DurableRecord {
                key: "cold".into(),
                value: b"deep value".to_vec(),
                compressed: false,
                ttl_seconds: 0,
                created_at_unix: crate::entry::epoch_secs(),
            })
            .await
            .unwrap();

        assert_eq!(cache.get("cold").await.unwrap().as_ref(), b"deep value");
        assert_eq!(cache.analytics().l3_hits, 1);

        // Promotion means the next read never leaves the process
        assert_eq!(cache.get("cold").await.unwrap().as_ref(), b"deep value");
        assert_eq!(cache.analytics().l1_hits, 1);
    }

    #[tokio::test]
    async fn test_l2_down_falls_through_to_l3() {
        let backend = Arc::new(InMemoryDurableBackend::new());
        let cache = DistributedCache::with_components(
            CacheConfig {
                enable_l1: false, // force the probe past L1
                ..Default::default()
            },
            Some(Arc::new(DownTier(CacheLevel::L2Remote))),
            backend.clone(),
            None,
        )
        .unwrap();

        backend
            .store(DurableRecord {
                key: "k".into(),
                value: b"survivor".to_vec(),
                compressed: false,
                ttl_seconds: 0,
                created_at_unix: crate::entry::epoch_secs(),
            })
            .await
            .unwrap();

        assert_eq!(cache.get("k").await.unwrap().as_ref(), b"survivor");

        let snap = cache.analytics();
        assert_eq!(snap.l2_errors, 1);
        assert_eq!(snap.l3_hits, 1);
        assert_eq!(snap.misses, 0);
    }

    #[tokio::test]
    async fn test_partial_set_failure_reports_false_but_keeps_l1() {
        let cache = DistributedCache::with_components(
            CacheConfig::default(),
            Some(Arc::new(DownTier(CacheLevel::L2Remote))),
            Arc::new(InMemoryDurableBackend::new()),
            None,
        )
        .unwrap();

        let ok = cache.set("k", Bytes::from_static(b"v"), None, None).await;
        assert!(!ok);

        // Value is still readable from the tiers that accepted it
        assert_eq!(cache.get("k").await.unwrap().as_ref(), b"v");
        assert_eq!(cache.analytics().l2_errors, 1);
    }

    #[tokio::test]
    async fn test_fully_degraded_cache_is_pass_through() {
        let cache = DistributedCache::with_components(
            CacheConfig {
                enable_l1: false,
                ..Default::default()
            },
            Some(Arc::new(DownTier(CacheLevel::L2Remote))),
            Arc::new(InMemoryDurableBackend::new()),
            None,
        )
        .unwrap();

        // No panic, no hang - just misses and error counters
        assert!(cache.get("a").await.is_none());
        assert!(!cache.set("a", Bytes::from_static(b"v"), None, None).await);

        let snap = cache.analytics();
        assert!(snap.errors > 0);
        assert_eq!(snap.misses, 1);
    }

    #[tokio::test]
    async fn test_delete_removes_from_all_tiers() {
        let (cache, backend) = make_cache();

        cache.set("k", Bytes::from_static(b"v"), None, None).await;
        assert!(cache.delete("k").await);

        assert!(cache.get("k").await.is_none());
        assert!(backend.is_empty());
        assert_eq!(cache.analytics().deletes, 1);
    }

    #[tokio::test]
    async fn test_tag_invalidation_counts_and_clears() {
        let (cache, _) = make_cache();

        for key in ["a", "b", "c"] {
            cache
                .set(key, Bytes::from_static(b"v"), None, Some(tag_set(&["T"])))
                .await;
        }

        assert_eq!(cache.invalidate_by_tag("T").await, 3);
        for key in ["a", "b", "c"] {
            assert!(cache.get(key).await.is_none());
        }

        // Second invalidation finds nothing
        assert_eq!(cache.invalidate_by_tag("T").await, 0);
    }

    #[tokio::test]
    async fn test_clear_resets_tiers_and_tags() {
        let (cache, backend) = make_cache();

        cache
            .set("k", Bytes::from_static(b"v"), None, Some(tag_set(&["T"])))
            .await;
        assert!(cache.clear().await);

        assert!(cache.get("k").await.is_none());
        assert!(backend.is_empty());
        assert_eq!(cache.invalidate_by_tag("T").await, 0);
    }

    #[tokio::test]
    async fn test_compression_round_trip_through_tiers() {
        let (cache, backend) = make_cache();

        let big = Bytes::from(b"stratacache ".repeat(1000)); // ~12KB
        cache.set("big", big.clone(), None, None).await;

        // Stored compressed in the durable record
        let record = backend.fetch("big").await.unwrap().unwrap();
        assert!(record.compressed);
        assert!(record.value.len() < big.len());

        assert_eq!(cache.get("big").await.unwrap(), big);
    }

    #[tokio::test]
    async fn test_get_or_load_populates_all_tiers() {
        let (cache, backend) = make_cache();

        let value = cache
            .get_or_load("lazy", None, None, || async {
                Ok(Bytes::from_static(b"loaded"))
            })
            .await
            .unwrap();
        assert_eq!(value.as_ref(), b"loaded");

        // Populated: next get is an L1 hit, and the durable record exists
        assert_eq!(cache.get("lazy").await.unwrap().as_ref(), b"loaded");
        assert!(backend.fetch("lazy").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_get_or_load_dedupes_concurrent_misses() {
        use std::sync::atomic::{AtomicU64, Ordering};
        use tokio::task::JoinSet;

        let (cache, _) = make_cache();
        let loads = Arc::new(AtomicU64::new(0));
        let mut join_set = JoinSet::new();

        for _ in 0..50 {
            let cache = Arc::clone(&cache);
            let loads = Arc::clone(&loads);
            join_set.spawn(async move {
                cache
                    .get_or_load("stampede", None, None, move || async move {
                        loads.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(Bytes::from_static(b"origin"))
                    })
                    .await
            });
        }

        while let Some(result) = join_set.join_next().await {
            assert_eq!(result.unwrap().unwrap().as_ref(), b"origin");
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_corrupt_stored_value_is_a_miss_and_evicted() {
        let (cache, backend) = make_cache();

        // A record flagged compressed whose bytes are not valid LZ4
        backend
            .store(DurableRecord {
                key: "bad".into(),
                value: b"junk that was never compressed".to_vec(),
                compressed: true,
                ttl_seconds: 0,
                created_at_unix: crate::entry::epoch_secs(),
            })
            .await
            .unwrap();

        assert!(cache.get("bad").await.is_none());

        let snap = cache.analytics();
        assert_eq!(snap.l3_errors, 1);
        assert_eq!(snap.misses, 1);

        // The corrupt record was evicted from the tier that served it
        assert!(backend.fetch("bad").await.unwrap().is_none());
        assert!(cache.get("bad").await.is_none());
    }

    #[tokio::test]
    async fn test_set_attaches_tags_to_the_l1_entry() {
        let (cache, _) = make_cache();

        cache
            .set("k", Bytes::from_static(b"v"), None, Some(tag_set(&["users"])))
            .await;

        let entry = cache.l1.as_ref().unwrap().peek("k").unwrap();
        assert!(entry.tags.contains("users"));
    }

    #[tokio::test]
    async fn test_connect_survives_unreachable_remote() {
        // Port 1 is never a Redis server; construction must still succeed
        // and every L2 failure must be counted rather than disabling the tier
        let config = CacheConfig {
            redis_url: "redis://127.0.0.1:1".to_string(),
            remote_timeout: Duration::from_millis(200),
            invalidation_propagation: false,
            ..Default::default()
        };
        let cache = DistributedCache::connect(config).unwrap();

        assert!(!cache.set("k", Bytes::from_static(b"v"), None, None).await);
        assert_eq!(cache.get("k").await.unwrap().as_ref(), b"v");
        assert!(cache.analytics().l2_errors >= 1);
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_url() {
        let config = CacheConfig {
            redis_url: "definitely not a url".to_string(),
            ..Default::default()
        };
        assert_matches!(DistributedCache::connect(config), Err(Error::Config(_)));
    }

    #[tokio::test]
    async fn test_apply_invalidation_is_idempotent() {
        let (cache, _) = make_cache();

        cache.set("k", Bytes::from_static(b"v"), None, None).await;

        assert!(cache.apply_invalidation("k").await);
        assert!(cache.apply_invalidation("k").await);
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_write_behind_is_visible_in_l1_immediately() {
        let (cache, backend) = make_cache();

        cache
            .set_with_strategy(
                "wb",
                Bytes::from_static(b"deferred"),
                None,
                None,
                CacheStrategy::WriteBehind,
            )
            .await;

        // Same-caller read-your-write through L1
        assert_eq!(cache.get("wb").await.unwrap().as_ref(), b"deferred");

        // The deferred writes land shortly after
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(backend.fetch("wb").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_prefetch_swallows_failures() {
        let (cache, _) = make_cache();

        cache.set("warm", Bytes::from_static(b"v"), None, None).await;
        cache
            .prefetch(&["warm".to_string(), "missing".to_string()])
            .await;

        let snap = cache.analytics();
        assert!(snap.hits >= 1);
        assert_eq!(snap.misses, 1);
    }
}
