//! L1 tier - in-process memory cache
//!
//! Bounded-capacity map with least-recently-used eviction and TTL expiry.
//! Expiry is checked lazily on read and eagerly by the scheduler's periodic
//! sweep. This tier never performs I/O and never returns `TierUnavailable`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::analytics::CacheAnalytics;
use crate::entry::{CacheEntry, CacheLevel};
use crate::error::Result;
use crate::tier::{CacheTier, TierValue};

/// Map slot carrying the entry plus its LRU sequence number.
///
/// Wall-clock access times on the entry have one-second granularity, too
/// coarse to order evictions; the tick gives a strict recency order.
struct Slot {
    entry: CacheEntry,
    last_used: u64,
}

struct Inner {
    map: HashMap<String, Slot>,
    tick: u64,
}

/// In-process L1 cache tier
pub struct MemoryTier {
    inner: Mutex<Inner>,
    /// Maximum number of entries before LRU eviction
    max_items: usize,
    /// Shared analytics block (evictions are recorded here)
    analytics: Arc<CacheAnalytics>,
}

impl MemoryTier {
    /// Create a new L1 tier bounded to `max_items` entries
    pub fn new(max_items: usize, analytics: Arc<CacheAnalytics>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                tick: 0,
            }),
            max_items,
            analytics,
        }
    }

    /// Number of live entries (including not-yet-swept expired ones)
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Whether the tier holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the key is present (expired entries count as absent)
    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .lock()
            .map
            .get(key)
            .is_some_and(|slot| !slot.entry.is_expired())
    }

    /// Copy of the stored entry, without touching access bookkeeping or
    /// recency order
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.inner.lock().map.get(key).map(|slot| slot.entry.clone())
    }

    /// Store a value with the tags it was set under, so the entry carries
    /// them alongside the orchestrator's tag index
    pub fn set_with_tags(
        &self,
        key: &str,
        value: TierValue,
        ttl: Duration,
        tags: HashSet<String>,
    ) {
        let entry = CacheEntry::new(key, value.payload, CacheLevel::L1Memory, ttl)
            .with_compressed(value.compressed)
            .with_tags(tags);
        self.insert(key, entry);
    }

    fn insert(&self, key: &str, entry: CacheEntry) {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;
        inner.map.insert(
            key.to_string(),
            Slot {
                entry,
                last_used: tick,
            },
        );
        self.evict_over_capacity(&mut inner);
    }

    /// Eagerly remove every expired entry. Returns the number removed.
    ///
    /// Called by the scheduler's cleanup loop; L2/L3 expire natively.
    pub fn sweep_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.map.len();
        inner.map.retain(|_, slot| !slot.entry.is_expired());
        let removed = before - inner.map.len();
        if removed > 0 {
            self.analytics.record_evictions(removed as u64);
        }
        removed
    }

    /// Evict least-recently-used entries until the map fits the capacity
    /// bound. Expired entries are always the first victims.
    fn evict_over_capacity(&self, inner: &mut Inner) {
        while inner.map.len() > self.max_items {
            let victim = inner
                .map
                .iter()
                .find(|(_, slot)| slot.entry.is_expired())
                .map(|(k, _)| k.clone())
                .or_else(|| {
                    inner
                        .map
                        .iter()
                        .min_by_key(|(_, slot)| slot.last_used)
                        .map(|(k, _)| k.clone())
                });

            match victim {
                Some(key) => {
                    inner.map.remove(&key);
                    self.analytics.record_eviction();
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    fn level(&self) -> CacheLevel {
        CacheLevel::L1Memory
    }

    async fn get(&self, key: &str) -> Result<Option<TierValue>> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        let expired = match inner.map.get_mut(key) {
            Some(slot) => {
                if slot.entry.is_expired() {
                    true
                } else {
                    slot.last_used = tick;
                    slot.entry.touch();
                    let value = if slot.entry.compressed {
                        TierValue::compressed(slot.entry.value.clone())
                    } else {
                        TierValue::raw(slot.entry.value.clone())
                    };
                    return Ok(Some(value));
                }
            }
            None => return Ok(None),
        };

        if expired {
            inner.map.remove(key);
            self.analytics.record_eviction();
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: TierValue, ttl: Duration) -> Result<()> {
        self.set_with_tags(key, value, ttl, HashSet::new());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.inner.lock().map.remove(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.inner.lock().map.clear();
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn make_tier(max_items: usize) -> (MemoryTier, Arc<CacheAnalytics>) {
        let analytics = Arc::new(CacheAnalytics::new());
        (MemoryTier::new(max_items, Arc::clone(&analytics)), analytics)
    }

    fn raw(data: &'static [u8]) -> TierValue {
        TierValue::raw(Bytes::from_static(data))
    }

    #[tokio::test]
    async fn test_set_get() {
        let (tier, _) = make_tier(16);

        tier.set("a", raw(b"alpha"), Duration::from_secs(60))
            .await
            .unwrap();

        let value = tier.get("a").await.unwrap().unwrap();
        assert_eq!(value.payload.as_ref(), b"alpha");
        assert!(!value.compressed);
    }

    #[tokio::test]
    async fn test_miss_is_none_not_error() {
        let (tier, _) = make_tier(16);
        assert!(tier.get("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let (tier, _) = make_tier(16);

        tier.set("a", raw(b"alpha"), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(tier.delete("a").await.unwrap());
        assert!(!tier.delete("a").await.unwrap());
        assert!(tier.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear() {
        let (tier, _) = make_tier(16);

        for i in 0..8 {
            tier.set(&format!("k{i}"), raw(b"v"), Duration::from_secs(60))
                .await
                .unwrap();
        }
        assert_eq!(tier.len(), 8);

        tier.clear().await.unwrap();
        assert!(tier.is_empty());
    }

    #[tokio::test]
    async fn test_compressed_flag_round_trip() {
        let (tier, _) = make_tier(16);

        tier.set(
            "c",
            TierValue::compressed(Bytes::from_static(b"\x01\x02")),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        let value = tier.get("c").await.unwrap().unwrap();
        assert!(value.compressed);
    }

    #[tokio::test]
    async fn test_lru_eviction_at_capacity() {
        let (tier, analytics) = make_tier(3);

        tier.set("a", raw(b"1"), Duration::from_secs(60)).await.unwrap();
        tier.set("b", raw(b"2"), Duration::from_secs(60)).await.unwrap();
        tier.set("c", raw(b"3"), Duration::from_secs(60)).await.unwrap();

        // Refresh "a" so "b" is now the least recently used
        tier.get("a").await.unwrap();

        tier.set("d", raw(b"4"), Duration::from_secs(60)).await.unwrap();

        assert_eq!(tier.len(), 3);
        assert!(tier.contains("a"));
        assert!(!tier.contains("b"));
        assert!(tier.contains("c"));
        assert!(tier.contains("d"));
        assert_eq!(analytics.snapshot().evictions, 1);
    }

    #[tokio::test]
    async fn test_lazy_expiry_on_read() {
        let (tier, analytics) = make_tier(16);

        tier.set("t", raw(b"v"), Duration::from_secs(1)).await.unwrap();
        assert!(tier.get("t").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert!(tier.get("t").await.unwrap().is_none());
        assert_eq!(analytics.snapshot().evictions, 1);
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let (tier, analytics) = make_tier(16);

        tier.set("short", raw(b"v"), Duration::from_secs(1)).await.unwrap();
        tier.set("long", raw(b"v"), Duration::from_secs(300)).await.unwrap();
        tier.set("forever", raw(b"v"), Duration::ZERO).await.unwrap();

        tokio::time::sleep(Duration::from_millis(2100)).await;

        let removed = tier.sweep_expired();
        assert_eq!(removed, 1);
        assert_eq!(tier.len(), 2);
        assert!(tier.contains("long"));
        assert!(tier.contains("forever"));
        assert_eq!(analytics.snapshot().evictions, 1);
    }

    #[tokio::test]
    async fn test_tags_carried_on_the_entry() {
        let (tier, _) = make_tier(16);

        let tags: HashSet<String> = ["users".to_string()].into_iter().collect();
        tier.set_with_tags("a", raw(b"v"), Duration::from_secs(60), tags);

        let entry = tier.peek("a").unwrap();
        assert!(entry.tags.contains("users"));

        // The plain tier contract stores an untagged entry
        tier.set("b", raw(b"v"), Duration::from_secs(60)).await.unwrap();
        assert!(tier.peek("b").unwrap().tags.is_empty());
    }

    #[tokio::test]
    async fn test_peek_does_not_refresh_recency() {
        let (tier, _) = make_tier(2);

        tier.set("a", raw(b"1"), Duration::from_secs(60)).await.unwrap();
        tier.set("b", raw(b"2"), Duration::from_secs(60)).await.unwrap();

        // Peeking "a" must not rescue it from LRU eviction
        tier.peek("a").unwrap();
        tier.set("c", raw(b"3"), Duration::from_secs(60)).await.unwrap();

        assert!(!tier.contains("a"));
        assert!(tier.contains("b"));
        assert!(tier.contains("c"));
    }

    #[tokio::test]
    async fn test_replace_keeps_single_entry() {
        let (tier, _) = make_tier(16);

        tier.set("k", raw(b"old"), Duration::from_secs(60)).await.unwrap();
        tier.set("k", raw(b"new"), Duration::from_secs(60)).await.unwrap();

        assert_eq!(tier.len(), 1);
        let value = tier.get("k").await.unwrap().unwrap();
        assert_eq!(value.payload.as_ref(), b"new");
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        use tokio::task::JoinSet;

        let analytics = Arc::new(CacheAnalytics::new());
        let tier = Arc::new(MemoryTier::new(10_000, analytics));
        let mut join_set = JoinSet::new();

        for t in 0..8 {
            let tier = Arc::clone(&tier);
            join_set.spawn(async move {
                for i in 0..200 {
                    let key = format!("k-{t}-{i}");
                    tier.set(&key, TierValue::raw(Bytes::from(vec![t as u8])), Duration::from_secs(60))
                        .await
                        .unwrap();
                    assert!(tier.get(&key).await.unwrap().is_some());
                }
            });
        }

        while let Some(result) = join_set.join_next().await {
            result.unwrap();
        }
        assert_eq!(tier.len(), 1600);
    }
}
