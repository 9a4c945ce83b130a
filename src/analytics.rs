//! Cache analytics
//!
//! Monotonic counters owned by the orchestrator instance, updated with atomics
//! and exposed via a snapshot - never a process-global.
//!
//! Hits are recorded per tier; there is a single shared miss counter that is
//! incremented only when every enabled tier missed. The hit rate is computed
//! from the totals of both.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::entry::CacheLevel;

/// Atomic counter block for cache operations
#[derive(Debug, Default)]
pub struct CacheAnalytics {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    l3_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    l1_errors: AtomicU64,
    l2_errors: AtomicU64,
    l3_errors: AtomicU64,
}

impl CacheAnalytics {
    /// Create a new analytics block with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hit at the given tier
    pub fn record_hit(&self, level: CacheLevel) {
        match level {
            CacheLevel::L1Memory => self.l1_hits.fetch_add(1, Ordering::Relaxed),
            CacheLevel::L2Remote => self.l2_hits.fetch_add(1, Ordering::Relaxed),
            CacheLevel::L3Durable => self.l3_hits.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Record a miss (all enabled tiers missed)
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an eviction
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record evictions in bulk (L1 sweep)
    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a set
    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a delete
    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tier error
    pub fn record_error(&self, level: CacheLevel) {
        match level {
            CacheLevel::L1Memory => self.l1_errors.fetch_add(1, Ordering::Relaxed),
            CacheLevel::L2Remote => self.l2_errors.fetch_add(1, Ordering::Relaxed),
            CacheLevel::L3Durable => self.l3_errors.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Total hits across all tiers
    pub fn hits(&self) -> u64 {
        self.l1_hits.load(Ordering::Relaxed)
            + self.l2_hits.load(Ordering::Relaxed)
            + self.l3_hits.load(Ordering::Relaxed)
    }

    /// Total misses
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// hits / (hits + misses), or 0.0 before any lookup
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Errors attributed to the given tier
    pub fn errors_for(&self, level: CacheLevel) -> u64 {
        match level {
            CacheLevel::L1Memory => self.l1_errors.load(Ordering::Relaxed),
            CacheLevel::L2Remote => self.l2_errors.load(Ordering::Relaxed),
            CacheLevel::L3Durable => self.l3_errors.load(Ordering::Relaxed),
        }
    }

    /// Point-in-time snapshot of every counter
    pub fn snapshot(&self) -> AnalyticsSnapshot {
        let l1_hits = self.l1_hits.load(Ordering::Relaxed);
        let l2_hits = self.l2_hits.load(Ordering::Relaxed);
        let l3_hits = self.l3_hits.load(Ordering::Relaxed);
        let l1_errors = self.l1_errors.load(Ordering::Relaxed);
        let l2_errors = self.l2_errors.load(Ordering::Relaxed);
        let l3_errors = self.l3_errors.load(Ordering::Relaxed);
        let hits = l1_hits + l2_hits + l3_hits;
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        AnalyticsSnapshot {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: l1_errors + l2_errors + l3_errors,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            l1_hits,
            l2_hits,
            l3_hits,
            l1_errors,
            l2_errors,
            l3_errors,
        }
    }
}

/// Point-in-time view of the analytics counters
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsSnapshot {
    /// Total hits across all tiers
    pub hits: u64,
    /// Misses (all enabled tiers missed)
    pub misses: u64,
    /// L1 evictions (capacity and expiry)
    pub evictions: u64,
    /// Set operations
    pub sets: u64,
    /// Delete operations
    pub deletes: u64,
    /// Total tier errors
    pub errors: u64,
    /// hits / (hits + misses)
    pub hit_rate: f64,
    /// Per-tier hit breakdown
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub l3_hits: u64,
    /// Per-tier error breakdown
    pub l1_errors: u64,
    pub l2_errors: u64,
    pub l3_errors: u64,
}

// =============================================================================
// Tests
// =============================================================================
