//! Cache configuration
//!
//! Created once at startup and never mutated; the orchestrator and each tier
//! hold a reference for their lifetime.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for the distributed cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable the in-process L1 tier
    pub enable_l1: bool,
    /// Enable the remote L2 tier
    pub enable_l2: bool,
    /// Enable the durable L3 tier
    pub enable_l3: bool,
    /// Default TTL for L1 entries
    pub l1_ttl: Duration,
    /// Default TTL for L2 entries
    pub l2_ttl: Duration,
    /// Default TTL for L3 entries
    pub l3_ttl: Duration,
    /// Maximum number of entries in L1 before LRU eviction
    pub max_memory_items: usize,
    /// Values serialized above this many bytes are compressed
    pub compression_threshold: usize,
    /// Connection URL for the L2 key-value service
    pub redis_url: String,
    /// Bounded timeout for every L2/L3 network call
    pub remote_timeout: Duration,
    /// Enable the periodic warming loop
    pub cache_warming_enabled: bool,
    /// Enable prefetch
    pub prefetch_enabled: bool,
    /// Publish invalidations and run the listener loop
    pub invalidation_propagation: bool,
    /// Interval between warming passes
    pub warming_interval: Duration,
    /// Interval between L1 expiry sweeps
    pub cleanup_interval: Duration,
    /// Hot keys re-populated by the warming loop
    pub warm_keys: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_l1: true,
            enable_l2: true,
            enable_l3: true,
            l1_ttl: Duration::from_secs(300),    // 5 minutes
            l2_ttl: Duration::from_secs(3600),   // 1 hour
            l3_ttl: Duration::from_secs(86400),  // 24 hours
            max_memory_items: 10_000,
            compression_threshold: 1024, // compress values > 1KB
            redis_url: "redis://localhost:6379".to_string(),
            remote_timeout: Duration::from_secs(2),
            cache_warming_enabled: true,
            prefetch_enabled: true,
            invalidation_propagation: true,
            warming_interval: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
            warm_keys: Vec::new(),
        }
    }
}

impl CacheConfig {
    /// Validate the configuration
    ///
    /// A cache with every tier disabled is a construction-time hard error;
    /// all other misconfiguration degrades at runtime instead.
    pub fn validate(&self) -> Result<()> {
        if !self.enable_l1 && !self.enable_l2 && !self.enable_l3 {
            return Err(Error::Config("all cache tiers are disabled".into()));
        }
        if self.enable_l1 && self.max_memory_items == 0 {
            return Err(Error::Config("max_memory_items must be nonzero".into()));
        }
        Ok(())
    }

    /// Build a configuration from `STRATACACHE_*` environment variables,
    /// falling back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_bool("STRATACACHE_ENABLE_L1") {
            config.enable_l1 = v;
        }
        if let Some(v) = env_bool("STRATACACHE_ENABLE_L2") {
            config.enable_l2 = v;
        }
        if let Some(v) = env_bool("STRATACACHE_ENABLE_L3") {
            config.enable_l3 = v;
        }
        if let Some(v) = env_u64("STRATACACHE_L1_TTL_SECS") {
            config.l1_ttl = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("STRATACACHE_L2_TTL_SECS") {
            config.l2_ttl = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("STRATACACHE_L3_TTL_SECS") {
            config.l3_ttl = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("STRATACACHE_MAX_MEMORY_ITEMS") {
            config.max_memory_items = v as usize;
        }
        if let Some(v) = env_u64("STRATACACHE_COMPRESSION_THRESHOLD") {
            config.compression_threshold = v as usize;
        }
        if let Ok(v) = std::env::var("STRATACACHE_REDIS_URL") {
            config.redis_url = v;
        }
        if let Some(v) = env_bool("STRATACACHE_CACHE_WARMING_ENABLED") {
            config.cache_warming_enabled = v;
        }
        if let Some(v) = env_bool("STRATACACHE_INVALIDATION_PROPAGATION") {
            config.invalidation_propagation = v;
        }

        config
    }

    /// Default TTL for the given tier, unless the caller overrode it
    pub(crate) fn ttl_for_l1(&self, explicit: Option<Duration>) -> Duration {
        explicit.unwrap_or(self.l1_ttl)
    }

    pub(crate) fn ttl_for_l2(&self, explicit: Option<Duration>) -> Duration {
        explicit.unwrap_or(self.l2_ttl)
    }

    pub(crate) fn ttl_for_l3(&self, explicit: Option<Duration>) -> Duration {
        explicit.unwrap_or(self.l3_ttl)
    }
}

fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .and_then(|v| match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

// =============================================================================
// Tests
// =============================================================================
