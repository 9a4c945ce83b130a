//! Error types for the distributed cache engine

use crate::entry::CacheLevel;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache engine
///
/// Tier-local failures are absorbed by the orchestrator and degrade to the
/// next tier (or a plain miss); only configuration errors surface to callers,
/// and only at construction time.
#[derive(Error, Debug)]
pub enum Error {
    /// A tier is unreachable - distinct from a cache miss
    #[error("{level} tier unavailable: {reason}")]
    TierUnavailable { level: CacheLevel, reason: String },

    /// A tier operation exceeded its bounded timeout
    #[error("{level} tier operation timed out after {timeout_ms}ms")]
    TierTimeout { level: CacheLevel, timeout_ms: u64 },

    /// Stored bytes are malformed or corrupt - treated as a miss upstream
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Compression failed
    #[error("compression failed: {reason}")]
    CompressionFailed { reason: String },

    /// Decompression failed
    #[error("decompression failed: {reason}")]
    DecompressionFailed { reason: String },

    /// Pub/sub publish or subscribe failure - never surfaced to set/delete callers
    #[error("invalidation propagation error: {0}")]
    Propagation(String),

    /// Configuration error (e.g. all tiers disabled)
    #[error("configuration error: {0}")]
    Config(String),

    /// Loader supplied to a single-flight load failed
    #[error("loader failed for key {key}: {reason}")]
    LoadFailed { key: String, reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Level the error is attributed to in analytics, if any
    pub fn level(&self) -> Option<CacheLevel> {
        match self {
            Error::TierUnavailable { level, .. } => Some(*level),
            Error::TierTimeout { level, .. } => Some(*level),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
