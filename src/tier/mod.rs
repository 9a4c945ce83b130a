//! Cache tier capability
//!
//! One uniform contract (`get`/`set`/`delete`/`clear`) implemented three
//! times: in-memory LRU+TTL (L1), remote key-value client (L2), and a durable
//! store client (L3). Failure (`Err`) is signaled distinctly from "not found"
//! (`Ok(None)`) so the orchestrator never mistakes a down tier for an empty
//! one.

mod l1;
mod l2;
mod l3;

pub use l1::MemoryTier;
pub use l2::RemoteTier;
pub use l3::{DurableBackend, DurableRecord, DurableTier, InMemoryDurableBackend};

use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};

use crate::entry::CacheLevel;
use crate::error::{Error, Result};

/// Frame tag for an uncompressed payload
const FRAME_RAW: u8 = 0x00;
/// Frame tag for an LZ4-compressed payload
const FRAME_LZ4: u8 = 0x01;

/// The value that crosses the tier seam: payload bytes plus an explicit
/// compressed flag. The flag is metadata, never derived from the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierValue {
    /// Stored bytes (compressed iff `compressed`)
    pub payload: Bytes,
    /// Whether `payload` holds compressed bytes
    pub compressed: bool,
}

impl TierValue {
    /// An uncompressed value
    pub fn raw(payload: Bytes) -> Self {
        Self {
            payload,
            compressed: false,
        }
    }

    /// A compressed value
    pub fn compressed(payload: Bytes) -> Self {
        Self {
            payload,
            compressed: true,
        }
    }

    /// Encode as a wire frame: one tag byte followed by the payload.
    ///
    /// Used by tiers that store opaque byte strings (L2) so the compressed
    /// flag survives the round trip through the external store.
    pub fn to_frame(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.payload.len() + 1);
        buf.put_u8(if self.compressed { FRAME_LZ4 } else { FRAME_RAW });
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Decode a wire frame produced by [`TierValue::to_frame`]
    pub fn from_frame(mut frame: Bytes) -> Result<Self> {
        if frame.is_empty() {
            return Err(Error::Serialization("empty tier value frame".into()));
        }
        let tag = frame[0];
        let payload = frame.split_off(1);
        match tag {
            FRAME_RAW => Ok(Self::raw(payload)),
            FRAME_LZ4 => Ok(Self::compressed(payload)),
            other => Err(Error::Serialization(format!(
                "unknown tier value frame tag {other:#04x}"
            ))),
        }
    }
}

/// A cache tier
///
/// All operations may fail independently per tier; implementations are safe
/// for concurrent use and responsible for their own internal synchronization.
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Which level this tier sits at
    fn level(&self) -> CacheLevel;

    /// Look up a key. `Ok(None)` means not present; `Err` means the tier
    /// itself failed (unreachable, timed out).
    async fn get(&self, key: &str) -> Result<Option<TierValue>>;

    /// Store a value with the given TTL
    async fn set(&self, key: &str, value: TierValue, ttl: Duration) -> Result<()>;

    /// Remove a key. Returns whether the key was present.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every entry in this tier
    async fn clear(&self) -> Result<()>;
}

// =============================================================================
// Tests
// =============================================================================
