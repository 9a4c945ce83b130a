//! Threshold-based compression codec
//!
//! Values above the configured threshold are LZ4-compressed before they are
//! written to any tier, and decompressed after a hit. Compression runs on the
//! blocking pool so CPU-bound work never stalls concurrent cache operations.
//!
//! Whether a stored value is compressed is carried as an explicit flag on the
//! tier value - never inferred from the bytes. Malformed compressed data fails
//! closed: the orchestrator treats it as a miss and evicts the bad entry.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::tier::TierValue;

/// Compression codec applied at the orchestrator boundary
#[derive(Debug, Clone)]
pub struct Codec {
    /// Values larger than this many bytes are compressed
    threshold: usize,
}

impl Codec {
    /// Create a codec with the given size threshold
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    /// Compression threshold in bytes
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Compress `value` if it exceeds the threshold
    ///
    /// Keeps the original bytes when compression does not shrink them, so the
    /// compressed flag implies the payload is genuinely smaller.
    pub async fn encode(&self, value: Bytes) -> Result<TierValue> {
        if value.len() <= self.threshold {
            return Ok(TierValue::raw(value));
        }

        let input = value.clone();
        let compressed = tokio::task::spawn_blocking(move || {
            lz4::block::compress(&input, Some(lz4::block::CompressionMode::DEFAULT), true)
        })
        .await
        .map_err(|e| Error::CompressionFailed {
            reason: format!("compression task failed: {e}"),
        })?
        .map_err(|e| Error::CompressionFailed {
            reason: e.to_string(),
        })?;

        if compressed.len() < value.len() {
            Ok(TierValue::compressed(Bytes::from(compressed)))
        } else {
            Ok(TierValue::raw(value))
        }
    }

    /// Recover the original bytes from a tier value
    pub async fn decode(&self, value: TierValue) -> Result<Bytes> {
        if !value.compressed {
            return Ok(value.payload);
        }

        let payload = value.payload;
        let decompressed =
            tokio::task::spawn_blocking(move || lz4::block::decompress(&payload, None))
                .await
                .map_err(|e| Error::DecompressionFailed {
                    reason: format!("decompression task failed: {e}"),
                })?
                .map_err(|e| Error::DecompressionFailed {
                    reason: e.to_string(),
                })?;

        Ok(Bytes::from(decompressed))
    }
}

// =============================================================================
// Tests
// =============================================================================
