//! Invalidation bus
//!
//! Publishes and subscribes invalidation messages so peer instances evict
//! stale local copies. Propagation is best-effort and eventually consistent:
//! publish failures are logged by the orchestrator, never surfaced to the
//! caller of `set`/`delete`.
//!
//! Wire format (JSON, one message per key, channel `cache_invalidation`):
//!
//! ```json
//! {"action": "invalidate", "key": "<key>"}
//! ```
//!
//! A listener applies the local-delete logic without re-publishing, so its
//! own messages loop back as idempotent no-ops rather than propagation storms.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::{Error, Result};

/// Pub/sub channel carrying invalidation messages
pub const INVALIDATION_CHANNEL: &str = "cache_invalidation";

/// One invalidation event for one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    /// Message action; only `"invalidate"` is recognized
    pub action: String,
    /// Key to evict
    pub key: String,
}

impl InvalidationMessage {
    /// Build an invalidate message for `key`
    pub fn invalidate(key: impl Into<String>) -> Self {
        Self {
            action: "invalidate".to_string(),
            key: key.into(),
        }
    }

    /// Whether this message requests an invalidation
    pub fn is_invalidate(&self) -> bool {
        self.action == "invalidate"
    }
}

/// Shared channel for cross-instance invalidation
#[async_trait]
pub trait InvalidationBus: Send + Sync {
    /// Publish a message to every subscriber (including this process)
    async fn publish(&self, msg: &InvalidationMessage) -> Result<()>;

    /// Open a subscription stream. Each call returns an independent stream;
    /// the stream ends when the transport drops, and the listener loop is
    /// responsible for resubscribing.
    async fn subscribe(&self) -> Result<BoxStream<'static, InvalidationMessage>>;
}

fn parse_payload(payload: &str) -> Option<InvalidationMessage> {
    match serde_json::from_str::<InvalidationMessage>(payload) {
        Ok(msg) if msg.is_invalidate() => Some(msg),
        Ok(msg) => {
            warn!(action = %msg.action, "ignoring invalidation message with unknown action");
            None
        }
        Err(e) => {
            warn!(error = %e, "dropping malformed invalidation message");
            None
        }
    }
}

// =============================================================================
// In-process bus
// =============================================================================

/// In-process bus for single-node deployments and tests.
///
/// Messages still round-trip through the JSON wire format so both bus
/// implementations exercise the same parsing path.
pub struct InProcessBus {
    sender: broadcast::Sender<String>,
}

impl InProcessBus {
    /// Create a bus with the given subscriber buffer depth
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl InvalidationBus for InProcessBus {
    async fn publish(&self, msg: &InvalidationMessage) -> Result<()> {
        let payload = serde_json::to_string(msg)?;
        // No subscribers is not a failure; the message just has no audience.
        let _ = self.sender.send(payload);
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, InvalidationMessage>> {
        let rx = self.sender.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => {
                        if let Some(msg) = parse_payload(&payload) {
                            return Some((msg, rx));
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "invalidation subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}

// =============================================================================
// Redis bus
// =============================================================================

/// Redis pub/sub bus for multi-instance deployments.
///
/// Construction only parses the URL. Publish connections are dialed lazily
/// and re-dialed after a transport error; the subscribe side opens a fresh
/// pub/sub connection per call, so the listener loop's backoff handles a
/// down transport on both sides.
pub struct RedisBus {
    client: redis::Client,
    /// Cached publish connection; `None` until first use and after an error
    connection: tokio::sync::Mutex<Option<redis::aio::MultiplexedConnection>>,
}

impl std::fmt::Debug for RedisBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBus").finish_non_exhaustive()
    }
}

impl RedisBus {
    /// Create a bus over the shared channel transport. Does not dial; a
    /// malformed URL is the only construction-time failure.
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Config(format!("invalid invalidation bus url: {e}")))?;
        Ok(Self {
            client,
            connection: tokio::sync::Mutex::new(None),
        })
    }

    /// The cached publish connection, dialing a fresh one if needed
    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| Error::Propagation(e.to_string()))?;
        *slot = Some(conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl InvalidationBus for RedisBus {
    async fn publish(&self, msg: &InvalidationMessage) -> Result<()> {
        let payload = serde_json::to_string(msg)?;
        let mut conn = self.connection().await?;
        let published = redis::cmd("PUBLISH")
            .arg(INVALIDATION_CHANNEL)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await;

        if let Err(e) = published {
            // Next publish dials fresh instead of reusing a dead connection
            *self.connection.lock().await = None;
            return Err(Error::Propagation(e.to_string()));
        }
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, InvalidationMessage>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| Error::Propagation(e.to_string()))?;
        pubsub
            .subscribe(INVALIDATION_CHANNEL)
            .await
            .map_err(|e| Error::Propagation(e.to_string()))?;

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                let payload: String = msg.get_payload().ok()?;
                parse_payload(&payload)
            })
            .boxed();
        Ok(stream)
    }
}

// =============================================================================
// Tests
// =============================================================================
