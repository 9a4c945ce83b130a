//! Background scheduler
//!
//! Owns the three long-running loops behind a started cache:
//!
//! - cleanup: periodic eager sweep of expired L1 entries
//! - warming: periodic re-read of the configured hot keys
//! - invalidation listener: subscribes to the bus and applies remote
//!   invalidations locally, resubscribing with backoff when the transport
//!   drops
//!
//! Every loop is tied to one cancellation token; `stop` cancels the token and
//! awaits each task, so shutdown never leaves a loop running against a
//! half-dropped cache.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::orchestrator::DistributedCache;

/// Initial delay before resubscribing a dropped invalidation stream
const RESUBSCRIBE_BASE: Duration = Duration::from_secs(1);
/// Upper bound on the resubscribe backoff
const RESUBSCRIBE_MAX: Duration = Duration::from_secs(30);

/// Handle over the background loops of one cache instance
pub(crate) struct Scheduler {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn the loops the configuration calls for
    pub(crate) fn start(cache: Arc<DistributedCache>) -> Self {
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();
        let config = cache.config();

        if config.enable_l1 {
            handles.push(tokio::spawn(cleanup_loop(
                Arc::clone(&cache),
                config.cleanup_interval,
                cancel.child_token(),
            )));
        }

        if config.cache_warming_enabled && !config.warm_keys.is_empty() {
            handles.push(tokio::spawn(warming_loop(
                Arc::clone(&cache),
                config.warming_interval,
                cancel.child_token(),
            )));
        }

        if cache.bus().is_some() {
            handles.push(tokio::spawn(listener_loop(
                Arc::clone(&cache),
                cancel.child_token(),
            )));
        }

        info!(tasks = handles.len(), "scheduler started");
        Self { cancel, handles }
    }

    /// Cancel every loop and wait for it to finish
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("scheduler stopped");
    }
}

/// Eagerly sweep expired L1 entries on a fixed interval
async fn cleanup_loop(cache: Arc<DistributedCache>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    // The tick fires immediately on the first poll; skip that one so a
    // freshly started cache is not swept at t=0.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let removed = cache.sweep_expired();
                if removed > 0 {
                    debug!(removed, "cleanup sweep evicted expired entries");
                }
            }
        }
    }
}

/// Re-read the configured hot keys on a fixed interval so they stay resident
/// in the fast tiers
async fn warming_loop(cache: Arc<DistributedCache>, interval: Duration, cancel: CancellationToken) {
    let keys = cache.config().warm_keys.clone();
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                debug!(keys = keys.len(), "warming pass");
                cache.warmup(&keys).await;
            }
        }
    }
}

/// Apply remote invalidations for the lifetime of the cache.
///
/// The subscription stream can drop (transport restart, network blip); the
/// loop resubscribes with exponential backoff and never gives up while the
/// cache is running. Messages are applied locally only, so the loop can never
/// amplify its own traffic.
async fn listener_loop(cache: Arc<DistributedCache>, cancel: CancellationToken) {
    let mut backoff = RESUBSCRIBE_BASE;

    loop {
        let bus = match cache.bus() {
            Some(bus) => Arc::clone(bus),
            None => return,
        };

        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return,
            subscribed = bus.subscribe() => match subscribed {
                Ok(stream) => {
                    backoff = RESUBSCRIBE_BASE;
                    stream
                }
                Err(e) => {
                    warn!(error = %e, delay = ?backoff, "invalidation subscribe failed, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(RESUBSCRIBE_MAX);
                    continue;
                }
            },
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                msg = stream.next() => match msg {
                    Some(msg) => {
                        cache.apply_invalidation(&msg.key).await;
                    }
                    None => {
                        warn!("invalidation stream ended, resubscribing");
                        break;
                    }
                },
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
