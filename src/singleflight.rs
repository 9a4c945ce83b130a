//! Single-flight coordinator
//!
//! Deduplicates concurrent cache-miss loads for the same key within one
//! process: the first caller becomes the leader and invokes the loader, every
//! other caller awaits the leader's result. The in-flight slot is removed
//! before the result is broadcast, so a miss that arrives after completion
//! starts a fresh load.
//!
//! This is the countermeasure to the cache-stampede failure mode: without it,
//! many concurrent requests for the same cold key would each hit the origin.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::{Error, Result};

/// Result shared between the leader and its waiters
type SharedResult = std::result::Result<Bytes, Arc<Error>>;

enum Role {
    Leader(broadcast::Sender<SharedResult>),
    Waiter(broadcast::Receiver<SharedResult>),
}

/// Per-key load deduplication
///
/// The in-flight map lock is never held across an await point; membership is
/// decided synchronously and the loader runs outside the lock.
#[derive(Default)]
pub struct SingleFlight {
    in_flight: Mutex<HashMap<String, broadcast::Sender<SharedResult>>>,
}

impl SingleFlight {
    /// Create a new coordinator
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of loads currently in flight
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Run `loader` for `key`, or await an identical load already in flight.
    ///
    /// The leader's result - success or error - is delivered to every caller.
    /// Waiters see a failed load as [`Error::LoadFailed`].
    pub async fn run<F, Fut>(&self, key: &str, loader: F) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>>,
    {
        let role = {
            let mut map = self.in_flight.lock();
            match map.get(key) {
                Some(tx) => Role::Waiter(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    map.insert(key.to_string(), tx.clone());
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Leader(tx) => {
                let shared: SharedResult = loader().await.map_err(Arc::new);

                // Remove before broadcasting so later misses load fresh.
                self.in_flight.lock().remove(key);
                let _ = tx.send(shared.clone());

                shared.map_err(|e| Error::LoadFailed {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            }
            Role::Waiter(mut rx) => match rx.recv().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(Error::LoadFailed {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
                Err(_) => Err(Error::LoadFailed {
                    key: key.to_string(),
                    reason: "in-flight load was abandoned".into(),
                }),
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
