//! Requests in progress
//!
//! Serializes the check-then-create sequence per request within this
//! process. Different requests never wait on each other.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-request locks, keyed by `namespace/name`
#[derive(Default)]
pub struct InFlightRequests {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl InFlightRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other caller holds `key`, then hold it
    pub async fn acquire(&self, key: impl Into<String>) -> InFlightGuard {
        let key = key.into();
        let lock = self.locks.entry(key.clone()).or_default().clone();
        let guard = lock.lock_owned().await;

        InFlightGuard {
            key,
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Number of requests being provisioned or waited on
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.locks.contains_key(key)
    }
}

/// Held while a request is being provisioned
pub struct InFlightGuard {
    key: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        // The map and this guard own one reference each; any more means
        // someone is waiting and will reuse the entry.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) <= 2);
        self.guard.take();
    }
}
