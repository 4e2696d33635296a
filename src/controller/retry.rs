//! Per-request retry delays
//!
//! Each request that fails with a retryable error gets its own exponential
//! backoff. The backoff is dropped once the request settles.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use dashmap::DashMap;
use std::time::Duration;

use crate::error::DEPENDENCY_REQUEUE;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// First delay after a failure
    pub initial_interval: Duration,
    /// Upper bound for any delay
    pub max_interval: Duration,
    pub multiplier: f64,
    /// Random spread applied to each delay, 0.0 disables it
    pub randomization_factor: f64,
    /// Delay used while a referenced object is not ready yet
    pub dependency_requeue: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(300),
            multiplier: 2.0,
            randomization_factor: 0.1,
            dependency_requeue: DEPENDENCY_REQUEUE,
        }
    }
}

impl RetryConfig {
    fn build(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_multiplier(self.multiplier)
            .with_randomization_factor(self.randomization_factor)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Tracks backoff state per request key
pub struct RetryTracker {
    config: RetryConfig,
    backoffs: DashMap<String, ExponentialBackoff>,
}

impl RetryTracker {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            backoffs: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before the next attempt for `key`
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut backoff = self
            .backoffs
            .entry(key.to_string())
            .or_insert_with(|| self.config.build());
        backoff
            .next_backoff()
            .unwrap_or(self.config.max_interval)
    }

    /// Forget the backoff for `key`
    pub fn reset(&self, key: &str) {
        self.backoffs.remove(key);
    }

    /// Keep only the backoffs whose key satisfies `keep`
    pub fn retain(&self, mut keep: impl FnMut(&str) -> bool) {
        self.backoffs.retain(|key, _| keep(key));
    }

    /// Number of requests currently backing off
    pub fn len(&self) -> usize {
        self.backoffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backoffs.is_empty()
    }
}
