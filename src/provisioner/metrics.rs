//! Prometheus metrics for provisioning attempts

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Duration;

use crate::error::Result;

/// Counters and latencies of provisioning attempts
#[derive(Clone)]
pub struct ProvisionMetrics {
    provisions: IntCounterVec,
    duration: HistogramVec,
}

impl ProvisionMetrics {
    /// Create the metrics and register them with `registry`
    pub fn register(registry: &Registry) -> Result<Self> {
        let provisions = IntCounterVec::new(
            Opts::new("cosi_provision_total", "Provisioning attempts by kind and outcome"),
            &["kind", "outcome"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "cosi_provision_duration_seconds",
                "Duration of provisioning attempts",
            ),
            &["kind"],
        )?;

        registry.register(Box::new(provisions.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            provisions,
            duration,
        })
    }

    /// Record one attempt
    pub fn observe(&self, kind: &str, outcome: &str, elapsed: Duration) {
        self.provisions.with_label_values(&[kind, outcome]).inc();
        self.duration
            .with_label_values(&[kind])
            .observe(elapsed.as_secs_f64());
    }

    /// Attempts recorded for `kind` ending in `outcome`
    pub fn count(&self, kind: &str, outcome: &str) -> u64 {
        self.provisions.with_label_values(&[kind, outcome]).get()
    }
}
