use crate::{Component, EvictionReason, FlightMetrics};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Metrics adapter that logs events via `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingMetrics {
    /// Service name/prefix (optional)
    service_name: Option<String>,
}

impl TracingMetrics {
    /// Create new tracing metrics adapter
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with service name prefix
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }
}

impl FlightMetrics for TracingMetrics {
    fn record_hit(&self, key: &str) {
        debug!(
            target: "keyflight",
            event = "hit",
            key = %key,
            service = ?self.service_name,
            "Cache Hit"
        );
    }

    fn record_miss(&self, key: &str) {
        debug!(
            target: "keyflight",
            event = "miss",
            key = %key,
            service = ?self.service_name,
            "Cache Miss"
        );
    }

    fn record_coalesced(&self, key: &str, component: Component) {
        debug!(
            target: "keyflight",
            event = "coalesced",
            key = %key,
            component = component.as_str(),
            service = ?self.service_name,
            "Joined In-Flight Request"
        );
    }

    fn record_throttled(&self, key: &str, delay: Duration) {
        debug!(
            target: "keyflight",
            event = "throttled",
            key = %key,
            delay_ms = delay.as_millis(),
            service = ?self.service_name,
            "Request Start Delayed"
        );
    }

    fn record_failure(&self, key: &str, component: Component) {
        debug!(
            target: "keyflight",
            event = "fetch_failed",
            key = %key,
            component = component.as_str(),
            service = ?self.service_name,
            "Operation Failed"
        );
    }

    fn record_stale_served(&self, key: &str) {
        warn!(
            target: "keyflight",
            event = "stale_served",
            key = %key,
            service = ?self.service_name,
            "Refresh Failed, Serving Stale Value"
        );
    }

    fn record_latency(&self, component: Component, duration: Duration) {
        trace!(
            target: "keyflight",
            event = "latency",
            component = component.as_str(),
            duration_ms = duration.as_millis(),
            service = ?self.service_name,
            "Operation Latency"
        );
    }

    fn record_eviction(&self, reason: EvictionReason, count: usize) {
        debug!(
            target: "keyflight",
            event = "evicted",
            reason = reason.as_str(),
            count = count,
            service = ?self.service_name,
            "Entries Evicted"
        );
    }

    fn record_size(&self, entries: usize, pending: usize) {
        trace!(
            target: "keyflight",
            event = "size",
            entries = entries,
            pending = pending,
            service = ?self.service_name,
            "Size Update"
        );
    }
}
