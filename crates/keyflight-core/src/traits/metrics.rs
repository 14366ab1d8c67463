//! Metrics trait for coalescer and cache observability

use std::time::Duration;

/// Which component emitted an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    /// The request coalescer
    Coalescer,
    /// The TTL cache
    Cache,
}

impl Component {
    /// Get component as string label
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Coalescer => "coalescer",
            Component::Cache => "cache",
        }
    }
}

/// Reason a cache entry or throttle record was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
    /// TTL elapsed and the entry was swept
    Expired,
    /// Capacity limit reached
    Capacity,
    /// Explicitly invalidated or cleared
    Invalidated,
    /// Throttle record unused for longer than the idle window
    Idle,
}

impl EvictionReason {
    /// Get reason as string label
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionReason::Expired => "expired",
            EvictionReason::Capacity => "capacity",
            EvictionReason::Invalidated => "invalidated",
            EvictionReason::Idle => "idle",
        }
    }
}

/// Trait for coalescer and cache metrics
///
/// Implement this to integrate with your metrics system (Prometheus, StatsD, etc.)
///
/// Methods are never called while a key's slot is locked, so an
/// implementation may read the stats of the component it observes.
pub trait FlightMetrics: Send + Sync + 'static {
    /// Fresh cached value served without running the fetcher
    fn record_hit(&self, key: &str);

    /// No usable cached value, a new fetch was launched
    fn record_miss(&self, key: &str);

    /// Caller joined a flight already in progress
    fn record_coalesced(&self, key: &str, component: Component);

    /// Operation start was delayed to honour the throttle window
    fn record_throttled(&self, key: &str, delay: Duration);

    /// Operation settled with an error
    fn record_failure(&self, key: &str, component: Component);

    /// Stale value returned because the refresh failed
    fn record_stale_served(&self, key: &str);

    /// Time from operation start to settlement
    fn record_latency(&self, component: Component, duration: Duration);

    /// Entries dropped
    fn record_eviction(&self, reason: EvictionReason, count: usize);

    /// Current number of stored entries and flights in progress
    fn record_size(&self, entries: usize, pending: usize);
}

/// No-op metrics implementation (default)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl FlightMetrics for NoopMetrics {
    #[inline]
    fn record_hit(&self, _key: &str) {}

    #[inline]
    fn record_miss(&self, _key: &str) {}

    #[inline]
    fn record_coalesced(&self, _key: &str, _component: Component) {}

    #[inline]
    fn record_throttled(&self, _key: &str, _delay: Duration) {}

    #[inline]
    fn record_failure(&self, _key: &str, _component: Component) {}

    #[inline]
    fn record_stale_served(&self, _key: &str) {}

    #[inline]
    fn record_latency(&self, _component: Component, _duration: Duration) {}

    #[inline]
    fn record_eviction(&self, _reason: EvictionReason, _count: usize) {}

    #[inline]
    fn record_size(&self, _entries: usize, _pending: usize) {}
}

/// Metrics adapter using the `metrics` crate
///
/// # Example
/// ```ignore
/// use keyflight_core::MetricsCrateAdapter;
///
/// // Install a recorder first, e.g. metrics_exporter_prometheus
/// let metrics = MetricsCrateAdapter::new("keyflight");
/// // Emits: keyflight_hits_total, keyflight_coalesced_total{component}, ...
/// ```
#[cfg(feature = "metrics")]
#[derive(Debug, Clone)]
pub struct MetricsCrateAdapter {
    prefix: String,
}

#[cfg(feature = "metrics")]
impl MetricsCrateAdapter {
    /// Create a new adapter with the given metric name prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn metric_name(&self, name: &str) -> String {
        format!("{}_{}", self.prefix, name)
    }
}

#[cfg(feature = "metrics")]
impl FlightMetrics for MetricsCrateAdapter {
    fn record_hit(&self, _key: &str) {
        metrics::counter!(self.metric_name("hits_total")).increment(1);
    }

    fn record_miss(&self, _key: &str) {
        metrics::counter!(self.metric_name("misses_total")).increment(1);
    }

    fn record_coalesced(&self, _key: &str, component: Component) {
        metrics::counter!(
            self.metric_name("coalesced_total"),
            "component" => component.as_str()
        )
        .increment(1);
    }

    fn record_throttled(&self, _key: &str, delay: Duration) {
        metrics::counter!(self.metric_name("throttled_total")).increment(1);
        metrics::histogram!(self.metric_name("throttle_delay_seconds")).record(delay.as_secs_f64());
    }

    fn record_failure(&self, _key: &str, component: Component) {
        metrics::counter!(
            self.metric_name("fetch_failures_total"),
            "component" => component.as_str()
        )
        .increment(1);
    }

    fn record_stale_served(&self, _key: &str) {
        metrics::counter!(self.metric_name("stale_served_total")).increment(1);
    }

    fn record_latency(&self, component: Component, duration: Duration) {
        metrics::histogram!(
            self.metric_name("operation_duration_seconds"),
            "component" => component.as_str()
        )
        .record(duration.as_secs_f64());
    }

    fn record_eviction(&self, reason: EvictionReason, count: usize) {
        metrics::counter!(
            self.metric_name("evictions_total"),
            "reason" => reason.as_str()
        )
        .increment(count as u64);
    }

    fn record_size(&self, entries: usize, pending: usize) {
        metrics::gauge!(self.metric_name("entries")).set(entries as f64);
        metrics::gauge!(self.metric_name("pending")).set(pending as f64);
    }
}
