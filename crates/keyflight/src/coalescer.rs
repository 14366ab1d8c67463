//! Request coalescing with per-key throttling

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::FutureExt;
use tokio::time::Instant;

use keyflight_core::{
    qualify, CacheError, Clock, CoalescerStats, Component, EvictionReason, FlightMetrics,
    NoopMetrics, RequestKey, TokioClock,
};

use crate::inflight::{Admission, InFlight, Vacancy};

/// Configuration for RequestCoalescer
#[derive(Debug, Clone)]
pub struct CoalescerConfig {
    /// Minimum spacing between operation starts for one key, used when the
    /// caller does not pass one
    pub default_throttle: Duration,
    /// Namespace prefix for all keys
    pub namespace: Option<String>,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            default_throttle: Duration::from_millis(500),
            namespace: None,
        }
    }
}

impl CoalescerConfig {
    /// Create config with a specific default throttle
    pub fn with_throttle(throttle: Duration) -> Self {
        Self {
            default_throttle: throttle,
            ..Default::default()
        }
    }

    /// Create config with namespace
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    /// Only de-duplicate, never delay
    pub fn no_throttle(mut self) -> Self {
        self.default_throttle = Duration::ZERO;
        self
    }
}

/// De-duplicates concurrent requests per key and paces successive ones
///
/// While an operation for a key is in flight, every caller of that key gets
/// the same result. Once it has settled, the next operation for the key does
/// not start until the throttle window since the previous start has passed.
///
/// Cloning creates a new handle to the SAME state.
///
/// ```rust,no_run
/// use keyflight::prelude::*;
///
/// # async fn submit_form() -> Result<u64> { Ok(1) }
/// # async fn run() -> Result<()> {
/// let submits: RequestCoalescer<u64> = RequestCoalescer::new(CoalescerConfig::default());
///
/// // A double click results in one submission.
/// let (a, b) = tokio::join!(
///     submits.throttled_request("form:signup", submit_form),
///     submits.throttled_request("form:signup", submit_form),
/// );
/// assert_eq!(a?, b?);
/// # Ok(())
/// # }
/// ```
pub struct RequestCoalescer<T, E = CacheError, M = NoopMetrics>
where
    M: FlightMetrics,
{
    flights: InFlight<T, E>,
    // Scheduled start of the latest launched operation per key
    last_started: Arc<DashMap<String, Instant>>,
    clock: Arc<dyn Clock>,
    metrics: Arc<M>,
    config: CoalescerConfig,
}

impl<T, E> RequestCoalescer<T, E, NoopMetrics>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a coalescer with no metrics
    pub fn new(config: CoalescerConfig) -> Self {
        Self::with_metrics(config, NoopMetrics)
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(CoalescerConfig::default())
    }
}

impl<T, E, M> RequestCoalescer<T, E, M>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    M: FlightMetrics,
{
    /// Create a coalescer reporting to `metrics`
    pub fn with_metrics(config: CoalescerConfig, metrics: M) -> Self {
        Self {
            flights: InFlight::new(),
            last_started: Arc::new(DashMap::new()),
            clock: Arc::new(TokioClock),
            metrics: Arc::new(metrics),
            config,
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Get the config
    pub fn config(&self) -> &CoalescerConfig {
        &self.config
    }

    fn full_key(&self, key: &impl RequestKey) -> String {
        qualify(self.config.namespace.as_deref(), key)
    }

    /// Run `op` for `key` with the default throttle
    pub async fn throttled_request<F, Fut>(&self, key: impl RequestKey, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.throttled_request_with(key, self.config.default_throttle, op)
            .await
    }

    /// Run `op` for `key`, joining an in-flight call or waiting out `throttle`
    ///
    /// `op` is invoked at most once per launched flight; callers that join a
    /// flight drop their own `op` unused. Errors from `op` reach every waiter
    /// unchanged.
    pub async fn throttled_request_with<F, Fut>(
        &self,
        key: impl RequestKey,
        throttle: Duration,
        op: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let key = self.full_key(&key);
        let now = self.clock.now();
        let mut throttled = Duration::ZERO;

        let admission = self.flights.admit(&key, || {
            let last = self.last_started.get(&key).map(|started| *started);
            let delay = last.map_or(Duration::ZERO, |last| throttle_delay(now, last, throttle));
            let start_at = capped_start(now, delay);
            self.last_started.insert(key.clone(), start_at);
            throttled = delay;

            let clock = self.clock.clone();
            let metrics = self.metrics.clone();
            let flight_key = key.clone();
            Vacancy::Launch(
                async move {
                    // Measured again here: the task may first run after `now`.
                    let wait = start_at.saturating_duration_since(clock.now());
                    if !wait.is_zero() {
                        clock.sleep(wait).await;
                    }
                    let started = clock.now();
                    let result = op().await;
                    metrics.record_latency(
                        Component::Coalescer,
                        clock.now().saturating_duration_since(started),
                    );
                    if result.is_err() {
                        metrics.record_failure(&flight_key, Component::Coalescer);
                    }
                    result
                }
                .boxed(),
            )
        });

        // Recorded once the key's slot is unlocked, so a sink may call back
        // into this coalescer.
        if !throttled.is_zero() {
            self.metrics.record_throttled(&key, throttled);
        }

        match admission {
            Admission::Joined(flight) => {
                self.metrics.record_coalesced(&key, Component::Coalescer);
                flight.await
            }
            Admission::Launched(flight) => flight.await,
            Admission::Ready(value) => Ok(value),
        }
    }

    /// Forget the throttle record and in-flight entry for `key`
    ///
    /// A running operation is not cancelled; its current waiters still get
    /// its result, but the next call starts a fresh one immediately.
    pub fn clear(&self, key: impl RequestKey) {
        let key = self.full_key(&key);
        let detached = self.flights.remove(&key);
        let forgotten = self.last_started.remove(&key).is_some();
        if detached || forgotten {
            self.metrics.record_eviction(EvictionReason::Invalidated, 1);
        }
    }

    /// Forget every throttle record and in-flight entry
    pub fn clear_all(&self) {
        let mut keys: HashSet<String> = self.flights.keys().into_iter().collect();
        keys.extend(self.last_started.iter().map(|started| started.key().clone()));
        self.flights.clear();
        self.last_started.clear();
        let count = keys.len();
        if count > 0 {
            self.metrics.record_eviction(EvictionReason::Invalidated, count);
        }
    }

    /// Drop throttle records whose last start is at least `idle_for` ago
    ///
    /// Keys with an operation in flight are kept. Returns how many records
    /// were dropped.
    pub fn prune_idle(&self, idle_for: Duration) -> usize {
        let now = self.clock.now();
        let busy: HashSet<String> = self.flights.keys().into_iter().collect();
        let mut pruned = 0;
        self.last_started.retain(|key, started| {
            let keep = busy.contains(key) || now.saturating_duration_since(*started) < idle_for;
            if !keep {
                pruned += 1;
            }
            keep
        });
        if pruned > 0 {
            self.metrics.record_eviction(EvictionReason::Idle, pruned);
        }
        pruned
    }

    /// Check whether an operation for `key` is in flight
    pub fn is_pending(&self, key: impl RequestKey) -> bool {
        self.flights.contains(&self.full_key(&key))
    }

    /// Get coalescer statistics
    pub fn stats(&self) -> CoalescerStats {
        let pending_keys = self.flights.keys();
        CoalescerStats {
            tracked_keys: self.last_started.len(),
            pending_count: pending_keys.len(),
            pending_keys,
        }
    }
}

/// Wait before the next start, given the previous scheduled start `last`
fn throttle_delay(now: Instant, last: Instant, throttle: Duration) -> Duration {
    if last > now {
        (last - now).saturating_add(throttle)
    } else {
        throttle.saturating_sub(now - last)
    }
}

// About 30 years, the same cap tokio applies to oversized sleeps.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + delay`, capped instead of overflowing
fn capped_start(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay.min(FAR_FUTURE))
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

impl<T, E, M> Clone for RequestCoalescer<T, E, M>
where
    M: FlightMetrics,
{
    fn clone(&self) -> Self {
        Self {
            flights: self.flights.clone(),
            last_started: self.last_started.clone(),
            clock: self.clock.clone(),
            metrics: self.metrics.clone(),
            config: self.config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyflight_core::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(
        calls: Arc<AtomicUsize>,
        value: u32,
    ) -> impl FnOnce() -> std::future::Ready<Result<u32, CacheError>> + Send + 'static {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(value))
        }
    }

    #[tokio::test]
    async fn test_first_call_runs_immediately() {
        let clock = ManualClock::new();
        let coalescer: RequestCoalescer<u32> =
            RequestCoalescer::with_defaults().with_clock(clock.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let value = coalescer
            .throttled_request("save", counting(calls.clone(), 1))
            .await
            .unwrap();

        assert_eq!(value, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_second_call_waits_out_window() {
        let clock = ManualClock::new();
        let coalescer: RequestCoalescer<u32> =
            RequestCoalescer::with_defaults().with_clock(clock.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        coalescer
            .throttled_request("save", counting(calls.clone(), 1))
            .await
            .unwrap();
        clock.advance(Duration::from_millis(100));
        coalescer
            .throttled_request("save", counting(calls.clone(), 2))
            .await
            .unwrap();

        // ManualClock::sleep advances time by the remaining 400ms.
        assert_eq!(clock.elapsed(), Duration::from_millis(500));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_wait_after_window() {
        let clock = ManualClock::new();
        let coalescer: RequestCoalescer<u32> =
            RequestCoalescer::with_defaults().with_clock(clock.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        coalescer
            .throttled_request("save", counting(calls.clone(), 1))
            .await
            .unwrap();
        clock.advance(Duration::from_millis(500));
        coalescer
            .throttled_request("save", counting(calls.clone(), 2))
            .await
            .unwrap();

        assert_eq!(clock.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_explicit_throttle() {
        let clock = ManualClock::new();
        let coalescer: RequestCoalescer<u32> =
            RequestCoalescer::with_defaults().with_clock(clock.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let throttle = Duration::from_secs(2);

        coalescer
            .throttled_request_with("save", throttle, counting(calls.clone(), 1))
            .await
            .unwrap();
        coalescer
            .throttled_request_with("save", throttle, counting(calls.clone(), 2))
            .await
            .unwrap();

        assert_eq!(clock.elapsed(), throttle);
    }

    #[tokio::test]
    async fn test_clear_resets_throttle() {
        let clock = ManualClock::new();
        let coalescer: RequestCoalescer<u32> =
            RequestCoalescer::with_defaults().with_clock(clock.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        coalescer
            .throttled_request("save", counting(calls.clone(), 1))
            .await
            .unwrap();
        coalescer.clear("save");
        coalescer
            .throttled_request("save", counting(calls.clone(), 2))
            .await
            .unwrap();

        assert_eq!(clock.elapsed(), Duration::ZERO);
        assert_eq!(coalescer.stats().tracked_keys, 1);
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let coalescer: RequestCoalescer<u32> = RequestCoalescer::with_defaults();
        let calls = Arc::new(AtomicUsize::new(0));
        coalescer
            .throttled_request("keep", counting(calls.clone(), 1))
            .await
            .unwrap();

        coalescer.clear("missing");
        coalescer.clear("missing");

        assert_eq!(coalescer.stats().tracked_keys, 1);
    }

    #[tokio::test]
    async fn test_prune_idle() {
        let clock = ManualClock::new();
        let coalescer: RequestCoalescer<u32> =
            RequestCoalescer::new(CoalescerConfig::default().no_throttle())
                .with_clock(clock.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        coalescer
            .throttled_request("old", counting(calls.clone(), 1))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(60));
        coalescer
            .throttled_request("recent", counting(calls.clone(), 2))
            .await
            .unwrap();

        assert_eq!(coalescer.prune_idle(Duration::from_secs(30)), 1);
        assert_eq!(coalescer.stats().tracked_keys, 1);
        assert_eq!(coalescer.prune_idle(Duration::from_secs(30)), 0);
    }

    #[tokio::test]
    async fn test_namespace_prefixes_keys() {
        let coalescer: RequestCoalescer<u32> =
            RequestCoalescer::new(CoalescerConfig::with_namespace("tenant-1"));
        let gate = Arc::new(tokio::sync::Notify::new());
        let wait = gate.clone();

        let request = coalescer.throttled_request("save", move || async move {
            wait.notified().await;
            Ok(5)
        });
        let mut request = tokio_test::task::spawn(request);
        tokio_test::assert_pending!(request.poll());

        assert!(coalescer.is_pending("save"));
        assert_eq!(coalescer.stats().pending_keys, vec!["tenant-1:save".to_string()]);

        gate.notify_one();
        assert_eq!(request.await, Ok(5));
        assert!(!coalescer.is_pending("save"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_throttle_does_not_overflow() {
        let coalescer: RequestCoalescer<u32> = RequestCoalescer::with_defaults();
        let calls = Arc::new(AtomicUsize::new(0));

        coalescer
            .throttled_request_with("k", Duration::MAX, counting(calls.clone(), 1))
            .await
            .unwrap();

        let second =
            coalescer.throttled_request_with("k", Duration::MAX, counting(calls.clone(), 2));
        let mut second = tokio_test::task::spawn(second);
        tokio_test::assert_pending!(second.poll());
        assert!(coalescer.is_pending("k"));

        // A third caller with the same window joins instead of overflowing.
        let third =
            coalescer.throttled_request_with("k", Duration::MAX, counting(calls.clone(), 3));
        let mut third = tokio_test::task::spawn(third);
        tokio_test::assert_pending!(third.poll());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        coalescer.clear("k");
        assert_eq!(
            coalescer
                .throttled_request_with("k", Duration::MAX, counting(calls.clone(), 4))
                .await,
            Ok(4)
        );
    }

    #[test]
    fn test_throttle_delay_saturates() {
        let now = Instant::now();
        let earlier = now - Duration::from_millis(100);
        let later = now + Duration::from_millis(100);

        assert_eq!(
            throttle_delay(now, earlier, Duration::from_millis(500)),
            Duration::from_millis(400)
        );
        assert_eq!(throttle_delay(now, earlier, Duration::from_millis(50)), Duration::ZERO);
        assert_eq!(
            throttle_delay(now, later, Duration::from_millis(500)),
            Duration::from_millis(600)
        );
        assert_eq!(throttle_delay(now, later, Duration::MAX), Duration::MAX);
        assert_eq!(capped_start(now, Duration::MAX), now + FAR_FUTURE);
    }

    #[derive(Clone, Default)]
    struct EvictionCounter(Arc<AtomicUsize>);

    impl FlightMetrics for EvictionCounter {
        fn record_hit(&self, _key: &str) {}
        fn record_miss(&self, _key: &str) {}
        fn record_coalesced(&self, _key: &str, _component: Component) {}
        fn record_throttled(&self, _key: &str, _delay: Duration) {}
        fn record_failure(&self, _key: &str, _component: Component) {}
        fn record_stale_served(&self, _key: &str) {}
        fn record_latency(&self, _component: Component, _duration: Duration) {}
        fn record_size(&self, _entries: usize, _pending: usize) {}

        fn record_eviction(&self, _reason: EvictionReason, count: usize) {
            self.0.fetch_add(count, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_clear_all_counts_pending_and_idle_keys() {
        let evicted = EvictionCounter::default();
        let coalescer: RequestCoalescer<u32, CacheError, EvictionCounter> =
            RequestCoalescer::with_metrics(CoalescerConfig::default(), evicted.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(tokio::sync::Notify::new());
        let wait = gate.clone();

        coalescer
            .throttled_request("idle", counting(calls.clone(), 1))
            .await
            .unwrap();
        let busy = coalescer.throttled_request("busy", move || async move {
            wait.notified().await;
            Ok(2)
        });
        let mut busy = tokio_test::task::spawn(busy);
        tokio_test::assert_pending!(busy.poll());

        coalescer.clear_all();
        assert_eq!(evicted.0.load(Ordering::SeqCst), 2);
        assert_eq!(coalescer.stats(), CoalescerStats::default());

        coalescer.clear_all();
        assert_eq!(evicted.0.load(Ordering::SeqCst), 2);

        gate.notify_one();
        assert_eq!(busy.await, Ok(2));
    }
}
