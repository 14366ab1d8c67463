//! TTL cache with coalesced fetches

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use keyflight_core::{
    qualify, CacheEntry, CacheError, CacheStats, Clock, Component, EvictionReason, FlightMetrics,
    NoopMetrics, RequestKey, TokioClock,
};

use crate::inflight::{Admission, InFlight, Vacancy};

/// Configuration for TtlCache
#[derive(Debug, Clone)]
pub struct TtlCacheConfig {
    /// TTL used by [`TtlCache::get_or_fetch_default`]
    pub default_ttl: Duration,
    /// Namespace prefix for all keys
    pub namespace: Option<String>,
    /// Maximum number of entries (0 = unlimited)
    pub max_entries: usize,
    /// Return the last good value when a refresh fails
    pub serve_stale_on_error: bool,
}

impl Default for TtlCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(30),
            namespace: None,
            max_entries: 0,
            serve_stale_on_error: false,
        }
    }
}

impl TtlCacheConfig {
    /// Create config with specific default TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            default_ttl: ttl,
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

    /// Bound the number of stored entries
    pub fn with_capacity(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Serve the stale value instead of the error when a refresh fails
    pub fn stale_on_error(mut self) -> Self {
        self.serve_stale_on_error = true;
        self
    }
}

/// Caches fetched values per key for a per-call TTL
///
/// Concurrent callers of a key share one fetch. Only successful fetches are
/// stored; a failed fetch leaves the cache as it was.
///
/// Cloning creates a new handle to the SAME store.
///
/// ```rust,no_run
/// use keyflight::prelude::*;
/// use std::time::Duration;
///
/// # #[derive(Clone)] struct User;
/// # async fn fetch_user(_id: u64) -> Result<User> { Ok(User) }
/// # async fn run() -> Result<()> {
/// let users: TtlCache<User> = TtlCache::new(TtlCacheConfig::default());
///
/// let user = users
///     .get_or_fetch(("user", 42), Duration::from_secs(30), || fetch_user(42))
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct TtlCache<V, E = CacheError, M = NoopMetrics>
where
    M: FlightMetrics,
{
    flights: InFlight<V, E>,
    store: Store<V, M>,
}

/// Everything a fetch needs once launched. Kept apart from the in-flight
/// table so a flight never holds a handle to the table that holds it.
struct Store<V, M> {
    entries: Arc<DashMap<String, CacheEntry<V>>>,
    clock: Arc<dyn Clock>,
    metrics: Arc<M>,
    config: TtlCacheConfig,
}

impl<V, E> TtlCache<V, E, NoopMetrics>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a cache with no metrics
    pub fn new(config: TtlCacheConfig) -> Self {
        Self::with_metrics(config, NoopMetrics)
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(TtlCacheConfig::default())
    }
}

impl<V, E, M> TtlCache<V, E, M>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    M: FlightMetrics,
{
    /// Create a cache reporting to `metrics`
    pub fn with_metrics(config: TtlCacheConfig, metrics: M) -> Self {
        Self {
            flights: InFlight::new(),
            store: Store {
                entries: Arc::new(DashMap::new()),
                clock: Arc::new(TokioClock),
                metrics: Arc::new(metrics),
                config,
            },
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.store.clock = Arc::new(clock);
        self
    }

    /// Get the config
    pub fn config(&self) -> &TtlCacheConfig {
        &self.store.config
    }

    fn full_key(&self, key: &impl RequestKey) -> String {
        qualify(self.store.config.namespace.as_deref(), key)
    }

    /// [`TtlCache::get_or_fetch`] with the configured default TTL
    pub async fn get_or_fetch_default<F, Fut>(
        &self,
        key: impl RequestKey,
        fetcher: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        self.get_or_fetch(key, self.store.config.default_ttl, fetcher).await
    }

    /// Return the fresh value for `key`, or fetch and store a new one
    ///
    /// Order of precedence: a fetch already in flight for `key` is joined; a
    /// value stored less than its TTL ago is returned as is; otherwise
    /// `fetcher` runs and, on success, its value is stored for `ttl`.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: impl RequestKey,
        ttl: Duration,
        fetcher: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let key = self.full_key(&key);
        let now = self.store.clock.now();

        let admission = self.flights.admit(&key, || {
            let fresh = self
                .store
                .entries
                .get(&key)
                .filter(|entry| entry.is_fresh(now))
                .map(|entry| entry.value.clone());
            if let Some(value) = fresh {
                return Vacancy::Ready(value);
            }

            let store = self.store.clone();
            let flight_key = key.clone();
            Vacancy::Launch(
                async move {
                    let started = store.clock.now();
                    let result = fetcher().await;
                    let settled = store.clock.now();
                    store.metrics.record_latency(
                        Component::Cache,
                        settled.saturating_duration_since(started),
                    );
                    match result {
                        Ok(value) => {
                            store.insert(flight_key, CacheEntry::new(value.clone(), settled, ttl));
                            Ok(value)
                        }
                        Err(err) => {
                            store.metrics.record_failure(&flight_key, Component::Cache);
                            match store.stale_fallback(&flight_key) {
                                Some(stale) => Ok(stale),
                                None => Err(err),
                            }
                        }
                    }
                }
                .boxed(),
            )
        });

        // Metrics are recorded once the key's slot is unlocked, so a sink may
        // call back into this cache.
        match admission {
            Admission::Ready(value) => {
                self.store.metrics.record_hit(&key);
                Ok(value)
            }
            Admission::Joined(flight) => {
                self.store.metrics.record_coalesced(&key, Component::Cache);
                flight.await
            }
            Admission::Launched(flight) => {
                self.store.metrics.record_miss(&key);
                let result = flight.await;
                self.record_size();
                result
            }
        }
    }

    fn record_size(&self) {
        self.store
            .metrics
            .record_size(self.store.entries.len(), self.flights.len());
    }

    /// Fresh value for `key` without fetching
    pub fn peek(&self, key: impl RequestKey) -> Option<V> {
        let now = self.store.clock.now();
        self.store
            .entries
            .get(&self.full_key(&key))
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.value.clone())
    }

    /// Drop the stored value for `key`
    ///
    /// A fetch in flight for `key` is left alone and stores its value when it
    /// succeeds.
    pub fn invalidate(&self, key: impl RequestKey) {
        if self.store.entries.remove(&self.full_key(&key)).is_some() {
            self.store.metrics.record_eviction(EvictionReason::Invalidated, 1);
        }
    }

    /// Drop every stored value
    pub fn invalidate_all(&self) {
        let count = self.store.entries.len();
        self.store.entries.clear();
        if count > 0 {
            self.store.metrics.record_eviction(EvictionReason::Invalidated, count);
        }
    }

    /// Remove entries whose TTL has elapsed, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let purged = self.store.purge_at(self.store.clock.now());
        self.record_size();
        purged
    }

    /// Spawn a task calling [`TtlCache::purge_expired`] every `every`
    ///
    /// The task runs until the handle is aborted. Its period follows
    /// `tokio::time`, not the injected clock.
    pub fn spawn_janitor(&self, every: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        let period = every.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.purge_expired();
            }
        })
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let cached_keys: Vec<String> = self
            .store
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        CacheStats {
            cache_size: cached_keys.len(),
            pending_count: self.flights.len(),
            cached_keys,
        }
    }

    /// Get the number of stored entries, fresh or stale
    pub fn len(&self) -> usize {
        self.store.entries.len()
    }

    /// Check if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.store.entries.is_empty()
    }
}

impl<V, M> Store<V, M>
where
    V: Clone + Send + Sync + 'static,
    M: FlightMetrics,
{
    fn stale_fallback(&self, key: &str) -> Option<V> {
        if !self.config.serve_stale_on_error {
            return None;
        }
        let stale = self.entries.get(key).map(|entry| entry.value.clone())?;
        self.metrics.record_stale_served(key);
        Some(stale)
    }

    fn insert(&self, key: String, entry: CacheEntry<V>) {
        let max = self.config.max_entries;
        if max > 0 && !self.entries.contains_key(&key) && self.entries.len() >= max {
            self.make_room(entry.stored_at, max);
        }
        self.entries.insert(key, entry);
    }

    // Expired entries go first; if that is not enough, the oldest.
    fn make_room(&self, now: Instant, max: usize) {
        let expired = self.purge_at(now);
        if expired > 0 && self.entries.len() < max {
            return;
        }

        let mut evicted = 0;
        while self.entries.len() >= max {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.stored_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            self.metrics.record_eviction(EvictionReason::Capacity, evicted);
        }
    }

    fn purge_at(&self, now: Instant) -> usize {
        let mut purged = 0;
        self.entries.retain(|_, entry| {
            let fresh = entry.is_fresh(now);
            if !fresh {
                purged += 1;
            }
            fresh
        });
        if purged > 0 {
            self.metrics.record_eviction(EvictionReason::Expired, purged);
        }
        purged
    }
}

impl<V, M> Clone for Store<V, M> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            clock: self.clock.clone(),
            metrics: self.metrics.clone(),
            config: self.config.clone(),
        }
    }
}

impl<V, E, M> Clone for TtlCache<V, E, M>
where
    M: FlightMetrics,
{
    fn clone(&self) -> Self {
        Self {
            flights: self.flights.clone(),
            store: self.store.clone(),
        }
    }
}
