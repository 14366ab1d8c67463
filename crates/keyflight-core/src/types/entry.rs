//! Cache entry type

use std::time::Duration;
use tokio::time::Instant;

/// A successfully fetched value together with its freshness window
///
/// Entries are only ever built from a fetch that resolved; failures never
/// produce one.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The cached value
    pub value: V,
    /// When the fetch that produced the value settled
    pub stored_at: Instant,
    /// How long the value stays fresh
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// Create a new cache entry
    pub fn new(value: V, stored_at: Instant, ttl: Duration) -> Self {
        Self {
            value,
            stored_at,
            ttl,
        }
    }

    /// Fresh while strictly less than `ttl` has elapsed since `stored_at`
    pub fn is_fresh(&self, now: Instant) -> bool {
        self.age(now) < self.ttl
    }

    /// Inverse of [`CacheEntry::is_fresh`]
    pub fn is_expired(&self, now: Instant) -> bool {
        !self.is_fresh(now)
    }

    /// Time since the value was stored
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.stored_at)
    }

    /// Time left before the entry goes stale, `None` once it has
    pub fn ttl_remaining(&self, now: Instant) -> Option<Duration> {
        self.ttl
            .checked_sub(self.age(now))
            .filter(|left| !left.is_zero())
    }
}
