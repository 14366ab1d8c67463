//! Diagnostic statistics

use serde::Serialize;

/// Snapshot of a TTL cache
///
/// Diagnostic only: entries may have gone stale since the snapshot, and
/// `cached_keys` carries no ordering guarantee.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Number of stored entries, fresh or stale
    pub cache_size: usize,
    /// Number of keys with a fetch in flight
    pub pending_count: usize,
    /// Keys of the stored entries
    pub cached_keys: Vec<String>,
}

impl CacheStats {
    /// Whether nothing is cached and nothing is in flight
    pub fn is_idle(&self) -> bool {
        self.cache_size == 0 && self.pending_count == 0
    }
}

/// Snapshot of a request coalescer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoalescerStats {
    /// Keys with a throttle record
    pub tracked_keys: usize,
    /// Number of keys with an operation in flight
    pub pending_count: usize,
    /// Keys of the operations in flight
    pub pending_keys: Vec<String>,
}
