//! Core types for cached and coalesced operations

mod entry;
mod stats;

pub use entry::CacheEntry;
pub use stats::{CacheStats, CoalescerStats};
