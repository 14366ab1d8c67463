//! keyflight: request coalescing, per-key throttling and TTL caching
//!
//! # Features
//!
//! - **Coalescing**: concurrent callers of one key share one operation
//! - **Throttling**: a minimum spacing between operation starts per key
//! - **TTL caching**: per-call TTL, failures never stored
//! - **Injectable clock** for deterministic tests
//! - **Metrics and tracing integration**
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use keyflight::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let cache: TtlCache<String> = TtlCache::new(TtlCacheConfig::default());
//!
//!     let name = cache
//!         .get_or_fetch("user:42", Duration::from_secs(30), || async {
//!             Ok("Alice".to_string())
//!         })
//!         .await?;
//!     println!("Got: {name}");
//!
//!     let saves: RequestCoalescer<u64> = RequestCoalescer::with_defaults();
//!     let id = saves
//!         .throttled_request("form:profile", || async { Ok(7) })
//!         .await?;
//!     println!("Saved: {id}");
//!
//!     Ok(())
//! }
//! ```

mod coalescer;
mod inflight;
mod ttl_cache;

// Re-export core
pub use keyflight_core::*;

#[cfg(feature = "derive")]
pub use keyflight_derive::RequestKey;

pub use coalescer::{CoalescerConfig, RequestCoalescer};
pub use ttl_cache::{TtlCache, TtlCacheConfig};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        CacheError, CacheStats, CoalescerConfig, CoalescerStats, KeyBuilder, RequestCoalescer,
        RequestKey, Result, TtlCache, TtlCacheConfig,
    };
}
