//! keyflight-core: Core traits and types for the keyflight library
//!
//! This crate provides the foundational types shared by the request
//! coalescer and the TTL cache: keys, clocks, metrics sinks, cache entries
//! and diagnostic stats.

mod error;
mod traits;
mod types;

pub use error::{CacheError, Result};
pub use traits::*;
pub use types::*;
