//! Core traits for keys, time and metrics

mod clock;
mod key;
mod metrics;
#[cfg(feature = "tracing")]
mod tracing;

pub use clock::{Clock, ManualClock, TokioClock};
pub use key::{qualify, KeyBuilder, RequestKey, KEY_SEPARATOR};
pub use metrics::{Component, EvictionReason, FlightMetrics, NoopMetrics};

#[cfg(feature = "metrics")]
pub use metrics::MetricsCrateAdapter;

#[cfg(feature = "tracing")]
pub use self::tracing::TracingMetrics;
