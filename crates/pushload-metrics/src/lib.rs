//! Metrics sinks for the pushload load generator.
//!
//! Drivers record counters and timings through the [`Metrics`] trait; the
//! concrete backend is chosen at startup. Submissions must never block the
//! driver loops, so every backend hands data off synchronously (a
//! non-blocking UDP datagram, or an in-memory buffer flushed in the
//! background).

mod datadog;
mod statsd;

pub use datadog::DatadogMetrics;
pub use statsd::StatsdMetrics;

/// A metrics backend.
pub trait Metrics: Send + Sync {
    /// Add `count` to the named counter.
    fn increment(&self, name: &str, count: i64);

    /// Record a timing in milliseconds.
    fn timing(&self, name: &str, ms: u64);

    /// Flush and release backend resources. Idempotent.
    fn stop(&self) {}
}

/// Swallows everything. Used whenever no backend is configured.
pub struct SinkMetrics;

impl Metrics for SinkMetrics {
    fn increment(&self, _name: &str, _count: i64) {}

    fn timing(&self, _name: &str, _ms: u64) {}
}
