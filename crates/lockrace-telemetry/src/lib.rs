//! Metrics aggregation, Prometheus export and structured logging for lockrace.
//!
//! - [`MetricsAggregator`]: per-race attempt counters and latency percentiles
//! - [`Metrics`]: process-wide Prometheus series
//! - [`init_logging`]: tracing subscriber setup
//! - [`render_metrics`]: text exposition of the default registry

pub mod aggregator;
pub mod error;
pub mod logging;
pub mod metrics;

pub use aggregator::MetricsAggregator;
pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;

/// Render all registered metrics in the Prometheus text format.
pub fn render_metrics() -> TelemetryResult<String> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
