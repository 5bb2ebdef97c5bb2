//! Prometheus metrics for lockrace.
//!
//! Export-only view of race activity:
//! - Attempt counts and latency per operation
//! - Late successes and race results
//! - Scheduler wake overshoot
//! - Current priority per operation
//!
//! The per-race [`crate::MetricsAggregator`] remains the source of truth for
//! `MetricsSnapshot`; these series are cumulative across the process.
//!
//! # Panics
//!
//! Each series registers itself on first use and unwraps the registration
//! result. A failure means two series share a name, which is a programming
//! error and aborts on first touch instead of dropping samples.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram, register_histogram_vec,
    register_int_gauge_vec, CounterVec, GaugeVec, Histogram, HistogramVec, IntGaugeVec,
};

/// Total attempts.
/// Labels: operation (claim/transfer), result (success/retryable/terminal)
pub static ATTEMPTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lockrace_attempts_total",
        "Total attempts against the external service",
        &["operation", "result"]
    )
    .unwrap()
});

/// Attempt latency in milliseconds.
pub static ATTEMPT_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "lockrace_attempt_latency_ms",
        "Time spent inside one attempt call in milliseconds",
        &["operation"],
        vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0]
    )
    .unwrap()
});

/// Successes that arrived after the race was already won.
pub static LATE_SUCCESS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lockrace_late_success_total",
        "Successes observed after another worker claimed the race",
        &["operation"]
    )
    .unwrap()
});

/// Finished races.
/// Labels: operation, result (won/deadline_exceeded/attempts_exhausted/cancelled/panicked)
pub static RACES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lockrace_races_total",
        "Total finished races by result",
        &["operation", "result"]
    )
    .unwrap()
});

/// Time from race start to winning claim in milliseconds.
pub static TIME_TO_WIN_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "lockrace_time_to_win_ms",
        "Time from race start to the winning claim in milliseconds",
        &["operation"],
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 30000.0]
    )
    .unwrap()
});

/// Scheduler wake overshoot in microseconds.
pub static WAKE_OVERSHOOT_US: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "lockrace_wake_overshoot_us",
        "Scheduler wake overshoot past the target in microseconds",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 10000.0]
    )
    .unwrap()
});

/// Current priority value per operation.
pub static PRIORITY_CURRENT: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "lockrace_priority_current",
        "Current priority/fee value",
        &["operation"]
    )
    .unwrap()
});

/// Last observed competitor priority per operation.
pub static COMPETITOR_PRIORITY: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "lockrace_competitor_priority",
        "Last observed competing priority/fee value",
        &["operation"]
    )
    .unwrap()
});

/// Workers currently running.
pub static WORKERS_ACTIVE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "lockrace_workers_active",
        "Number of race workers currently running",
        &["operation"]
    )
    .unwrap()
});

/// Composite orchestration results.
/// Labels: status (both_succeeded/partial_success/both_failed)
pub static COMPOSITE_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lockrace_composite_total",
        "Total dual-operation orchestrations by status",
        &["status"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record one finished attempt.
    pub fn attempt(operation: &str, result: &str, latency_ms: f64) {
        ATTEMPTS_TOTAL
            .with_label_values(&[operation, result])
            .inc();
        ATTEMPT_LATENCY_MS
            .with_label_values(&[operation])
            .observe(latency_ms);
    }

    /// Record a success that lost the claim.
    pub fn late_success(operation: &str) {
        LATE_SUCCESS_TOTAL.with_label_values(&[operation]).inc();
    }

    /// Record a finished race.
    pub fn race_finished(operation: &str, result: &str) {
        RACES_TOTAL.with_label_values(&[operation, result]).inc();
    }

    /// Record time to the winning claim.
    pub fn time_to_win(operation: &str, elapsed_ms: f64) {
        TIME_TO_WIN_MS
            .with_label_values(&[operation])
            .observe(elapsed_ms);
    }

    /// Record scheduler wake overshoot.
    pub fn wake_overshoot(overshoot_us: f64) {
        WAKE_OVERSHOOT_US.observe(overshoot_us);
    }

    /// Update current priority.
    pub fn priority(operation: &str, value: u64) {
        PRIORITY_CURRENT
            .with_label_values(&[operation])
            .set(value as f64);
    }

    /// Update last observed competitor priority.
    pub fn competitor_priority(operation: &str, value: u64) {
        COMPETITOR_PRIORITY
            .with_label_values(&[operation])
            .set(value as f64);
    }

    /// Increment running workers.
    pub fn worker_started(operation: &str) {
        WORKERS_ACTIVE.with_label_values(&[operation]).inc();
    }

    /// Decrement running workers.
    pub fn worker_stopped(operation: &str) {
        WORKERS_ACTIVE.with_label_values(&[operation]).dec();
    }

    /// Record a composite orchestration result.
    pub fn composite(status: &str) {
        COMPOSITE_TOTAL.with_label_values(&[status]).inc();
    }
}
