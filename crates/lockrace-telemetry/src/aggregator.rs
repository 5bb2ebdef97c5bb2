//! Per-race attempt statistics.
//!
//! All counters live behind one lock so a snapshot never mixes values from
//! different updates. Latencies are kept in a bounded sample buffer from
//! which p50/p99 are computed on demand.

use std::collections::VecDeque;
use std::time::Duration;

use lockrace_core::{AttemptOutcome, ErrorClass, MetricsSnapshot, OperationKind};
use parking_lot::Mutex;

use crate::metrics::Metrics;

/// Default number of latency samples kept.
pub const DEFAULT_SAMPLE_CAPACITY: usize = 4096;

#[derive(Debug, Default)]
struct Counters {
    attempts: u64,
    successes: u64,
    failures: u64,
    retryable_failures: u64,
    terminal_failures: u64,
    late_successes: u64,
    durations_us: VecDeque<u64>,
}

/// Thread-safe attempt aggregator for one race.
#[derive(Debug)]
pub struct MetricsAggregator {
    operation: OperationKind,
    sample_capacity: usize,
    counters: Mutex<Counters>,
}

impl MetricsAggregator {
    /// Create an aggregator for the given operation.
    #[must_use]
    pub fn new(operation: OperationKind) -> Self {
        Self::with_sample_capacity(operation, DEFAULT_SAMPLE_CAPACITY)
    }

    /// Create an aggregator with an explicit latency sample capacity.
    #[must_use]
    pub fn with_sample_capacity(operation: OperationKind, sample_capacity: usize) -> Self {
        let sample_capacity = sample_capacity.max(1);
        Self {
            operation,
            sample_capacity,
            counters: Mutex::new(Counters {
                durations_us: VecDeque::with_capacity(sample_capacity.min(DEFAULT_SAMPLE_CAPACITY)),
                ..Default::default()
            }),
        }
    }

    #[must_use]
    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    /// Record one finished attempt.
    pub fn record_attempt(&self, outcome: &AttemptOutcome) {
        let duration_us = outcome.duration.as_micros().min(u128::from(u64::MAX)) as u64;
        let result = {
            let mut c = self.counters.lock();
            c.attempts += 1;
            let result = if outcome.success {
                c.successes += 1;
                "success"
            } else {
                c.failures += 1;
                match outcome.error_kind.map(|k| k.class()) {
                    Some(ErrorClass::Terminal) => {
                        c.terminal_failures += 1;
                        "terminal"
                    }
                    _ => {
                        c.retryable_failures += 1;
                        "retryable"
                    }
                }
            };
            if c.durations_us.len() == self.sample_capacity {
                c.durations_us.pop_front();
            }
            c.durations_us.push_back(duration_us);
            result
        };

        Metrics::attempt(
            self.operation.as_str(),
            result,
            duration_us as f64 / 1000.0,
        );
    }

    /// Record a success that arrived after the race was already won.
    pub fn record_late_success(&self) {
        self.counters.lock().late_successes += 1;
        Metrics::late_success(self.operation.as_str());
    }

    /// Copy the current statistics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (mut samples, snapshot) = {
            let c = self.counters.lock();
            let samples: Vec<u64> = c.durations_us.iter().copied().collect();
            let snapshot = MetricsSnapshot {
                attempts: c.attempts,
                successes: c.successes,
                failures: c.failures,
                retryable_failures: c.retryable_failures,
                terminal_failures: c.terminal_failures,
                late_successes: c.late_successes,
                p50_duration: Duration::ZERO,
                p99_duration: Duration::ZERO,
            };
            (samples, snapshot)
        };

        samples.sort_unstable();
        MetricsSnapshot {
            p50_duration: Duration::from_micros(percentile(&samples, 0.50)),
            p99_duration: Duration::from_micros(percentile(&samples, 0.99)),
            ..snapshot
        }
    }
}

/// Nearest-rank percentile of sorted samples (0 when empty).
fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
