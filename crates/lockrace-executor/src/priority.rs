//! Bounded adaptive priority/fee controller.
//!
//! Escalation rule:
//! - `observe_competitor(v)` with `v > current` sets
//!   `current = clamp(v * escalation_factor, min, max)`
//! - after a full `decay_interval` without competitor observations,
//!   `current = base + (current - base) * decay_per_interval`
//!
//! Outcomes feed a rolling success-rate window used for reporting only;
//! they never change `current`.
//!
//! # Thread Safety
//!
//! `current` is published through an atomic so workers read it without
//! locking. Every mutation goes through a single mutex.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lockrace_core::{OperationKind, PriorityConfig};
use lockrace_telemetry::Metrics;
use parking_lot::Mutex;
use tracing::debug;

use crate::clock::DynClock;
use crate::error::ExecutorResult;

/// Point-in-time copy of the controller state.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorityState {
    pub current: u64,
    pub base: u64,
    pub min: u64,
    pub max: u64,
    pub escalation_factor: f64,
    pub decay_per_interval: f64,
    pub last_observed_competitor: Option<u64>,
    pub last_update: Instant,
}

/// One priority decision kept for tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrioritySample {
    pub at: DateTime<Utc>,
    pub competitor: Option<u64>,
    pub used: u64,
    pub success: bool,
}

/// Controller summary for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorityReport {
    pub state: PriorityState,
    /// Success rate over the rolling window, None before any outcome.
    pub success_rate: Option<f64>,
    pub window_len: usize,
}

#[derive(Debug)]
struct Inner {
    last_observed_competitor: Option<u64>,
    last_observation: Instant,
    last_update: Instant,
    outcomes: VecDeque<bool>,
    window_successes: usize,
    history: VecDeque<PrioritySample>,
}

/// Priority controller for one race.
pub struct PriorityController {
    operation: OperationKind,
    config: PriorityConfig,
    clock: DynClock,
    current: AtomicU64,
    inner: Mutex<Inner>,
}

impl PriorityController {
    /// Create a controller seeded at `config.base`.
    ///
    /// # Errors
    /// Returns `ExecutorError::Config` if the configuration is invalid.
    pub fn new(
        operation: OperationKind,
        config: PriorityConfig,
        clock: DynClock,
    ) -> ExecutorResult<Self> {
        config.validate()?;
        let now = clock.now();
        Metrics::priority(operation.as_str(), config.base);

        Ok(Self {
            operation,
            current: AtomicU64::new(config.base),
            inner: Mutex::new(Inner {
                last_observed_competitor: None,
                last_observation: now,
                last_update: now,
                outcomes: VecDeque::with_capacity(config.outcome_window),
                window_successes: 0,
                history: VecDeque::new(),
            }),
            config,
            clock,
        })
    }

    #[must_use]
    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    #[must_use]
    pub fn decay_interval(&self) -> Duration {
        self.config.decay_interval()
    }

    /// Current priority. Lock-free.
    #[must_use]
    pub fn next_priority(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Feed a competing priority value. Returns the resulting priority.
    pub fn observe_competitor(&self, value: u64) -> u64 {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        inner.last_observed_competitor = Some(value);
        inner.last_observation = now;
        Metrics::competitor_priority(self.operation.as_str(), value);

        let current = self.current.load(Ordering::Acquire);
        if value <= current {
            return current;
        }

        let escalated = self.clamp(value as f64 * self.config.escalation_factor);
        if escalated != current {
            self.publish(&mut inner, escalated, now);
            debug!(
                operation = %self.operation,
                competitor = value,
                from = current,
                to = escalated,
                "Priority escalated"
            );
        }
        escalated
    }

    /// Apply one decay step toward `base`. Returns the resulting priority.
    pub fn decay_tick(&self) -> u64 {
        let mut inner = self.inner.lock();
        self.decay_locked(&mut inner)
    }

    /// Decay only if no competitor was observed during the last interval.
    ///
    /// Returns true if a decay step was applied.
    pub fn decay_if_idle(&self) -> bool {
        let mut inner = self.inner.lock();
        let idle = self
            .clock
            .now()
            .saturating_duration_since(inner.last_observation);
        if idle < self.config.decay_interval() {
            return false;
        }
        self.decay_locked(&mut inner);
        true
    }

    /// Record the outcome of an attempt made with `used_priority`.
    pub fn record_outcome(&self, success: bool, used_priority: u64) {
        let mut inner = self.inner.lock();

        if inner.outcomes.len() == self.config.outcome_window {
            if let Some(true) = inner.outcomes.pop_front() {
                inner.window_successes -= 1;
            }
        }
        inner.outcomes.push_back(success);
        if success {
            inner.window_successes += 1;
        }

        if self.config.history_capacity > 0 {
            if inner.history.len() == self.config.history_capacity {
                inner.history.pop_front();
            }
            let sample = PrioritySample {
                at: Utc::now(),
                competitor: inner.last_observed_competitor,
                used: used_priority,
                success,
            };
            inner.history.push_back(sample);
        }
    }

    /// Success rate over the rolling window.
    #[must_use]
    pub fn success_rate(&self) -> Option<f64> {
        let inner = self.inner.lock();
        Self::rate(&inner)
    }

    /// Copy of the current state.
    #[must_use]
    pub fn state(&self) -> PriorityState {
        let inner = self.inner.lock();
        self.state_locked(&inner)
    }

    /// State plus rolling success rate.
    #[must_use]
    pub fn report(&self) -> PriorityReport {
        let inner = self.inner.lock();
        PriorityReport {
            state: self.state_locked(&inner),
            success_rate: Self::rate(&inner),
            window_len: inner.outcomes.len(),
        }
    }

    /// Most recent samples, oldest first.
    #[must_use]
    pub fn recent_history(&self, limit: usize) -> Vec<PrioritySample> {
        let inner = self.inner.lock();
        let skip = inner.history.len().saturating_sub(limit);
        inner.history.iter().skip(skip).cloned().collect()
    }

    fn decay_locked(&self, inner: &mut Inner) -> u64 {
        let current = self.current.load(Ordering::Acquire);
        let base = self.config.base;
        let decayed = if current > base {
            let excess = (current - base) as f64 * self.config.decay_per_interval;
            base.saturating_add(excess.floor() as u64)
        } else {
            let deficit = (base - current) as f64 * self.config.decay_per_interval;
            base.saturating_sub(deficit.floor() as u64)
        };
        let decayed = self.clamp(decayed as f64);
        if decayed != current {
            let now = self.clock.now();
            self.publish(inner, decayed, now);
            debug!(
                operation = %self.operation,
                from = current,
                to = decayed,
                "Priority decayed"
            );
        }
        decayed
    }

    fn publish(&self, inner: &mut Inner, value: u64, now: Instant) {
        self.current.store(value, Ordering::Release);
        inner.last_update = now;
        Metrics::priority(self.operation.as_str(), value);
    }

    fn clamp(&self, value: f64) -> u64 {
        // `as` saturates for out-of-range floats.
        (value.ceil() as u64).clamp(self.config.min, self.config.max)
    }

    fn state_locked(&self, inner: &Inner) -> PriorityState {
        PriorityState {
            current: self.current.load(Ordering::Acquire),
            base: self.config.base,
            min: self.config.min,
            max: self.config.max,
            escalation_factor: self.config.escalation_factor,
            decay_per_interval: self.config.decay_per_interval,
            last_observed_competitor: inner.last_observed_competitor,
            last_update: inner.last_update,
        }
    }

    fn rate(inner: &Inner) -> Option<f64> {
        if inner.outcomes.is_empty() {
            None
        } else {
            Some(inner.window_successes as f64 / inner.outcomes.len() as f64)
        }
    }
}
