//! Race and priority configuration.
//!
//! All values are caller supplied and validated when a race is started.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CoreError, Result};
use crate::race::DEFAULT_ERROR_RING_CAPACITY;

/// Configuration of one race coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceConfig {
    /// Number of concurrent workers.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Attempts per worker before it gives up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay between a worker's retries (ms).
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Coordinator-wide wall-clock cutoff (ms).
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,
    /// Capacity of the recent-error ring.
    #[serde(default = "default_error_ring_capacity")]
    pub error_ring_capacity: usize,
    /// Cap on concurrent attempt calls. None = one per worker.
    #[serde(default)]
    pub max_in_flight: Option<usize>,
    /// Growth factor of the retry delay after each failure (1.0 = fixed).
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Upper bound of the grown retry delay (ms).
    #[serde(default = "default_max_retry_interval_ms")]
    pub max_retry_interval_ms: u64,
    /// Minimum delay after a rate-limited failure (ms).
    #[serde(default = "default_rate_limit_retry_ms")]
    pub rate_limit_retry_ms: u64,
    /// Delay between consecutive worker launches (µs). 0 = launch together.
    #[serde(default)]
    pub stagger_us: u64,
}

fn default_worker_count() -> usize {
    64
}

fn default_max_attempts() -> u32 {
    100
}

fn default_retry_interval_ms() -> u64 {
    5
}

fn default_max_duration_ms() -> u64 {
    30_000
}

fn default_error_ring_capacity() -> usize {
    DEFAULT_ERROR_RING_CAPACITY
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_max_retry_interval_ms() -> u64 {
    100
}

fn default_rate_limit_retry_ms() -> u64 {
    50
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            max_attempts: default_max_attempts(),
            retry_interval_ms: default_retry_interval_ms(),
            max_duration_ms: default_max_duration_ms(),
            error_ring_capacity: default_error_ring_capacity(),
            max_in_flight: None,
            backoff_multiplier: default_backoff_multiplier(),
            max_retry_interval_ms: default_max_retry_interval_ms(),
            rate_limit_retry_ms: default_rate_limit_retry_ms(),
            stagger_us: 0,
        }
    }
}

impl RaceConfig {
    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    #[must_use]
    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }

    #[must_use]
    pub fn max_retry_interval(&self) -> Duration {
        Duration::from_millis(self.max_retry_interval_ms.max(self.retry_interval_ms))
    }

    #[must_use]
    pub fn rate_limit_retry(&self) -> Duration {
        Duration::from_millis(self.rate_limit_retry_ms)
    }

    #[must_use]
    pub fn stagger(&self) -> Duration {
        Duration::from_micros(self.stagger_us)
    }

    /// Effective number of concurrent attempt calls.
    #[must_use]
    pub fn in_flight_limit(&self) -> usize {
        self.max_in_flight
            .unwrap_or(self.worker_count)
            .clamp(1, self.worker_count.max(1))
    }

    /// Validate against the call-time rules.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(CoreError::InvalidConfig("worker_count must be > 0".into()));
        }
        if self.max_attempts == 0 {
            return Err(CoreError::InvalidConfig("max_attempts must be > 0".into()));
        }
        if self.retry_interval_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "retry_interval_ms must be > 0".into(),
            ));
        }
        if self.max_duration_ms == 0 {
            return Err(CoreError::InvalidConfig("max_duration_ms must be > 0".into()));
        }
        if self.error_ring_capacity == 0 {
            return Err(CoreError::InvalidConfig(
                "error_ring_capacity must be > 0".into(),
            ));
        }
        if self.max_in_flight == Some(0) {
            return Err(CoreError::InvalidConfig("max_in_flight must be > 0".into()));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(CoreError::InvalidConfig(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

/// Configuration of the priority/fee controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityConfig {
    /// Seed value and decay target.
    pub base: u64,
    /// Lower bound.
    pub min: u64,
    /// Upper bound. Escalation never exceeds it.
    pub max: u64,
    /// Multiplier applied to a competitor value that beats ours (>= 1.0).
    #[serde(default = "default_escalation_factor")]
    pub escalation_factor: f64,
    /// Fraction of the excess over `base` kept per idle interval, in (0, 1].
    #[serde(default = "default_decay_per_interval")]
    pub decay_per_interval: f64,
    /// Length of an idle interval (ms).
    #[serde(default = "default_decay_interval_ms")]
    pub decay_interval_ms: u64,
    /// Size of the rolling success-rate window.
    #[serde(default = "default_outcome_window")]
    pub outcome_window: usize,
    /// Number of priority samples kept for tuning.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_escalation_factor() -> f64 {
    2.5
}

fn default_decay_per_interval() -> f64 {
    0.9
}

fn default_decay_interval_ms() -> u64 {
    1_000
}

fn default_outcome_window() -> usize {
    100
}

fn default_history_capacity() -> usize {
    1_000
}

impl PriorityConfig {
    /// Config with the given bounds and default tuning.
    #[must_use]
    pub fn new(base: u64, min: u64, max: u64) -> Self {
        Self {
            base,
            min,
            max,
            escalation_factor: default_escalation_factor(),
            decay_per_interval: default_decay_per_interval(),
            decay_interval_ms: default_decay_interval_ms(),
            outcome_window: default_outcome_window(),
            history_capacity: default_history_capacity(),
        }
    }

    /// Defaults for claiming a locked balance.
    #[must_use]
    pub fn claim_default() -> Self {
        Self::new(9_400_000, 1_000_000, 50_000_000)
    }

    /// Defaults for transferring an available balance.
    #[must_use]
    pub fn transfer_default() -> Self {
        Self::new(3_200_000, 1_000_000, 50_000_000)
    }

    #[must_use]
    pub fn decay_interval(&self) -> Duration {
        Duration::from_millis(self.decay_interval_ms)
    }

    /// Validate against the call-time rules.
    pub fn validate(&self) -> Result<()> {
        if self.min > self.max {
            return Err(CoreError::InvalidConfig(format!(
                "priority min {} > max {}",
                self.min, self.max
            )));
        }
        if self.base < self.min || self.base > self.max {
            return Err(CoreError::InvalidConfig(format!(
                "priority base {} outside [{}, {}]",
                self.base, self.min, self.max
            )));
        }
        if !self.escalation_factor.is_finite() || self.escalation_factor < 1.0 {
            return Err(CoreError::InvalidConfig(format!(
                "escalation_factor must be >= 1.0, got {}",
                self.escalation_factor
            )));
        }
        if !(self.decay_per_interval > 0.0 && self.decay_per_interval <= 1.0) {
            return Err(CoreError::InvalidConfig(format!(
                "decay_per_interval must be in (0, 1], got {}",
                self.decay_per_interval
            )));
        }
        if self.decay_interval_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "decay_interval_ms must be > 0".into(),
            ));
        }
        if self.outcome_window == 0 {
            return Err(CoreError::InvalidConfig("outcome_window must be > 0".into()));
        }
        Ok(())
    }
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self::transfer_default()
    }
}
