//! Execution window: when a race may start and how precisely.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use crate::error::{CoreError, Result};

/// Default spin phase length before the target.
pub const DEFAULT_GRACE_BEFORE_SPIN: Duration = Duration::from_millis(1);

/// Default overshoot above which a wake is reported as degraded.
pub const DEFAULT_MAX_OVERSHOOT: Duration = Duration::from_millis(5);

/// Immutable per-race timing parameters.
///
/// `target` is a monotonic instant. Wall-clock unlock times are converted
/// once with [`ExecutionWindow::from_wall_clock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionWindow {
    /// Instant at which the race starts.
    pub target: Instant,
    /// Length of the final spin-yield phase.
    pub grace_before_spin: Duration,
    /// Overshoot above which the wake is logged as degraded.
    pub max_overshoot: Duration,
}

impl ExecutionWindow {
    /// Window with default precision settings.
    #[must_use]
    pub fn new(target: Instant) -> Self {
        Self {
            target,
            grace_before_spin: DEFAULT_GRACE_BEFORE_SPIN,
            max_overshoot: DEFAULT_MAX_OVERSHOOT,
        }
    }

    /// Window that opens `delay` after `now`.
    #[must_use]
    pub fn after(now: Instant, delay: Duration) -> Self {
        Self::new(now + delay)
    }

    /// Window that is already open.
    #[must_use]
    pub fn immediate() -> Self {
        Self::new(Instant::now())
    }

    /// Convert a wall-clock unlock time into a monotonic window.
    ///
    /// `wall_now` and `mono_now` must be sampled together. Unlock times in
    /// the past map to `mono_now`, so the race starts immediately.
    #[must_use]
    pub fn from_wall_clock(
        unlock_at: DateTime<Utc>,
        wall_now: DateTime<Utc>,
        mono_now: Instant,
    ) -> Self {
        let delay = (unlock_at - wall_now).to_std().unwrap_or(Duration::ZERO);
        Self::new(mono_now + delay)
    }

    #[must_use]
    pub fn with_grace(mut self, grace_before_spin: Duration) -> Self {
        self.grace_before_spin = grace_before_spin;
        self
    }

    #[must_use]
    pub fn with_max_overshoot(mut self, max_overshoot: Duration) -> Self {
        self.max_overshoot = max_overshoot;
        self
    }

    /// Validate the precision settings.
    pub fn validate(&self) -> Result<()> {
        if self.max_overshoot.is_zero() {
            return Err(CoreError::InvalidWindow(
                "max_overshoot must be > 0".to_string(),
            ));
        }
        if self.grace_before_spin > Duration::from_secs(1) {
            return Err(CoreError::InvalidWindow(format!(
                "grace_before_spin {:?} exceeds 1s",
                self.grace_before_spin
            )));
        }
        Ok(())
    }
}
