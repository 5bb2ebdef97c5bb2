//! Precision scheduler.
//!
//! Wakes a caller at a target instant with bounded overshoot. The wait is
//! split into a coarse phase (tokio sleep until `target - spin_margin`) and
//! a fine phase that polls the clock and yields to the runtime until the
//! target passes. Coarse sleeps are not accurate below ~1ms, so the spin
//! phase only covers that last margin.
//!
//! Both phases observe a [`CancellationToken`].

use std::time::{Duration, Instant};

use lockrace_core::ExecutionWindow;
use lockrace_telemetry::Metrics;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::DynClock;

/// Default length of the spin phase.
pub const DEFAULT_SPIN_MARGIN: Duration = Duration::from_millis(1);

/// Result of one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitReport {
    /// Requested wake instant.
    pub target: Instant,
    /// Instant the wait returned.
    pub actual_wake: Instant,
    /// `actual_wake - target`, zero when woken early by cancellation.
    pub overshoot: Duration,
    /// The target had already passed when the wait was requested.
    pub already_elapsed: bool,
    /// The wait was interrupted by cancellation before the target.
    pub cancelled: bool,
}

impl WaitReport {
    fn at(target: Instant, actual_wake: Instant, already_elapsed: bool) -> Self {
        Self {
            target,
            actual_wake,
            overshoot: actual_wake.saturating_duration_since(target),
            already_elapsed,
            cancelled: false,
        }
    }

    fn interrupted(target: Instant, actual_wake: Instant) -> Self {
        Self {
            cancelled: true,
            ..Self::at(target, actual_wake, false)
        }
    }

    /// Returns true if the wake was later than `bound`.
    #[must_use]
    pub fn exceeds(&self, bound: Duration) -> bool {
        !self.cancelled && !self.already_elapsed && self.overshoot > bound
    }
}

/// Wake drift measured by [`PrecisionScheduler::calibrate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriftStats {
    pub iterations: u32,
    pub average: Duration,
    pub max: Duration,
    pub min: Duration,
}

/// Sleep-then-spin scheduler over a monotonic clock.
#[derive(Clone)]
pub struct PrecisionScheduler {
    clock: DynClock,
    spin_margin: Duration,
}

impl PrecisionScheduler {
    /// Scheduler with the default spin margin.
    #[must_use]
    pub fn new(clock: DynClock) -> Self {
        Self::with_spin_margin(clock, DEFAULT_SPIN_MARGIN)
    }

    #[must_use]
    pub fn with_spin_margin(clock: DynClock, spin_margin: Duration) -> Self {
        Self { clock, spin_margin }
    }

    #[must_use]
    pub fn spin_margin(&self) -> Duration {
        self.spin_margin
    }

    #[must_use]
    pub fn clock(&self) -> &DynClock {
        &self.clock
    }

    /// Wait until `target` using the scheduler's spin margin.
    pub async fn wait_until(&self, target: Instant, cancel: &CancellationToken) -> WaitReport {
        self.wait_with_margin(target, self.spin_margin, cancel).await
    }

    /// Wait for a race window to open.
    ///
    /// Uses the window's own spin margin and logs a warning when the
    /// overshoot exceeds `window.max_overshoot`.
    pub async fn wait_for_window(
        &self,
        window: &ExecutionWindow,
        cancel: &CancellationToken,
    ) -> WaitReport {
        let report = self
            .wait_with_margin(window.target, window.grace_before_spin, cancel)
            .await;

        if report.cancelled {
            debug!("Window wait cancelled");
        } else if report.already_elapsed {
            debug!(
                late_us = report.overshoot.as_micros() as u64,
                "Window already open"
            );
        } else {
            Metrics::wake_overshoot(report.overshoot.as_secs_f64() * 1e6);
            if report.exceeds(window.max_overshoot) {
                warn!(
                    overshoot_us = report.overshoot.as_micros() as u64,
                    max_overshoot_us = window.max_overshoot.as_micros() as u64,
                    "Wake precision degraded"
                );
            } else {
                debug!(
                    overshoot_us = report.overshoot.as_micros() as u64,
                    "Window opened"
                );
            }
        }

        report
    }

    /// Sleep for `duration` with the same precision guarantees.
    pub async fn sleep_precise(&self, duration: Duration, cancel: &CancellationToken) -> WaitReport {
        let target = self.clock.now() + duration;
        self.wait_until(target, cancel).await
    }

    /// Measure wake drift over `iterations` waits of `lead` each.
    pub async fn calibrate(&self, iterations: u32, lead: Duration) -> DriftStats {
        let cancel = CancellationToken::new();
        let mut total = Duration::ZERO;
        let mut max = Duration::ZERO;
        let mut min = Duration::MAX;

        for _ in 0..iterations {
            let report = self.sleep_precise(lead, &cancel).await;
            total += report.overshoot;
            max = max.max(report.overshoot);
            min = min.min(report.overshoot);
        }

        if iterations == 0 {
            min = Duration::ZERO;
        }

        DriftStats {
            iterations,
            average: total / iterations.max(1),
            max,
            min,
        }
    }

    async fn wait_with_margin(
        &self,
        target: Instant,
        margin: Duration,
        cancel: &CancellationToken,
    ) -> WaitReport {
        let now = self.clock.now();
        if now >= target {
            return WaitReport::at(target, now, true);
        }
        if cancel.is_cancelled() {
            return WaitReport::interrupted(target, now);
        }

        // Coarse phase.
        let remaining = target - now;
        if remaining > margin {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return WaitReport::interrupted(target, self.clock.now());
                }
                () = tokio::time::sleep(remaining - margin) => {}
            }
        }

        // Fine phase.
        loop {
            let now = self.clock.now();
            if now >= target {
                return WaitReport::at(target, now, false);
            }
            if cancel.is_cancelled() {
                return WaitReport::interrupted(target, now);
            }
            tokio::task::yield_now().await;
        }
    }
}
