//! Monotonic clock abstraction.
//!
//! Every timing decision in the executor reads time through [`Clock`], so
//! tests can substitute a controllable clock. No cycle-counter access is
//! attempted; precision is whatever the host's monotonic clock provides.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for obtaining the current monotonic instant, enabling testability.
pub trait Clock: Send + Sync {
    /// Returns the current monotonic instant.
    fn now(&self) -> Instant;
}

/// Host monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Shared clock handle.
pub type DynClock = Arc<dyn Clock>;

/// Shared handle to the host monotonic clock.
#[must_use]
pub fn monotonic() -> DynClock {
    Arc::new(MonotonicClock)
}

/// Manually advanced clock.
///
/// Starts at the instant it was created and only moves when
/// [`ManualClock::advance`] is called.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset_ns: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_ns: AtomicU64::new(0),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, delta: Duration) {
        let delta_ns = u64::try_from(delta.as_nanos()).unwrap_or(u64::MAX);
        self.offset_ns.fetch_add(delta_ns, Ordering::AcqRel);
    }

    /// Time elapsed since creation according to this clock.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_ns.load(Ordering::Acquire))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }
}
