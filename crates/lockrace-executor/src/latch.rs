//! First-success latch.

use std::sync::atomic::{AtomicBool, Ordering};

use lockrace_core::WinningAttempt;
use parking_lot::Mutex;

/// Single-assignment winner slot for one race.
///
/// Exactly one caller of [`WinnerLatch::try_claim`] ever observes `true`.
/// The winning attempt is stored before the claim becomes visible to
/// [`WinnerLatch::winner`] readers holding the lock, and is never replaced.
///
/// # Example
/// ```
/// use lockrace_executor::WinnerLatch;
///
/// let latch = WinnerLatch::new();
/// assert!(!latch.is_claimed());
/// assert!(latch.winner().is_none());
/// ```
#[derive(Debug, Default)]
pub struct WinnerLatch {
    claimed: AtomicBool,
    winner: Mutex<Option<WinningAttempt>>,
}

impl WinnerLatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once any attempt has claimed the race.
    #[must_use]
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Try to record `attempt` as the winner.
    ///
    /// Returns true for the first caller only. Later callers leave the
    /// stored winner untouched.
    pub fn try_claim(&self, attempt: WinningAttempt) -> bool {
        // Hold the slot while flipping the flag so a reader that sees
        // `claimed == true` and then locks always finds the winner.
        let mut slot = self.winner.lock();
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *slot = Some(attempt);
        true
    }

    /// The winning attempt, if any.
    #[must_use]
    pub fn winner(&self) -> Option<WinningAttempt> {
        self.winner.lock().clone()
    }
}
