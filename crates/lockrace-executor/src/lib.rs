//! Race execution for lockrace.
//!
//! Wakes precisely at an unlock instant, fans out workers against an
//! external service, keeps the first success and reports both operations
//! of a claim/transfer pair independently.
//!
//! # Key Components
//!
//! - [`PrecisionScheduler`]: sleep-then-spin wake at a target instant
//! - [`PriorityController`]: bounded escalation and decay of the fee value
//! - [`WinnerLatch`]: first-success-wins claim
//! - [`RaceCoordinator`]: N workers, bounded retries, one winner
//! - [`DualOrchestrator`]: two failure-independent races, one composite result
//! - [`Attempter`]: the seam to the external service
//!
//! # Cancellation
//!
//! Every race runs under a child of the orchestrator's shutdown token. A
//! winner or the race deadline cancels only that race's own token.

pub mod attempt;
pub mod clock;
pub mod coordinator;
pub mod error;
pub mod latch;
pub mod orchestrator;
pub mod priority;
pub mod scheduler;

// Attempt seam
pub use attempt::{
    attempter_fn, Attempter, BoxFuture, DynAttempter, FnAttempter, MockAttempter, MockScript,
};

// Time
pub use clock::{monotonic, Clock, DynClock, ManualClock, MonotonicClock};
pub use scheduler::{DriftStats, PrecisionScheduler, WaitReport, DEFAULT_SPIN_MARGIN};

// Error types
pub use error::{ExecutorError, ExecutorResult};

// Race machinery
pub use coordinator::RaceCoordinator;
pub use latch::WinnerLatch;
pub use orchestrator::{DualOrchestrator, OperationPlan, PreparedRace};
pub use priority::{PriorityController, PriorityReport, PrioritySample, PriorityState};

// Re-exported so callers need only this crate for cancellation.
pub use tokio_util::sync::CancellationToken;
