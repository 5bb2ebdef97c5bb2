//! Core domain types for the lockrace unlock racer.
//!
//! This crate provides the data model shared by the scheduler, the race
//! coordinator and the orchestrator:
//! - `AttemptTask`, `AttemptOutcome`: one try against the external service
//! - `RaceResult`, `CompositeResult`: terminal race outputs
//! - `ExecutionWindow`: when a race may start
//! - `RaceConfig`, `PriorityConfig`: validated caller configuration

pub mod attempt;
pub mod config;
pub mod error;
pub mod race;
pub mod window;

pub use attempt::{
    AttemptError, AttemptOutcome, AttemptReceipt, AttemptReply, AttemptTask, ErrorClass,
    ErrorKind, OperationKind, RaceId,
};
pub use config::{PriorityConfig, RaceConfig};
pub use error::{CoreError, Result};
pub use race::{
    CompositeResult, ErrorRecord, ErrorRing, MetricsSnapshot, OverallStatus, RaceError,
    RaceFailure, RaceResult, WinningAttempt, DEFAULT_ERROR_RING_CAPACITY,
};
pub use window::ExecutionWindow;
