//! Race-level results.
//!
//! - [`ErrorRing`]: bounded sample of the most recent attempt errors
//! - [`RaceResult`]: terminal output of one race coordinator
//! - [`CompositeResult`]: joined output of two independent races
//! - [`MetricsSnapshot`]: point-in-time copy of attempt counters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::attempt::{AttemptError, ErrorClass, ErrorKind, OperationKind, RaceId};

/// Default capacity of the recent-error ring.
pub const DEFAULT_ERROR_RING_CAPACITY: usize = 20;

// ============================================================================
// Error ring
// ============================================================================

/// One failed attempt kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub worker_id: usize,
    pub attempt_index: u32,
    pub priority: u64,
    pub kind: ErrorKind,
    pub class: ErrorClass,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    /// Build a record from an attempt error.
    #[must_use]
    pub fn from_error(
        worker_id: usize,
        attempt_index: u32,
        priority: u64,
        error: &AttemptError,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            worker_id,
            attempt_index,
            priority,
            kind: error.kind,
            class: error.class(),
            message: error.message.clone(),
            at,
        }
    }
}

/// Bounded FIFO of error records. Pushing past capacity evicts the oldest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRing {
    capacity: usize,
    records: VecDeque<ErrorRecord>,
}

impl ErrorRing {
    /// Create an empty ring. A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a record, evicting the oldest when full.
    pub fn push(&mut self, record: ErrorRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Merge another ring, keeping only the most recent `capacity` records
    /// across both in timestamp order.
    pub fn merge(&mut self, other: ErrorRing) {
        let mut all: Vec<ErrorRecord> = self.records.drain(..).chain(other.records).collect();
        all.sort_by_key(|r| r.at);
        let skip = all.len().saturating_sub(self.capacity);
        self.records.extend(all.into_iter().skip(skip));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.records.iter()
    }

    /// Consume the ring into a vector, oldest first.
    #[must_use]
    pub fn into_vec(self) -> Vec<ErrorRecord> {
        self.records.into()
    }
}

// ============================================================================
// Metrics snapshot
// ============================================================================

/// Point-in-time copy of attempt statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub retryable_failures: u64,
    pub terminal_failures: u64,
    /// Successes observed after another worker had already won.
    pub late_successes: u64,
    pub p50_duration: Duration,
    pub p99_duration: Duration,
}

impl MetricsSnapshot {
    /// Fraction of attempts that succeeded (0.0 when no attempts).
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}

// ============================================================================
// Race result
// ============================================================================

/// The attempt that claimed the race.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinningAttempt {
    pub task_id: u64,
    pub worker_id: usize,
    pub attempt_index: u32,
    pub priority: u64,
    /// Result payload returned by the collaborator.
    pub receipt: Option<String>,
    /// Time from race start to the winning claim.
    pub elapsed: Duration,
}

/// Why a race ended without a winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceFailure {
    /// `max_duration` elapsed before any success.
    DeadlineExceeded,
    /// Every worker exhausted its attempts or stopped on a terminal error.
    AttemptsExhausted,
    /// The race was cancelled from outside.
    Cancelled,
    /// The race task itself panicked.
    Panicked,
}

impl RaceFailure {
    /// Stable label used in logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::AttemptsExhausted => "attempts_exhausted",
            Self::Cancelled => "cancelled",
            Self::Panicked => "panicked",
        }
    }
}

impl fmt::Display for RaceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DeadlineExceeded => "deadline exceeded",
            Self::AttemptsExhausted => "attempts exhausted",
            Self::Cancelled => "cancelled",
            Self::Panicked => "panicked",
        };
        f.write_str(s)
    }
}

/// Typed coordinator-level failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RaceError {
    #[error("{operation} race failed ({failure}) after {total_attempts} attempts")]
    NoWinner {
        operation: OperationKind,
        failure: RaceFailure,
        total_attempts: u64,
        recent_errors: Vec<ErrorRecord>,
    },
}

/// Terminal output of one race. Never mutated after the race ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceResult {
    pub race_id: RaceId,
    pub operation: OperationKind,
    pub success: bool,
    pub winning_attempt: Option<WinningAttempt>,
    pub total_attempts: u64,
    pub total_duration: Duration,
    /// Set when `success` is false.
    pub failure: Option<RaceFailure>,
    /// Most recent errors across all workers, oldest first.
    pub last_errors: Vec<ErrorRecord>,
    pub terminal_errors: u64,
    pub late_successes: u64,
    pub metrics: MetricsSnapshot,
}

impl RaceResult {
    /// Result for a race that never produced a coordinator output.
    #[must_use]
    pub fn aborted(operation: OperationKind, failure: RaceFailure) -> Self {
        Self {
            race_id: RaceId::new(),
            operation,
            success: false,
            winning_attempt: None,
            total_attempts: 0,
            total_duration: Duration::ZERO,
            failure: Some(failure),
            last_errors: Vec::new(),
            terminal_errors: 0,
            late_successes: 0,
            metrics: MetricsSnapshot::default(),
        }
    }

    /// Convert into the winner or a typed failure.
    pub fn into_outcome(self) -> std::result::Result<WinningAttempt, RaceError> {
        match self.winning_attempt {
            Some(winner) => Ok(winner),
            None => Err(RaceError::NoWinner {
                operation: self.operation,
                failure: self.failure.unwrap_or(RaceFailure::AttemptsExhausted),
                total_attempts: self.total_attempts,
                recent_errors: self.last_errors,
            }),
        }
    }
}

// ============================================================================
// Composite result
// ============================================================================

/// Joint classification of two independent races.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    BothSucceeded,
    PartialSuccess,
    BothFailed,
}

impl OverallStatus {
    /// Classify from the two success flags.
    #[must_use]
    pub fn classify(claim_success: bool, transfer_success: bool) -> Self {
        match (claim_success, transfer_success) {
            (true, true) => Self::BothSucceeded,
            (false, false) => Self::BothFailed,
            _ => Self::PartialSuccess,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BothSucceeded => "both_succeeded",
            Self::PartialSuccess => "partial_success",
            Self::BothFailed => "both_failed",
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one dual-operation orchestration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeResult {
    pub claim_result: RaceResult,
    pub transfer_result: RaceResult,
    pub overall_status: OverallStatus,
}

impl CompositeResult {
    /// Join two race results. The status is derived from their success flags.
    #[must_use]
    pub fn new(claim_result: RaceResult, transfer_result: RaceResult) -> Self {
        let overall_status =
            OverallStatus::classify(claim_result.success, transfer_result.success);
        Self {
            claim_result,
            transfer_result,
            overall_status,
        }
    }

    /// Attempts made by both races together.
    #[must_use]
    pub fn total_attempts(&self) -> u64 {
        self.claim_result.total_attempts + self.transfer_result.total_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(worker_id: usize, second: u32) -> ErrorRecord {
        ErrorRecord {
            worker_id,
            attempt_index: 1,
            priority: 100,
            kind: ErrorKind::Network,
            class: ErrorClass::Retryable,
            message: format!("worker {worker_id}"),
            at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, second).unwrap(),
        }
    }

    fn success(operation: OperationKind) -> RaceResult {
        let mut result = RaceResult::aborted(operation, RaceFailure::Cancelled);
        result.success = true;
        result.failure = None;
        result
    }

    #[test]
    fn test_error_ring_evicts_oldest() {
        let mut ring = ErrorRing::new(3);
        for i in 0..5 {
            ring.push(record(i, i as u32));
        }
        assert_eq!(ring.len(), 3);
        let workers: Vec<usize> = ring.iter().map(|r| r.worker_id).collect();
        assert_eq!(workers, vec![2, 3, 4]);
    }

    #[test]
    fn test_error_ring_zero_capacity() {
        let mut ring = ErrorRing::new(0);
        ring.push(record(0, 0));
        ring.push(record(1, 1));
        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.into_vec()[0].worker_id, 1);
    }

    #[test]
    fn test_error_ring_merge_keeps_most_recent() {
        let mut a = ErrorRing::new(3);
        a.push(record(0, 1));
        a.push(record(0, 4));
        let mut b = ErrorRing::new(3);
        b.push(record(1, 2));
        b.push(record(1, 5));
        b.push(record(1, 3));

        a.merge(b);
        let seconds: Vec<u32> = a
            .iter()
            .map(|r| chrono::Timelike::second(&r.at))
            .collect();
        assert_eq!(seconds, vec![3, 4, 5]);
    }

    #[test]
    fn test_overall_status_classification() {
        assert_eq!(OverallStatus::classify(true, true), OverallStatus::BothSucceeded);
        assert_eq!(OverallStatus::classify(true, false), OverallStatus::PartialSuccess);
        assert_eq!(OverallStatus::classify(false, true), OverallStatus::PartialSuccess);
        assert_eq!(OverallStatus::classify(false, false), OverallStatus::BothFailed);
    }

    #[test]
    fn test_composite_from_results() {
        let claim = success(OperationKind::Claim);
        let transfer = RaceResult::aborted(OperationKind::Transfer, RaceFailure::DeadlineExceeded);
        let composite = CompositeResult::new(claim, transfer);
        assert_eq!(composite.overall_status, OverallStatus::PartialSuccess);
        assert_eq!(composite.total_attempts(), 0);
    }

    #[test]
    fn test_into_outcome_failure_carries_errors() {
        let mut result = RaceResult::aborted(OperationKind::Claim, RaceFailure::DeadlineExceeded);
        result.total_attempts = 4;
        result.last_errors = vec![record(0, 0)];

        match result.into_outcome() {
            Err(RaceError::NoWinner {
                failure,
                total_attempts,
                recent_errors,
                ..
            }) => {
                assert_eq!(failure, RaceFailure::DeadlineExceeded);
                assert_eq!(total_attempts, 4);
                assert_eq!(recent_errors.len(), 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_success_rate() {
        let snapshot = MetricsSnapshot {
            attempts: 4,
            successes: 1,
            ..Default::default()
        };
        assert!((snapshot.success_rate() - 0.25).abs() < f64::EPSILON);
        assert_eq!(MetricsSnapshot::default().success_rate(), 0.0);
    }
}
