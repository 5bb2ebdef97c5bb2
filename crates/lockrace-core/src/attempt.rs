//! Attempt-level types shared by workers, the priority controller and
//! the metrics aggregator.
//!
//! An [`AttemptTask`] is created for every try a worker makes against the
//! external service. The collaborator answers with an [`AttemptReply`], and
//! the worker turns that answer into an immutable [`AttemptOutcome`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Kind of operation being raced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Claim of a time-locked resource.
    Claim,
    /// Movement of already-available funds.
    Transfer,
}

impl OperationKind {
    /// Stable label used in logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Transfer => "transfer",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identifier of a single race invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RaceId(Uuid);

impl RaceId {
    /// Generate a fresh race id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Errors reported by the external collaborator
// ============================================================================

/// Whether a failed attempt may succeed on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// Transient failure, retry is worthwhile.
    Retryable,
    /// Payload or validation failure, retry cannot help.
    Terminal,
}

/// Failure category of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport-level failure.
    Network,
    /// The call did not complete in time.
    Timeout,
    /// The service throttled the caller.
    RateLimited,
    /// The resource is not available yet (e.g. still locked).
    NotReady,
    /// Outbid or otherwise lost to a competing submission.
    Outbid,
    /// The attempt was abandoned because the race was cancelled.
    Cancelled,
    /// The service rejected the payload.
    Rejected,
    /// The payload failed local or remote validation.
    Invalid,
}

impl ErrorKind {
    /// Retry classification of this kind.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Rejected | Self::Invalid => ErrorClass::Terminal,
            Self::Network
            | Self::Timeout
            | Self::RateLimited
            | Self::NotReady
            | Self::Outbid
            | Self::Cancelled => ErrorClass::Retryable,
        }
    }

    /// Returns true if an attempt failing with this kind may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    /// Stable label used in logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::NotReady => "not_ready",
            Self::Outbid => "outbid",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
            Self::Invalid => "invalid",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by an attempt function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptError {
    /// Failure category.
    pub kind: ErrorKind,
    /// Human readable detail from the collaborator.
    pub message: String,
    /// Competing priority reported by the service, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competitor_priority: Option<u64>,
}

impl AttemptError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            competitor_priority: None,
        }
    }

    /// Retryable transport failure.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    /// Terminal payload rejection.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rejected, message)
    }

    /// Attempt abandoned because of cancellation.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "race cancelled")
    }

    /// Attach the competing priority observed by the service.
    #[must_use]
    pub fn with_competitor(mut self, priority: u64) -> Self {
        self.competitor_priority = Some(priority);
        self
    }

    /// Retry classification.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        self.kind.class()
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AttemptError {}

/// Successful answer from the external collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptReceipt {
    /// Optional opaque result (e.g. a transaction hash).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl AttemptReceipt {
    /// Receipt carrying a result payload.
    pub fn with_payload(payload: impl Into<String>) -> Self {
        Self {
            payload: Some(payload.into()),
        }
    }
}

/// What an attempt function returns.
pub type AttemptReply = std::result::Result<AttemptReceipt, AttemptError>;

// ============================================================================
// Task and outcome
// ============================================================================

/// One try of the external operation, owned by a single worker.
#[derive(Debug, Clone)]
pub struct AttemptTask {
    /// Sequence number unique within the race.
    pub id: u64,
    /// Race this task belongs to.
    pub race_id: RaceId,
    /// Operation being attempted.
    pub operation: OperationKind,
    /// Worker issuing the task.
    pub worker_id: usize,
    /// Caller supplied payload, shared read-only by all workers.
    pub payload: Arc<serde_json::Value>,
    /// Priority/fee value to submit with.
    pub priority: u64,
    /// 1-based attempt number of this worker.
    pub attempt_index: u32,
    /// Per-worker attempt limit.
    pub max_attempts: u32,
}

impl AttemptTask {
    /// Returns true if this is the worker's last permitted attempt.
    #[must_use]
    pub fn is_last_attempt(&self) -> bool {
        self.attempt_index >= self.max_attempts
    }
}

/// Immutable record of one finished attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptOutcome {
    /// Id of the task that produced this outcome.
    pub task_id: u64,
    /// Operation attempted.
    pub operation: OperationKind,
    /// Worker that ran the attempt.
    pub worker_id: usize,
    /// 1-based attempt number of the worker.
    pub attempt_index: u32,
    /// Priority the attempt was submitted with.
    pub priority: u64,
    /// Whether the collaborator reported success.
    pub success: bool,
    /// Failure kind when `success` is false.
    pub error_kind: Option<ErrorKind>,
    /// Wall time spent inside the attempt function.
    pub duration: Duration,
    /// Completion time.
    pub timestamp: DateTime<Utc>,
}

impl AttemptOutcome {
    /// Build an outcome from a task and the collaborator reply.
    #[must_use]
    pub fn from_reply(task: &AttemptTask, reply: &AttemptReply, duration: Duration) -> Self {
        Self {
            task_id: task.id,
            operation: task.operation,
            worker_id: task.worker_id,
            attempt_index: task.attempt_index,
            priority: task.priority,
            success: reply.is_ok(),
            error_kind: reply.as_ref().err().map(|e| e.kind),
            duration,
            timestamp: Utc::now(),
        }
    }

    /// Returns true if the attempt failed with a terminal error.
    #[must_use]
    pub fn is_terminal_failure(&self) -> bool {
        self.error_kind
            .is_some_and(|k| k.class() == ErrorClass::Terminal)
    }
}
