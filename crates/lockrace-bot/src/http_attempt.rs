//! HTTP attempt adapter.
//!
//! Posts one JSON submission per attempt to the configured endpoint and
//! maps the answer onto the attempt error taxonomy:
//! - 2xx: success, `receipt` from the body becomes the result payload
//! - 429: `RateLimited`
//! - 408: `Timeout`
//! - 5xx and transport failures: `Network`
//! - other 4xx: `Rejected` (terminal)
//!
//! A `competitor_priority` field in any response body is surfaced as
//! priority feedback.
//!
//! Cancellation is checked before a submission is sent. Once sent, the
//! request runs to its answer or its timeout.

use std::time::Duration;

use lockrace_core::{
    AttemptError, AttemptReceipt, AttemptReply, AttemptTask, ErrorKind, OperationKind,
};
use lockrace_executor::{Attempter, BoxFuture, CancellationToken};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::OperationConfig;
use crate::error::{AppError, AppResult};

/// Body of one submission.
#[derive(Debug, Serialize)]
struct Submission<'a> {
    operation: OperationKind,
    /// Shared by every attempt of one race so the service can deduplicate.
    idempotency_key: String,
    priority: u64,
    attempt: u32,
    worker_id: usize,
    payload: &'a serde_json::Value,
}

/// Fields read from any response body. All optional.
#[derive(Debug, Default, Deserialize)]
struct SubmissionResponse {
    #[serde(default)]
    receipt: Option<String>,
    #[serde(default)]
    competitor_priority: Option<u64>,
    #[serde(default)]
    message: Option<String>,
}

/// Attempter backed by an HTTP endpoint.
pub struct HttpAttempter {
    client: Client,
    endpoint: String,
    operation: OperationKind,
}

impl HttpAttempter {
    /// Create an attempter for one operation.
    pub fn new(operation: OperationKind, endpoint: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            operation,
        })
    }

    /// Create from an operation section of the config file.
    pub fn from_config(operation: OperationKind, config: &OperationConfig) -> AppResult<Self> {
        Self::new(operation, config.endpoint.clone(), config.request_timeout())
    }

    async fn submit(&self, task: &AttemptTask) -> AttemptReply {
        let submission = Submission {
            operation: self.operation,
            idempotency_key: format!("{}-{}", task.race_id, self.operation),
            priority: task.priority,
            attempt: task.attempt_index,
            worker_id: task.worker_id,
            payload: task.payload.as_ref(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&submission)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        trace!(
            operation = %self.operation,
            worker_id = task.worker_id,
            status = status.as_u16(),
            "Submission answered"
        );
        interpret_response(status, &body)
    }
}

impl Attempter for HttpAttempter {
    fn attempt(&self, task: AttemptTask, cancel: CancellationToken) -> BoxFuture<'_, AttemptReply> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(AttemptError::cancelled());
            }
            // A sent submission may still land, so its answer is awaited
            // (bounded by the request timeout) and reported as a late success.
            self.submit(&task).await
        })
    }
}

/// Error kind for a non-success status, None for 2xx.
#[must_use]
pub fn classify_status(status: StatusCode) -> Option<ErrorKind> {
    if status.is_success() {
        None
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        Some(ErrorKind::RateLimited)
    } else if status == StatusCode::REQUEST_TIMEOUT {
        Some(ErrorKind::Timeout)
    } else if status.is_client_error() {
        Some(ErrorKind::Rejected)
    } else {
        Some(ErrorKind::Network)
    }
}

/// Turn a status and raw body into an attempt reply.
pub fn interpret_response(status: StatusCode, body: &str) -> AttemptReply {
    let parsed: SubmissionResponse = serde_json::from_str(body).unwrap_or_default();

    match classify_status(status) {
        None => Ok(AttemptReceipt {
            payload: parsed.receipt,
        }),
        Some(kind) => {
            let message = parsed
                .message
                .unwrap_or_else(|| format!("HTTP {status}: {}", truncate(body, 200)));
            let error = AttemptError::new(kind, message);
            Err(match parsed.competitor_priority {
                Some(value) => error.with_competitor(value),
                None => error,
            })
        }
    }
}

fn transport_error(e: &reqwest::Error) -> AttemptError {
    if e.is_timeout() {
        AttemptError::new(ErrorKind::Timeout, format!("request timed out: {e}"))
    } else {
        AttemptError::network(format!("request failed: {e}"))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
