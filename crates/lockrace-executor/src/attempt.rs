//! Attempt function abstraction.
//!
//! The external service is reached through [`Attempter`], so the race
//! machinery never knows about transports. This allows for:
//! - Dependency injection for testing
//! - Plain closures as attempt functions
//! - Transport adapters living outside the executor crate

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lockrace_core::{AttemptError, AttemptReceipt, AttemptReply, AttemptTask, ErrorKind};
use tokio_util::sync::CancellationToken;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One try of the external operation.
///
/// Implementations should observe `cancel` and return early with
/// [`AttemptError::cancelled`] when it fires, but the coordinator also
/// tolerates attempts that run to completion.
pub trait Attempter: Send + Sync {
    fn attempt(&self, task: AttemptTask, cancel: CancellationToken) -> BoxFuture<'_, AttemptReply>;
}

/// Arc wrapper for Attempter trait objects.
pub type DynAttempter = Arc<dyn Attempter>;

/// Adapter turning an async closure into an [`Attempter`].
pub struct FnAttempter<F> {
    f: F,
}

impl<F, Fut> Attempter for FnAttempter<F>
where
    F: Fn(AttemptTask, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = AttemptReply> + Send + 'static,
{
    fn attempt(&self, task: AttemptTask, cancel: CancellationToken) -> BoxFuture<'_, AttemptReply> {
        Box::pin((self.f)(task, cancel))
    }
}

/// Wrap an async closure as a shared attempter.
pub fn attempter_fn<F, Fut>(f: F) -> DynAttempter
where
    F: Fn(AttemptTask, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AttemptReply> + Send + 'static,
{
    Arc::new(FnAttempter { f })
}

// ============================================================================
// Mock
// ============================================================================

/// Scripted behavior of [`MockAttempter`].
#[derive(Debug, Clone)]
pub enum MockScript {
    /// Every call succeeds.
    AlwaysSucceed,
    /// Every call fails with the given kind.
    AlwaysFail(ErrorKind),
    /// Calls fail with `Network` until the n-th call (1-based), which and
    /// every later call succeed.
    SucceedOnCall(u64),
    /// Every call fails with `Outbid`, reporting the given competitor value.
    Outbid(u64),
}

/// Mock attempter for testing.
#[derive(Debug)]
pub struct MockAttempter {
    script: MockScript,
    /// Simulated service latency.
    delay: Duration,
    /// Calls started so far.
    calls: AtomicU64,
    /// Priorities seen, in call order.
    priorities: parking_lot::Mutex<Vec<u64>>,
}

impl MockAttempter {
    /// Create a mock with the given script and no latency.
    pub fn new(script: MockScript) -> Self {
        Self {
            script,
            delay: Duration::ZERO,
            calls: AtomicU64::new(0),
            priorities: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Add simulated latency to every call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of calls started.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Priorities submitted, in call order.
    pub fn priorities(&self) -> Vec<u64> {
        self.priorities.lock().clone()
    }
}

impl Attempter for MockAttempter {
    fn attempt(&self, task: AttemptTask, cancel: CancellationToken) -> BoxFuture<'_, AttemptReply> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.priorities.lock().push(task.priority);

            if !self.delay.is_zero() {
                tokio::select! {
                    () = cancel.cancelled() => return Err(AttemptError::cancelled()),
                    () = tokio::time::sleep(self.delay) => {}
                }
            }

            match &self.script {
                MockScript::AlwaysSucceed => Ok(AttemptReceipt::with_payload(format!("call-{call}"))),
                MockScript::AlwaysFail(kind) => Err(AttemptError::new(*kind, format!("call {call} failed"))),
                MockScript::SucceedOnCall(n) if call >= *n => {
                    Ok(AttemptReceipt::with_payload(format!("call-{call}")))
                }
                MockScript::SucceedOnCall(_) => Err(AttemptError::network(format!("call {call} not yet"))),
                MockScript::Outbid(competitor) => Err(AttemptError::new(
                    ErrorKind::Outbid,
                    format!("outbid by {competitor}"),
                )
                .with_competitor(*competitor)),
            }
        })
    }
}
