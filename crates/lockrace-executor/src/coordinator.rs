//! Race coordinator.
//!
//! Fans out `worker_count` workers that repeatedly call one attempt
//! function until exactly one succeeds, every worker gives up, or the
//! race deadline passes.
//!
//! # Flow
//!
//! 1. Wait for the execution window via [`PrecisionScheduler`]
//! 2. Spawn workers into a `JoinSet` (optionally staggered)
//! 3. Each worker: permit -> priority -> attempt -> record -> claim or retry
//! 4. The first success claims the [`WinnerLatch`] and cancels the race token
//! 5. The deadline fires through the same token, never per-worker timers
//! 6. Join every worker, then merge their error rings into the result
//!
//! Workers share only the latch, the priority controller, the metrics
//! aggregator and a task-id sequence. Each worker owns its error ring and
//! hands it back when it exits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lockrace_core::{
    AttemptError, AttemptOutcome, AttemptTask, ErrorClass, ErrorKind, ErrorRecord, ErrorRing,
    ExecutionWindow, OperationKind, PriorityConfig, RaceConfig, RaceFailure, RaceId, RaceResult,
    WinningAttempt,
};
use lockrace_telemetry::{Metrics, MetricsAggregator};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::attempt::DynAttempter;
use crate::clock::DynClock;
use crate::error::ExecutorResult;
use crate::latch::WinnerLatch;
use crate::priority::PriorityController;
use crate::scheduler::PrecisionScheduler;

/// Runs one race of one operation kind.
///
/// A coordinator is consumed by [`RaceCoordinator::run`]; nothing it owns
/// outlives the race except the handles callers cloned beforehand.
pub struct RaceCoordinator {
    operation: OperationKind,
    config: RaceConfig,
    clock: DynClock,
    scheduler: PrecisionScheduler,
    priority: Arc<PriorityController>,
    metrics: Arc<MetricsAggregator>,
}

impl RaceCoordinator {
    /// Create a coordinator.
    ///
    /// # Errors
    /// Returns `ExecutorError::Config` if either configuration is invalid.
    pub fn new(
        operation: OperationKind,
        config: RaceConfig,
        priority: PriorityConfig,
        clock: DynClock,
    ) -> ExecutorResult<Self> {
        config.validate()?;
        let priority = PriorityController::new(operation, priority, clock.clone())?;

        Ok(Self {
            operation,
            config,
            scheduler: PrecisionScheduler::new(clock.clone()),
            clock,
            priority: Arc::new(priority),
            metrics: Arc::new(MetricsAggregator::new(operation)),
        })
    }

    #[must_use]
    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    #[must_use]
    pub fn config(&self) -> &RaceConfig {
        &self.config
    }

    /// Priority controller of this race, for external competitor feeds.
    #[must_use]
    pub fn priority(&self) -> Arc<PriorityController> {
        Arc::clone(&self.priority)
    }

    /// Live attempt statistics of this race.
    #[must_use]
    pub fn metrics(&self) -> Arc<MetricsAggregator> {
        Arc::clone(&self.metrics)
    }

    /// Run the race to completion.
    ///
    /// Cancelling `cancel` stops the race; the race itself only ever
    /// cancels a child of it.
    pub async fn run(
        self,
        window: ExecutionWindow,
        attempter: DynAttempter,
        payload: serde_json::Value,
        cancel: CancellationToken,
    ) -> RaceResult {
        let race_id = RaceId::new();
        let operation = self.operation;
        let race_token = cancel.child_token();

        let wake = self.scheduler.wait_for_window(&window, &race_token).await;
        if wake.cancelled {
            info!(%race_id, %operation, "Race cancelled before window opened");
            Metrics::race_finished(operation.as_str(), RaceFailure::Cancelled.as_str());
            return RaceResult {
                race_id,
                ..RaceResult::aborted(operation, RaceFailure::Cancelled)
            };
        }

        let started = self.clock.now();
        info!(
            %race_id,
            %operation,
            workers = self.config.worker_count,
            max_attempts = self.config.max_attempts,
            max_in_flight = self.config.in_flight_limit(),
            priority = self.priority.next_priority(),
            "Race started"
        );

        let shared = Arc::new(RaceShared {
            race_id,
            operation,
            config: self.config.clone(),
            clock: self.clock.clone(),
            started,
            latch: WinnerLatch::new(),
            priority: Arc::clone(&self.priority),
            metrics: Arc::clone(&self.metrics),
            attempter,
            payload: Arc::new(payload),
            cancel: race_token.clone(),
            permits: Semaphore::new(self.config.in_flight_limit()),
            next_task_id: AtomicU64::new(1),
        });

        // Cancels the race, and with it the ticker, if this future is dropped.
        let _stop = race_token.clone().drop_guard();
        let decay = tokio::spawn(decay_ticker(Arc::clone(&self.priority), race_token.clone()));

        let mut workers = JoinSet::new();
        for worker_id in 0..self.config.worker_count {
            workers.spawn(run_worker(Arc::clone(&shared), worker_id));
        }

        let deadline = tokio::time::sleep(self.config.max_duration());
        tokio::pin!(deadline);

        let mut deadline_hit = false;
        let mut panicked = 0usize;
        let mut errors = ErrorRing::new(self.config.error_ring_capacity);

        loop {
            tokio::select! {
                joined = workers.join_next() => match joined {
                    Some(Ok(report)) => {
                        debug!(
                            %operation,
                            worker_id = report.worker_id,
                            attempts = report.attempts,
                            "Worker finished"
                        );
                        errors.merge(report.errors);
                    }
                    Some(Err(e)) => {
                        panicked += 1;
                        error!(%operation, error = %e, "Worker task failed");
                    }
                    None => break,
                },
                () = &mut deadline, if !deadline_hit && !shared.latch.is_claimed() => {
                    deadline_hit = true;
                    warn!(
                        %race_id,
                        %operation,
                        max_duration_ms = self.config.max_duration_ms,
                        "Race deadline exceeded"
                    );
                    race_token.cancel();
                }
            }
        }

        // Stops the decay ticker when the race ended without a winner.
        race_token.cancel();
        if let Err(e) = decay.await {
            warn!(%operation, error = %e, "Decay ticker failed");
        }

        let total_duration = self.clock.now().saturating_duration_since(started);
        let winner = shared.latch.winner();
        let failure = match &winner {
            Some(_) => None,
            None if deadline_hit => Some(RaceFailure::DeadlineExceeded),
            None if cancel.is_cancelled() => Some(RaceFailure::Cancelled),
            None if panicked == self.config.worker_count => Some(RaceFailure::Panicked),
            None => Some(RaceFailure::AttemptsExhausted),
        };

        let metrics = self.metrics.snapshot();
        let result = RaceResult {
            race_id,
            operation,
            success: winner.is_some(),
            total_attempts: metrics.attempts,
            total_duration,
            failure,
            last_errors: errors.into_vec(),
            terminal_errors: metrics.terminal_failures,
            late_successes: metrics.late_successes,
            winning_attempt: winner,
            metrics,
        };

        match (&result.winning_attempt, result.failure) {
            (Some(w), _) => {
                Metrics::race_finished(operation.as_str(), "won");
                Metrics::time_to_win(operation.as_str(), w.elapsed.as_secs_f64() * 1000.0);
                info!(
                    %race_id,
                    %operation,
                    worker_id = w.worker_id,
                    attempt = w.attempt_index,
                    priority = w.priority,
                    elapsed_ms = w.elapsed.as_millis() as u64,
                    total_attempts = result.total_attempts,
                    late_successes = result.late_successes,
                    "Race won"
                );
            }
            (None, failure) => {
                let failure = failure.unwrap_or(RaceFailure::AttemptsExhausted);
                Metrics::race_finished(operation.as_str(), failure.as_str());
                warn!(
                    %race_id,
                    %operation,
                    %failure,
                    total_attempts = result.total_attempts,
                    terminal_errors = result.terminal_errors,
                    duration_ms = total_duration.as_millis() as u64,
                    "Race failed"
                );
            }
        }

        result
    }
}

// ============================================================================
// Workers
// ============================================================================

/// State shared by every worker of one race.
struct RaceShared {
    race_id: RaceId,
    operation: OperationKind,
    config: RaceConfig,
    clock: DynClock,
    started: Instant,
    latch: WinnerLatch,
    priority: Arc<PriorityController>,
    metrics: Arc<MetricsAggregator>,
    attempter: DynAttempter,
    payload: Arc<serde_json::Value>,
    cancel: CancellationToken,
    permits: Semaphore,
    next_task_id: AtomicU64,
}

/// What a worker hands back when it exits.
struct WorkerReport {
    worker_id: usize,
    attempts: u32,
    errors: ErrorRing,
}

/// Keeps the active-worker gauge balanced, including on panic.
struct ActiveWorker(&'static str);

impl ActiveWorker {
    fn enter(operation: OperationKind) -> Self {
        Metrics::worker_started(operation.as_str());
        Self(operation.as_str())
    }
}

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        Metrics::worker_stopped(self.0);
    }
}

async fn run_worker(shared: Arc<RaceShared>, worker_id: usize) -> WorkerReport {
    let _active = ActiveWorker::enter(shared.operation);
    let config = &shared.config;
    let mut report = WorkerReport {
        worker_id,
        attempts: 0,
        errors: ErrorRing::new(config.error_ring_capacity),
    };

    let stagger = config
        .stagger()
        .saturating_mul(u32::try_from(worker_id).unwrap_or(u32::MAX));
    if !stagger.is_zero() {
        tokio::select! {
            biased;
            () = shared.cancel.cancelled() => return report,
            () = tokio::time::sleep(stagger) => {}
        }
    }

    let mut retry_delay = config.retry_interval();

    for attempt_index in 1..=config.max_attempts {
        if shared.cancel.is_cancelled() {
            break;
        }

        let permit = tokio::select! {
            biased;
            () = shared.cancel.cancelled() => break,
            permit = shared.permits.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let priority = shared.priority.next_priority();
        let task = AttemptTask {
            id: shared.next_task_id.fetch_add(1, Ordering::Relaxed),
            race_id: shared.race_id,
            operation: shared.operation,
            worker_id,
            payload: Arc::clone(&shared.payload),
            priority,
            attempt_index,
            max_attempts: config.max_attempts,
        };

        let begun = shared.clock.now();
        let reply = shared
            .attempter
            .attempt(task.clone(), shared.cancel.clone())
            .await;
        drop(permit);

        // Abandoned attempts say nothing about the service.
        if matches!(&reply, Err(e) if e.kind == ErrorKind::Cancelled) {
            break;
        }

        let duration = shared.clock.now().saturating_duration_since(begun);
        let outcome = AttemptOutcome::from_reply(&task, &reply, duration);
        report.attempts += 1;
        shared.metrics.record_attempt(&outcome);
        shared.priority.record_outcome(outcome.success, priority);

        let err = match reply {
            Ok(receipt) => {
                let winning = WinningAttempt {
                    task_id: task.id,
                    worker_id,
                    attempt_index,
                    priority,
                    receipt: receipt.payload,
                    elapsed: shared.clock.now().saturating_duration_since(shared.started),
                };
                if shared.latch.try_claim(winning) {
                    shared.cancel.cancel();
                    debug!(
                        operation = %shared.operation,
                        worker_id,
                        attempt = attempt_index,
                        "Winner claimed"
                    );
                } else {
                    shared.metrics.record_late_success();
                    debug!(
                        operation = %shared.operation,
                        worker_id,
                        attempt = attempt_index,
                        "Late success after race was won"
                    );
                }
                break;
            }
            Err(err) => err,
        };

        if let Some(competitor) = err.competitor_priority {
            shared.priority.observe_competitor(competitor);
        }

        report.errors.push(ErrorRecord::from_error(
            worker_id,
            attempt_index,
            priority,
            &err,
            outcome.timestamp,
        ));

        if err.class() == ErrorClass::Terminal {
            warn!(
                operation = %shared.operation,
                worker_id,
                attempt = attempt_index,
                error = %err,
                "Terminal attempt error, worker stopping"
            );
            break;
        }
        if task.is_last_attempt() {
            break;
        }

        let wait = delay_after(config, &err, retry_delay);
        tokio::select! {
            biased;
            () = shared.cancel.cancelled() => break,
            () = tokio::time::sleep(wait) => {}
        }
        retry_delay = grow_delay(config, retry_delay);
    }

    report
}

/// Delay before the next attempt after `err`.
fn delay_after(config: &RaceConfig, err: &AttemptError, current: Duration) -> Duration {
    if err.kind == ErrorKind::RateLimited {
        current.max(config.rate_limit_retry())
    } else {
        current
    }
}

/// Apply the backoff multiplier, capped at `max_retry_interval`.
fn grow_delay(config: &RaceConfig, current: Duration) -> Duration {
    let cap = config.max_retry_interval();
    Duration::try_from_secs_f64(current.as_secs_f64() * config.backoff_multiplier)
        .map_or(cap, |next| next.min(cap))
}

/// Applies priority decay while the race runs.
async fn decay_ticker(priority: Arc<PriorityController>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(priority.decay_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                priority.decay_if_idle();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt::{attempter_fn, Attempter, BoxFuture, MockAttempter, MockScript};
    use crate::clock::monotonic;
    use lockrace_core::{AttemptReceipt, AttemptReply};
    use std::sync::atomic::AtomicUsize;

    fn race_config(workers: usize, max_attempts: u32) -> RaceConfig {
        RaceConfig {
            worker_count: workers,
            max_attempts,
            retry_interval_ms: 5,
            max_duration_ms: 10_000,
            ..Default::default()
        }
    }

    fn coordinator(config: RaceConfig) -> RaceCoordinator {
        RaceCoordinator::new(
            OperationKind::Claim,
            config,
            PriorityConfig::claim_default(),
            monotonic(),
        )
        .unwrap()
    }

    async fn run(config: RaceConfig, attempter: DynAttempter) -> RaceResult {
        coordinator(config)
            .run(
                ExecutionWindow::immediate(),
                attempter,
                serde_json::json!({"balance_id": "test"}),
                CancellationToken::new(),
            )
            .await
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = RaceCoordinator::new(
            OperationKind::Claim,
            race_config(0, 1),
            PriorityConfig::claim_default(),
            monotonic(),
        );
        assert!(result.is_err());

        let result = RaceCoordinator::new(
            OperationKind::Claim,
            race_config(1, 1),
            PriorityConfig::new(10, 20, 30),
            monotonic(),
        );
        assert!(result.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_success_on_kth_call_single_winner() {
        let workers = 8;
        let k = 25;
        let mock = Arc::new(MockAttempter::new(MockScript::SucceedOnCall(k)));

        let result = run(race_config(workers, 10), mock.clone()).await;

        assert!(result.success);
        assert!(result.failure.is_none());
        let winner = result.winning_attempt.as_ref().unwrap();
        assert!(winner.receipt.is_some());
        assert_eq!(result.metrics.successes, 1 + result.late_successes);
        assert!(mock.calls() <= k + workers as u64 - 1, "calls = {}", mock.calls());
        assert_eq!(result.total_attempts, mock.calls());
    }

    #[tokio::test]
    async fn test_all_fail_single_attempt_thousand_workers() {
        let mock = Arc::new(MockAttempter::new(MockScript::AlwaysFail(ErrorKind::Network)));

        let result = run(race_config(1000, 1), mock.clone()).await;

        assert!(!result.success);
        assert_eq!(result.failure, Some(RaceFailure::AttemptsExhausted));
        assert_eq!(result.total_attempts, 1000);
        assert_eq!(mock.calls(), 1000);
        assert_eq!(result.last_errors.len(), 20);
        assert!(result
            .last_errors
            .windows(2)
            .all(|w| w[0].at <= w[1].at));
        assert!(result.into_outcome().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_simultaneous_successes_one_winner_rest_late() {
        let workers = 16;
        let barrier = Arc::new(tokio::sync::Barrier::new(workers));
        let attempter = attempter_fn(move |_task, _cancel| {
            let barrier = Arc::clone(&barrier);
            async move {
                barrier.wait().await;
                let reply: AttemptReply = Ok(AttemptReceipt::with_payload("tx"));
                reply
            }
        });

        let result = run(race_config(workers, 1), attempter).await;

        assert!(result.success);
        assert_eq!(result.metrics.successes, workers as u64);
        assert_eq!(result.late_successes, workers as u64 - 1);
        assert_eq!(result.total_attempts, workers as u64);
    }

    #[tokio::test]
    async fn test_terminal_error_stops_only_that_worker() {
        let attempter = attempter_fn(|task: AttemptTask, _cancel| async move {
            let reply: AttemptReply = if task.worker_id == 0 {
                Err(AttemptError::rejected("bad payload"))
            } else {
                Err(AttemptError::network("connection reset"))
            };
            reply
        });

        let result = run(race_config(4, 3), attempter).await;

        assert!(!result.success);
        assert_eq!(result.failure, Some(RaceFailure::AttemptsExhausted));
        // Worker 0 stops after one attempt, the other three use all of theirs.
        assert_eq!(result.total_attempts, 1 + 3 * 3);
        assert_eq!(result.terminal_errors, 1);
        assert_eq!(
            result
                .last_errors
                .iter()
                .filter(|e| e.class == ErrorClass::Terminal)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let mock = Arc::new(MockAttempter::new(MockScript::AlwaysFail(ErrorKind::Timeout)));
        let config = RaceConfig {
            max_duration_ms: 100,
            ..race_config(2, u32::MAX)
        };

        let started = Instant::now();
        let result = run(config, mock).await;

        assert!(!result.success);
        assert_eq!(result.failure, Some(RaceFailure::DeadlineExceeded));
        assert!(result.total_attempts >= 2);
        assert!(result.last_errors.len() <= 20);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_competitor_feedback_escalates_priority() {
        let mock = Arc::new(MockAttempter::new(MockScript::Outbid(10_000_000)));
        let coordinator = coordinator(race_config(1, 2));
        let priority = coordinator.priority();

        let result = coordinator
            .run(
                ExecutionWindow::immediate(),
                mock.clone(),
                serde_json::Value::Null,
                CancellationToken::new(),
            )
            .await;

        assert!(!result.success);
        assert_eq!(mock.priorities(), vec![9_400_000, 25_000_000]);
        assert_eq!(priority.state().last_observed_competitor, Some(10_000_000));
        assert_eq!(priority.recent_history(10).len(), 2);
    }

    #[tokio::test]
    async fn test_rate_limited_uses_longer_delay() {
        let config = RaceConfig {
            rate_limit_retry_ms: 40,
            ..race_config(1, 2)
        };
        let mock = Arc::new(MockAttempter::new(MockScript::AlwaysFail(ErrorKind::RateLimited)));

        let started = Instant::now();
        let result = run(config, mock).await;

        assert_eq!(result.total_attempts, 2);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_parent_cancel_before_window() {
        let coordinator = coordinator(race_config(4, 1));
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let window = ExecutionWindow::after(Instant::now(), Duration::from_secs(30));
        let mock = Arc::new(MockAttempter::new(MockScript::AlwaysSucceed));
        let result = coordinator
            .run(window, mock.clone(), serde_json::Value::Null, cancel)
            .await;

        assert!(!result.success);
        assert_eq!(result.failure, Some(RaceFailure::Cancelled));
        assert_eq!(result.total_attempts, 0);
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_parent_cancel_during_race() {
        let coordinator = coordinator(race_config(2, u32::MAX));
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let mock = Arc::new(MockAttempter::new(MockScript::AlwaysFail(ErrorKind::NotReady)));
        let result = coordinator
            .run(ExecutionWindow::immediate(), mock, serde_json::Value::Null, cancel)
            .await;

        assert_eq!(result.failure, Some(RaceFailure::Cancelled));
        assert!(result.total_attempts >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_flight_cap() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let attempter = {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            attempter_fn(move |_task, _cancel| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    let reply: AttemptReply = Err(AttemptError::network("busy"));
                    reply
                }
            })
        };
        let config = RaceConfig {
            max_in_flight: Some(2),
            retry_interval_ms: 1,
            ..race_config(8, 3)
        };

        let result = run(config, attempter).await;

        assert_eq!(result.total_attempts, 24);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    struct PanickingAttempter;

    impl Attempter for PanickingAttempter {
        fn attempt(&self, task: AttemptTask, _cancel: CancellationToken) -> BoxFuture<'_, AttemptReply> {
            Box::pin(async move {
                if task.attempt_index > 0 {
                    panic!("attempt blew up");
                }
                Ok(AttemptReceipt::default())
            })
        }
    }

    #[tokio::test]
    async fn test_all_workers_panicking() {
        let result = run(race_config(2, 3), Arc::new(PanickingAttempter)).await;
        assert!(!result.success);
        assert_eq!(result.failure, Some(RaceFailure::Panicked));
    }

    #[tokio::test]
    async fn test_dropped_race_stops_decay_ticker() {
        let coordinator = coordinator(race_config(2, u32::MAX));
        let priority = coordinator.priority();
        let mock = Arc::new(MockAttempter::new(MockScript::AlwaysFail(ErrorKind::NotReady)));

        let race = coordinator.run(
            ExecutionWindow::immediate(),
            mock,
            serde_json::Value::Null,
            CancellationToken::new(),
        );
        assert!(tokio::time::timeout(Duration::from_millis(50), race)
            .await
            .is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        // The ticker and the workers each held a handle.
        assert_eq!(Arc::strong_count(&priority), 1);
    }

    #[tokio::test]
    async fn test_cancelled_attempts_are_not_recorded() {
        let attempter = attempter_fn(|task: AttemptTask, cancel: CancellationToken| async move {
            let reply: AttemptReply = if task.worker_id == 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(AttemptReceipt::with_payload("tx"))
            } else {
                cancel.cancelled().await;
                Err(AttemptError::cancelled())
            };
            reply
        });
        let coordinator = coordinator(race_config(4, 3));
        let priority = coordinator.priority();

        let result = coordinator
            .run(
                ExecutionWindow::immediate(),
                attempter,
                serde_json::Value::Null,
                CancellationToken::new(),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.total_attempts, 1);
        assert_eq!(result.metrics.failures, 0);
        assert_eq!(result.metrics.retryable_failures, 0);
        assert!(result.last_errors.is_empty());
        assert_eq!(priority.success_rate(), Some(1.0));
    }

    #[tokio::test]
    async fn test_priority_decays_back_during_race() {
        let submitted = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let attempter = {
            let submitted = Arc::clone(&submitted);
            attempter_fn(move |task: AttemptTask, _cancel| {
                let first = {
                    let mut seen = submitted.lock();
                    seen.push(task.priority);
                    seen.len() == 1
                };
                async move {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    let reply: AttemptReply = if first {
                        Err(AttemptError::new(ErrorKind::Outbid, "outbid").with_competitor(1_000))
                    } else {
                        Err(AttemptError::new(ErrorKind::NotReady, "still locked"))
                    };
                    reply
                }
            })
        };
        let mut priority = PriorityConfig::new(100, 10, 10_000);
        priority.escalation_factor = 2.0;
        priority.decay_per_interval = 0.5;
        priority.decay_interval_ms = 20;
        let coordinator =
            RaceCoordinator::new(OperationKind::Claim, race_config(1, 60), priority, monotonic())
                .unwrap();

        let result = coordinator
            .run(
                ExecutionWindow::immediate(),
                attempter,
                serde_json::Value::Null,
                CancellationToken::new(),
            )
            .await;

        assert!(!result.success);
        let submitted = submitted.lock().clone();
        assert_eq!(submitted.len(), 60);
        assert_eq!(submitted[0], 100);
        assert_eq!(submitted[1], 2_000);
        assert!(submitted[1..].windows(2).all(|w| w[1] <= w[0]), "{submitted:?}");
        assert!(submitted.iter().all(|&p| (100..=2_000).contains(&p)));
        assert!(submitted[59] < 500, "{submitted:?}");
    }

    #[test]
    fn test_backoff_growth_is_capped() {
        let config = RaceConfig {
            retry_interval_ms: 10,
            backoff_multiplier: 2.0,
            max_retry_interval_ms: 50,
            ..Default::default()
        };
        let mut delay = config.retry_interval();
        let mut seen = Vec::new();
        for _ in 0..5 {
            delay = grow_delay(&config, delay);
            seen.push(delay.as_millis());
        }
        assert_eq!(seen, vec![20, 40, 50, 50, 50]);
    }

    #[test]
    fn test_rate_limit_delay() {
        let config = RaceConfig::default();
        let limited = AttemptError::new(ErrorKind::RateLimited, "slow down");
        let other = AttemptError::network("reset");
        let base = config.retry_interval();
        assert_eq!(delay_after(&config, &limited, base), config.rate_limit_retry());
        assert_eq!(delay_after(&config, &other, base), base);
    }
}
