//! Dual-operation orchestrator.
//!
//! Runs a claim race and a transfer race concurrently and joins their
//! results into one [`CompositeResult`]. The two races are failure
//! independent:
//! - each runs in its own task with its own child of the shutdown token
//! - a win, failure or panic in one never cancels or retries the other
//! - only the orchestrator's shutdown token stops both
//!
//! The orchestrator always returns a composite result once both races are
//! prepared; one race failing is never an error of the orchestration.

use std::sync::Arc;

use lockrace_core::{
    CompositeResult, ExecutionWindow, OperationKind, PriorityConfig, RaceConfig, RaceFailure,
    RaceResult,
};
use lockrace_telemetry::{Metrics, MetricsAggregator};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::attempt::DynAttempter;
use crate::clock::DynClock;
use crate::coordinator::RaceCoordinator;
use crate::error::ExecutorResult;
use crate::priority::PriorityController;

/// Everything needed to race one operation.
#[derive(Clone)]
pub struct OperationPlan {
    pub window: ExecutionWindow,
    pub attempter: DynAttempter,
    pub payload: serde_json::Value,
    pub race: RaceConfig,
    pub priority: PriorityConfig,
}

impl OperationPlan {
    /// Plan with default race and priority configuration.
    pub fn new(window: ExecutionWindow, attempter: DynAttempter) -> Self {
        Self {
            window,
            attempter,
            payload: serde_json::Value::Null,
            race: RaceConfig::default(),
            priority: PriorityConfig::default(),
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn with_race(mut self, race: RaceConfig) -> Self {
        self.race = race;
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: PriorityConfig) -> Self {
        self.priority = priority;
        self
    }
}

/// A validated race ready to run.
pub struct PreparedRace {
    coordinator: RaceCoordinator,
    window: ExecutionWindow,
    attempter: DynAttempter,
    payload: serde_json::Value,
}

impl PreparedRace {
    #[must_use]
    pub fn operation(&self) -> OperationKind {
        self.coordinator.operation()
    }

    /// Priority controller of this race, for external competitor feeds.
    #[must_use]
    pub fn priority(&self) -> Arc<PriorityController> {
        self.coordinator.priority()
    }

    /// Live attempt statistics of this race.
    #[must_use]
    pub fn metrics(&self) -> Arc<MetricsAggregator> {
        self.coordinator.metrics()
    }

    async fn run(self, cancel: CancellationToken) -> RaceResult {
        self.coordinator
            .run(self.window, self.attempter, self.payload, cancel)
            .await
    }
}

/// Composes two independent race coordinators.
pub struct DualOrchestrator {
    clock: DynClock,
    shutdown: CancellationToken,
}

impl DualOrchestrator {
    /// Orchestrator with its own shutdown token.
    #[must_use]
    pub fn new(clock: DynClock) -> Self {
        Self::with_shutdown(clock, CancellationToken::new())
    }

    /// Orchestrator stopped by an external shutdown token.
    #[must_use]
    pub fn with_shutdown(clock: DynClock, shutdown: CancellationToken) -> Self {
        Self { clock, shutdown }
    }

    /// Token that stops both races when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Validate a plan and build its coordinator.
    ///
    /// # Errors
    /// Returns `ExecutorError::Config` if the plan's configuration is invalid.
    pub fn prepare(
        &self,
        operation: OperationKind,
        plan: OperationPlan,
    ) -> ExecutorResult<PreparedRace> {
        plan.window.validate()?;
        let coordinator =
            RaceCoordinator::new(operation, plan.race, plan.priority, self.clock.clone())?;
        Ok(PreparedRace {
            coordinator,
            window: plan.window,
            attempter: plan.attempter,
            payload: plan.payload,
        })
    }

    /// Validate both plans, then race them.
    ///
    /// # Errors
    /// Returns `ExecutorError::Config` if either plan is invalid. Nothing
    /// is started in that case.
    pub async fn run_independent_pair(
        &self,
        claim: OperationPlan,
        transfer: OperationPlan,
    ) -> ExecutorResult<CompositeResult> {
        let claim = self.prepare(OperationKind::Claim, claim)?;
        let transfer = self.prepare(OperationKind::Transfer, transfer)?;
        Ok(self.run_prepared(claim, transfer).await)
    }

    /// Race two prepared operations and join their results.
    pub async fn run_prepared(&self, claim: PreparedRace, transfer: PreparedRace) -> CompositeResult {
        let claim_op = claim.operation();
        let transfer_op = transfer.operation();
        info!(claim = %claim_op, transfer = %transfer_op, "Starting independent pair");

        let claim_handle = tokio::spawn(claim.run(self.shutdown.child_token()));
        let transfer_handle = tokio::spawn(transfer.run(self.shutdown.child_token()));

        let (claim_result, transfer_result) = tokio::join!(
            join_race(claim_op, claim_handle),
            join_race(transfer_op, transfer_handle)
        );

        let composite = CompositeResult::new(claim_result, transfer_result);
        Metrics::composite(composite.overall_status.as_str());
        info!(
            status = %composite.overall_status,
            claim_success = composite.claim_result.success,
            transfer_success = composite.transfer_result.success,
            total_attempts = composite.total_attempts(),
            "Independent pair finished"
        );
        composite
    }
}

/// Await one race task; a panicked task becomes a failed result.
async fn join_race(operation: OperationKind, handle: JoinHandle<RaceResult>) -> RaceResult {
    match handle.await {
        Ok(result) => result,
        Err(e) => {
            error!(%operation, error = %e, "Race task failed");
            RaceResult::aborted(operation, RaceFailure::Panicked)
        }
    }
}
