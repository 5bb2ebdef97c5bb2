//! Main application orchestration.
//!
//! Turns the configuration into two operation plans, optionally calibrates
//! the scheduler, then runs the claim/transfer pair once:
//! - Build attempters (HTTP by default, injectable for tests)
//! - Convert the unlock time into an execution window
//! - Run both races through the dual orchestrator
//! - Report the composite result

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lockrace_core::{CompositeResult, ExecutionWindow, OperationKind};
use lockrace_executor::{
    monotonic, CancellationToken, DualOrchestrator, DynAttempter, DynClock, OperationPlan,
    PrecisionScheduler,
};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::http_attempt::HttpAttempter;

/// Lead time of one calibration round.
const CALIBRATION_LEAD: Duration = Duration::from_millis(5);

/// Main application.
pub struct Application {
    config: AppConfig,
    clock: DynClock,
    claim: DynAttempter,
    transfer: DynAttempter,
    shutdown: CancellationToken,
}

impl Application {
    /// Create an application that talks to the configured HTTP endpoints.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let claim = Arc::new(HttpAttempter::from_config(OperationKind::Claim, &config.claim)?);
        let transfer = Arc::new(HttpAttempter::from_config(
            OperationKind::Transfer,
            &config.transfer,
        )?);
        Self::with_attempters(config, claim, transfer)
    }

    /// Create an application with caller supplied attempters.
    pub fn with_attempters(
        config: AppConfig,
        claim: DynAttempter,
        transfer: DynAttempter,
    ) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock: monotonic(),
            claim,
            transfer,
            shutdown: CancellationToken::new(),
        })
    }

    /// Token that stops both races when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the claim/transfer pair once.
    pub async fn run(&self) -> AppResult<CompositeResult> {
        if self.config.calibration_rounds > 0 {
            let drift = PrecisionScheduler::new(self.clock.clone())
                .calibrate(self.config.calibration_rounds, CALIBRATION_LEAD)
                .await;
            info!(
                rounds = drift.iterations,
                avg_us = drift.average.as_micros() as u64,
                max_us = drift.max.as_micros() as u64,
                min_us = drift.min.as_micros() as u64,
                "Scheduler calibrated"
            );
            if drift.max > Duration::from_micros(self.config.max_overshoot_us) {
                warn!(
                    max_us = drift.max.as_micros() as u64,
                    limit_us = self.config.max_overshoot_us,
                    "Calibration drift above overshoot limit"
                );
            }
        }

        let window = self.config.window_at(Utc::now(), self.clock.now());
        let lead = window.target.saturating_duration_since(self.clock.now());
        info!(
            unlock_at = ?self.config.unlock_at,
            lead_ms = lead.as_millis() as u64,
            claim_workers = self.config.claim.race.worker_count,
            transfer_workers = self.config.transfer.race.worker_count,
            "Racing claim and transfer"
        );

        // Both operations share the unlock instant.
        let claim = self.plan(OperationKind::Claim, window, self.claim.clone())?;
        let transfer = self.plan(OperationKind::Transfer, window, self.transfer.clone())?;

        let orchestrator = DualOrchestrator::with_shutdown(self.clock.clone(), self.shutdown.clone());
        let composite = orchestrator.run_independent_pair(claim, transfer).await?;

        if self.config.dump_metrics {
            match lockrace_telemetry::render_metrics() {
                Ok(text) => info!(metrics = %text, "Prometheus metrics"),
                Err(e) => warn!(error = %e, "Failed to render metrics"),
            }
        }

        Ok(composite)
    }

    fn plan(
        &self,
        operation: OperationKind,
        window: ExecutionWindow,
        attempter: DynAttempter,
    ) -> AppResult<OperationPlan> {
        let section = self.config.operation(operation);
        Ok(OperationPlan::new(window, attempter)
            .with_payload(section.payload_value()?)
            .with_race(section.race.clone())
            .with_priority(section.priority_for(operation)))
    }
}
