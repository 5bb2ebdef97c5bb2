//! Application configuration.
//!
//! Loaded from a TOML file, then overridden by `LOCKRACE__*` environment
//! variables (`__` separates nesting levels), e.g.
//! `LOCKRACE__CLAIM__RACE__WORKER_COUNT=256`.

use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use lockrace_core::{ExecutionWindow, OperationKind, PriorityConfig, RaceConfig};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "LOCKRACE";

/// Default config file path.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// One raced operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationConfig {
    /// Submission endpoint (POST).
    pub endpoint: String,
    /// JSON document forwarded verbatim with every attempt.
    #[serde(default)]
    pub payload: Option<String>,
    /// Per-request timeout (ms).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub race: RaceConfig,
    /// Priority bounds. Uses the operation's defaults when absent.
    #[serde(default)]
    pub priority: Option<PriorityConfig>,
}

fn default_request_timeout_ms() -> u64 {
    2_000
}

impl OperationConfig {
    /// Config pointing at `endpoint` with default tuning.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            payload: None,
            request_timeout_ms: default_request_timeout_ms(),
            race: RaceConfig::default(),
            priority: None,
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Effective priority configuration for `operation`.
    #[must_use]
    pub fn priority_for(&self, operation: OperationKind) -> PriorityConfig {
        self.priority.clone().unwrap_or_else(|| match operation {
            OperationKind::Claim => PriorityConfig::claim_default(),
            OperationKind::Transfer => PriorityConfig::transfer_default(),
        })
    }

    /// Parsed payload, `null` when none is configured.
    pub fn payload_value(&self) -> AppResult<serde_json::Value> {
        match &self.payload {
            None => Ok(serde_json::Value::Null),
            Some(raw) => serde_json::from_str(raw)
                .map_err(|e| AppError::Config(format!("Invalid payload JSON: {e}"))),
        }
    }

    fn validate(&self, operation: OperationKind) -> AppResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(AppError::Config(format!("{operation}.endpoint is empty")));
        }
        if self.request_timeout_ms == 0 {
            return Err(AppError::Config(format!(
                "{operation}.request_timeout_ms must be > 0"
            )));
        }
        self.payload_value()?;
        self.race.validate()?;
        self.priority_for(operation).validate()?;
        Ok(())
    }
}

/// Main application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Wall-clock unlock instant (RFC 3339).
    #[serde(default)]
    pub unlock_at: Option<DateTime<Utc>>,
    /// Unlock relative to startup (ms). Mutually exclusive with `unlock_at`.
    #[serde(default)]
    pub unlock_in_ms: Option<u64>,
    /// Spin phase before the unlock instant (µs).
    #[serde(default = "default_grace_before_spin_us")]
    pub grace_before_spin_us: u64,
    /// Wake overshoot above which a warning is logged (µs).
    #[serde(default = "default_max_overshoot_us")]
    pub max_overshoot_us: u64,
    /// Scheduler calibration rounds before the race. 0 = skip.
    #[serde(default)]
    pub calibration_rounds: u32,
    /// Log the Prometheus text exposition after the race.
    #[serde(default)]
    pub dump_metrics: bool,
    pub claim: OperationConfig,
    pub transfer: OperationConfig,
}

fn default_grace_before_spin_us() -> u64 {
    1_000
}

fn default_max_overshoot_us() -> u64 {
    5_000
}

impl AppConfig {
    /// Config with both endpoints and default tuning.
    pub fn new(claim_endpoint: impl Into<String>, transfer_endpoint: impl Into<String>) -> Self {
        Self {
            unlock_at: None,
            unlock_in_ms: None,
            grace_before_spin_us: default_grace_before_spin_us(),
            max_overshoot_us: default_max_overshoot_us(),
            calibration_rounds: 0,
            dump_metrics: false,
            claim: OperationConfig::new(claim_endpoint),
            transfer: OperationConfig::new(transfer_endpoint),
        }
    }

    /// Load from a TOML file plus `LOCKRACE__*` environment overrides.
    pub fn load(path: &str) -> AppResult<Self> {
        Self::from_sources(
            config::File::new(path, config::FileFormat::Toml),
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
    }

    /// Parse a TOML document without environment overrides.
    pub fn from_toml(content: &str) -> AppResult<Self> {
        Self::from_sources(
            config::File::from_str(content, config::FileFormat::Toml),
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .source(Some(config::Map::new())),
        )
    }

    fn from_sources<S>(file: S, env: config::Environment) -> AppResult<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config: Self = config::Config::builder()
            .add_source(file)
            .add_source(env)
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> AppResult<()> {
        if self.unlock_at.is_some() && self.unlock_in_ms.is_some() {
            return Err(AppError::Config(
                "unlock_at and unlock_in_ms are mutually exclusive".to_string(),
            ));
        }
        self.claim.validate(OperationKind::Claim)?;
        self.transfer.validate(OperationKind::Transfer)?;
        self.window_at(Utc::now(), Instant::now()).validate()?;
        Ok(())
    }

    /// Operation section by kind.
    #[must_use]
    pub fn operation(&self, operation: OperationKind) -> &OperationConfig {
        match operation {
            OperationKind::Claim => &self.claim,
            OperationKind::Transfer => &self.transfer,
        }
    }

    /// Execution window for the configured unlock time.
    ///
    /// A past or missing unlock time opens the window immediately.
    #[must_use]
    pub fn window_at(&self, wall_now: DateTime<Utc>, mono_now: Instant) -> ExecutionWindow {
        let window = match (self.unlock_at, self.unlock_in_ms) {
            (Some(at), _) => ExecutionWindow::from_wall_clock(at, wall_now, mono_now),
            (None, Some(ms)) => ExecutionWindow::after(mono_now, Duration::from_millis(ms)),
            (None, None) => ExecutionWindow::new(mono_now),
        };
        window
            .with_grace(Duration::from_micros(self.grace_before_spin_us))
            .with_max_overshoot(Duration::from_micros(self.max_overshoot_us))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    const MINIMAL: &str = r#"
        [claim]
        endpoint = "http://localhost:8080/claim"

        [transfer]
        endpoint = "http://localhost:8080/transfer"
    "#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = assert_ok!(AppConfig::from_toml(MINIMAL));
        assert_eq!(config.claim.race, RaceConfig::default());
        assert_eq!(config.grace_before_spin_us, 1_000);
        assert_eq!(config.unlock_at, None);
        assert_eq!(
            config.claim.priority_for(OperationKind::Claim),
            PriorityConfig::claim_default()
        );
        assert_eq!(
            config.transfer.priority_for(OperationKind::Transfer),
            PriorityConfig::transfer_default()
        );
        assert_eq!(config.claim.payload_value().unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn test_full_config() {
        let toml = r#"
            unlock_at = "2030-01-01T00:00:00Z"
            grace_before_spin_us = 2000
            calibration_rounds = 5

            [claim]
            endpoint = "http://localhost:8080/claim"
            payload = '{"balance_id": "00000000abc"}'

            [claim.race]
            worker_count = 256
            max_attempts = 10
            backoff_multiplier = 1.5

            [claim.priority]
            base = 100
            min = 10
            max = 1000
            escalation_factor = 1.2

            [transfer]
            endpoint = "http://localhost:8080/transfer"
        "#;
        let config = AppConfig::from_toml(toml).unwrap();
        assert_eq!(config.claim.race.worker_count, 256);
        assert_eq!(config.claim.race.retry_interval_ms, 5);
        assert_eq!(config.calibration_rounds, 5);
        let priority = config.claim.priority_for(OperationKind::Claim);
        assert_eq!(priority.base, 100);
        assert!((priority.escalation_factor - 1.2).abs() < f64::EPSILON);
        assert_eq!(
            config.claim.payload_value().unwrap()["balance_id"],
            "00000000abc"
        );
    }

    #[test]
    fn test_invalid_sections_rejected() {
        let bad_race = format!("{MINIMAL}\n[claim.race]\nworker_count = 0\n");
        assert_err!(AppConfig::from_toml(&bad_race));

        let bad_payload = r#"
            [claim]
            endpoint = "http://localhost/claim"
            payload = "{not json"
            [transfer]
            endpoint = "http://localhost/transfer"
        "#;
        assert_err!(AppConfig::from_toml(bad_payload));

        let mut config = AppConfig::new("http://a", "http://b");
        config.unlock_at = Some(Utc::now());
        config.unlock_in_ms = Some(10);
        assert!(config.validate().is_err());

        let config = AppConfig::new("", "http://b");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_override() {
        let mut env = config::Map::new();
        env.insert(
            "LOCKRACE__CLAIM__RACE__WORKER_COUNT".to_string(),
            "512".to_string(),
        );
        let config = AppConfig::from_sources(
            config::File::from_str(MINIMAL, config::FileFormat::Toml),
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .source(Some(env)),
        )
        .unwrap();
        assert_eq!(config.claim.race.worker_count, 512);
        assert_eq!(config.transfer.race.worker_count, 64);
    }

    #[test]
    fn test_window_from_relative_unlock() {
        let mut config = AppConfig::new("http://a", "http://b");
        config.unlock_in_ms = Some(250);
        let now = Instant::now();
        let window = config.window_at(Utc::now(), now);
        assert_eq!(window.target, now + Duration::from_millis(250));
        assert_eq!(window.grace_before_spin, Duration::from_micros(1_000));
    }

    #[test]
    fn test_window_from_past_wall_clock_is_immediate() {
        let mut config = AppConfig::new("http://a", "http://b");
        let wall_now = Utc::now();
        config.unlock_at = Some(wall_now - chrono::Duration::seconds(10));
        let now = Instant::now();
        assert_eq!(config.window_at(wall_now, now).target, now);
    }

    #[test]
    fn test_shipped_default_config_starts_soon() {
        let config = assert_ok!(AppConfig::from_toml(include_str!(
            "../../../config/default.toml"
        )));
        assert_eq!(config.unlock_at, None);

        let now = Instant::now();
        let window = config.window_at(Utc::now(), now);
        assert!(window.target.saturating_duration_since(now) <= Duration::from_secs(60));
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::new("http://a", "http://b");
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[claim]"));
        assert!(toml_str.contains("endpoint"));
    }
}
