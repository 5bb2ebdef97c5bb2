//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    #[error("Invalid value: {0}")]
    Core(#[from] lockrace_core::CoreError),

    #[error("Executor error: {0}")]
    Executor(#[from] lockrace_executor::ExecutorError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] lockrace_telemetry::TelemetryError),

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

pub type AppResult<T> = Result<T, AppError>;
