//! Error types for lockrace-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid execution window: {0}")]
    InvalidWindow(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
