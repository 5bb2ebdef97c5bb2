//! Executor error types.

use lockrace_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] CoreError),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
