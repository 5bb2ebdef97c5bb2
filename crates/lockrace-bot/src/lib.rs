//! lockrace application.
//!
//! Wires configuration, HTTP attempters and the dual orchestrator into a
//! one-shot claim/transfer race:
//! - Layered config (TOML file + `LOCKRACE__*` env overrides)
//! - HTTP submission adapter for the external service
//! - Single run of the independent claim/transfer pair

pub mod app;
pub mod config;
pub mod error;
pub mod http_attempt;

pub use app::Application;
pub use config::{AppConfig, OperationConfig};
pub use error::{AppError, AppResult};
pub use http_attempt::HttpAttempter;
