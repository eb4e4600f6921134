//! Logging and security events
//!
//! Application code logs with plain `tracing` macros; [`init`] installs the
//! subscriber once at startup. Security-relevant events use
//! [`security_event!`] so they carry uniform category and severity fields.

mod config;
mod events;
mod providers;

pub use config::{LogFormat, ObservabilityConfig, DEFAULT_LOG_FILTER};
pub use events::{security_event, SecurityEvent, Severity};

use thiserror::Error;
use tracing::info;

/// Install the tracing subscriber. Call once, before anything logs.
pub fn init(config: &ObservabilityConfig) -> Result<(), ObservabilityError> {
    providers::init_tracing(config)?;
    info!(log_format = ?config.log_format, "Logging initialized");
    Ok(())
}

/// Logging setup errors
#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("Observability config error: {0}")]
    Config(String),
    #[error("Provider error: {0}")]
    Provider(String),
}
