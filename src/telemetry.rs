//! `tracing` subscriber initialisation.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber was already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Installs the global `fmt` subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `log_level` is used, falling back
/// to `info` when it does not parse.
///
/// # Errors
///
/// Returns [`TelemetryError::Install`] when a subscriber is already set.
pub fn init_tracing(log_level: &str, json: bool) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| log_level.parse::<EnvFilter>())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    let installed = if json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
    installed.map_err(|err| TelemetryError::Install(err.to_string()))
}
