//! Tracing subscriber setup for the server binary.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output, one object per line.
    Json,
}

/// Errors raised while installing the subscriber.
#[derive(Error, Debug)]
pub enum LoggingError {
    /// The configured filter directive could not be parsed.
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    /// A global subscriber is already installed.
    #[error("failed to install subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Installs a global subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over `level` when it is set.
///
/// # Errors
///
/// Returns a `LoggingError` if `level` is not a valid filter or a subscriber is already
/// installed.
pub fn init_logging(level: &str, format: LogFormat) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)?,
    };

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()?,
    }

    Ok(())
}
