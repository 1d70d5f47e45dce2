//! Tracing subscriber setup for the binary.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Filter used when neither `RUST_LOG` nor the configured level parse.
pub const FALLBACK_FILTER: &str = "info";

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Raised when a global subscriber is already installed.
    #[error("failed to initialise logging: {message}")]
    Init {
        /// Subscriber error message.
        message: String,
    },
}

/// Builds the filter: `RUST_LOG` wins, then `level`, then [`FALLBACK_FILTER`].
#[must_use]
pub fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER))
}

/// Installs a formatted subscriber writing to stderr.
///
/// # Errors
///
/// Returns [`LoggingError::Init`] when a subscriber was already set.
pub fn init(level: &str) -> Result<(), LoggingError> {
    tracing_subscriber::registry()
        .with(filter_for(level))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .map_err(|err| LoggingError::Init {
            message: err.to_string(),
        })
}
