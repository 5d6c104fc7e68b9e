//! Structured logging setup.
//!
//! Installs a tracing subscriber for the invocation. `RUST_LOG` wins over
//! the configured level when set.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Build the filter for a configuration. `RUST_LOG` wins when set.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter(&config.level))
}

/// Filter for a configured level, or `info` if it does not parse.
fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Returns false when a subscriber was already installed, which is not an
/// error: warm invocations reuse the process.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let layer = match config.format {
        LogFormat::Text => fmt::layer()
            .with_target(config.with_target)
            .with_ansi(false)
            .with_filter(env_filter(config))
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(config.with_target)
            .with_current_span(true)
            .with_filter(env_filter(config))
            .boxed(),
    };

    let installed = tracing_subscriber::registry().with(layer).try_init().is_ok();
    if installed {
        tracing::debug!(level = %config.level, format = ?config.format, "logging initialized");
    }
    installed
}
