//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingConfig;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured filter directive. Calling
/// this twice is harmless; the second call leaves the first subscriber in place.
///
/// # Example
/// ```
/// wrap_core::init_logging(&wrap_core::LoggingConfig::default());
/// tracing::info!("Engine starting");
/// ```
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
