//! Logging bootstrap

use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins over the configured level. Calling this twice is harmless,
/// the second installation is ignored.
pub fn init(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Subscriber for tests; output goes through the test writer
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
