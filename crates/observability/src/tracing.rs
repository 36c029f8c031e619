//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Initialize JSON logging.
///
/// `RUST_LOG` wins when set; otherwise `default_directive` applies (e.g.
/// `"info"` or `"classbook_infra=debug,info"`). Safe to call multiple times.
pub fn init(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(true)
        .with_current_span(true)
        .try_init();
}

/// Compact human-readable output for tests; captured by the test harness.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_test_writer()
        .try_init();
}
