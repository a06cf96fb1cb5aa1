//! Logging initialization and configuration.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,kiln=debug,kiln_rhi=debug,kiln_renderer=debug";

/// Initialize the logging system with tracing.
///
/// This sets up tracing-subscriber with:
/// - Environment-based filtering (`RUST_LOG`), falling back to [`DEFAULT_FILTER`]
/// - Target and thread id on every line
///
/// Calling this more than once is harmless; later calls are ignored.
///
/// # Example
/// ```
/// kiln_core::init_logging();
/// tracing::info!("Renderer initialized");
/// ```
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}

/// Installs a compact subscriber for tests, writing through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().with_test_writer().compact())
        .try_init();
}
