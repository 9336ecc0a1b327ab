use tracing_subscriber::EnvFilter;

/// Initializes structured logging for a binary.
///
/// Uses the `RUST_LOG` env var if set, otherwise falls back to the provided
/// default directive.
pub fn init_tracing(default_directives: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

/// Initializes tracing for tests.
///
/// Safe to call from every test; only the first call installs the
/// subscriber, later calls are no-ops. Output is captured per test by the
/// libtest harness.
pub fn init_test_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_test_writer()
        .try_init();
}
