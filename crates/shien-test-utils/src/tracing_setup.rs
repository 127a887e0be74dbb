//! Tracing initialisation for tests.

use tracing_subscriber::EnvFilter;

/// Send tracing output to the test-harness writer, honouring `RUST_LOG`.
///
/// Idempotent: only the first call in a process installs the subscriber.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}
