//! Process-wide tracing setup shared by every content repository host.

/// Initialize process-wide observability (JSON logs filtered by `RUST_LOG`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize human readable logging captured by the test harness.
pub fn init_for_tests() {
    tracing::init_with(&tracing::TracingConfig {
        default_filter: "debug".to_string(),
        format: tracing::LogFormat::Pretty,
        test_writer: true,
    });
}

/// Tracing configuration (filters, formats).
pub mod tracing;
