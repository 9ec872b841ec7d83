//! Tracing/logging setup shared by binaries and tests.

/// Initialize process-wide tracing (JSON, filtered by `RUST_LOG`, default `info`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Human-readable output captured by the test harness (default `debug`).
pub fn init_for_tests() {
    tracing::init_for_tests();
}

/// Subscriber construction.
pub mod tracing;
