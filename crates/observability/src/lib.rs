//! Tracing and logging setup shared by binaries and tests.

/// Initialize process-wide tracing with the default `info` filter.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init("info");
}

/// Tracing configuration (filters, layers).
pub mod tracing;
