//! Tracing and diagnostics setup shared by controllers and worker processes.

/// Initialize process-wide tracing for a controller process.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize tracing inside a worker process.
///
/// Workers answer on stdout, so their logs must go to stderr.
pub fn init_worker() {
    tracing::init_worker();
}

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Diagnostic sinks backed by tracing.
pub mod sink;

pub use sink::TracingSink;
