//! Tracing and logging setup shared by the server and the worker binaries.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::LogFormat;

/// Initialize process-wide logging using `LOG_FORMAT` and `RUST_LOG`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(LogFormat::from_env());
}
