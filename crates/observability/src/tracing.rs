//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Output encoding for log lines.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line (default; what log shippers expect).
    Json,
    /// Human-readable lines for local development.
    Pretty,
}

impl LogFormat {
    /// Reads `LOG_FORMAT` (`json` | `pretty`), falling back to JSON.
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(false)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
    };
}
