//! Logging initialization.
//!
//! Structured tracing output with an `EnvFilter`: `RUST_LOG` wins, the
//! configured default level otherwise. The configured level goes through
//! [`parse_level`], so a malformed value degrades to INFO instead of an
//! unfilterable subscriber. Production gets JSON lines for the log
//! shipper; development gets the human format.

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber. Safe to call more than once; later
/// calls are ignored.
pub fn init_logging(default_level: &str, json: bool) {
    let level = parse_level(default_level);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    if json {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}

/// Parse a log level string into a tracing Level, defaulting to INFO.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
