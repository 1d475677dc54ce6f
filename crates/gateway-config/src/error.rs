//! Configuration and persistence errors.

use thiserror::Error;

/// Fatal configuration errors: the process exits non-zero on any of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    #[error("invalid configuration for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Errors from the settings store.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("caller is not an admin")]
    NotAdmin,

    #[error("failed to persist settings: {0}")]
    Persist(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings file is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}
