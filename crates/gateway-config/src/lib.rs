//! Boot-time configuration, logging, runtime settings, and the audit sink.

mod audit;
mod config;
mod error;
mod logging;
mod settings;

pub use audit::{AuditEvent, AuditSink};
pub use config::{
    Config, Environment, DEFAULT_CLAUDE_PATH, DEFAULT_DISCONNECTED_TTL_MINUTES, DEFAULT_HOST,
    DEFAULT_LOG_LEVEL, DEFAULT_MAX_FILE_SIZE_BYTES, DEFAULT_MAX_SESSIONS_PER_USER,
    DEFAULT_MAX_TOTAL_SESSIONS, DEFAULT_PORT,
};
pub use error::{ConfigError, SettingsError};
pub use logging::{init_logging, parse_level};
pub use settings::{Settings, SettingsStore, WORKTREE_RETENTION};
