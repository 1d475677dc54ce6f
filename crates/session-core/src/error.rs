//! Error types for session management.

use thiserror::Error;

/// Errors from session lifecycle operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session with the given id.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The session belongs to a different user or repo.
    #[error("session is not owned by the caller")]
    NotOwner,

    /// The caller already has the maximum number of sessions.
    #[error("per-user session limit reached ({0})")]
    PerUserLimit(usize),

    /// The server is at its global session capacity.
    #[error("server session capacity reached ({0})")]
    GlobalLimit(usize),

    /// The operation requires a running PTY.
    #[error("session is not running")]
    NotRunning,

    /// Geometry outside the accepted bounds.
    #[error("invalid terminal size {cols}x{rows}")]
    InvalidSize { cols: u16, rows: u16 },

    /// PTY spawn, resize, or write failure.
    #[error("pty error: {0}")]
    Pty(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
