//! Wire protocol for the terminal WebSocket.
//!
//! Frames are JSON objects tagged by a `type` field. Client frames are
//! validated at the protocol layer before they reach the session manager so
//! the manager only ever sees well-formed input.

use serde::{Deserialize, Serialize};

/// Maximum `input` payload per frame (bytes).
pub const MAX_INPUT_BYTES: usize = 64 * 1024;
/// Maximum WebSocket frame size accepted by the endpoint (bytes).
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;
/// Column bounds for attach/resize.
pub const MIN_COLS: u16 = 1;
pub const MAX_COLS: u16 = 500;
/// Row bounds for attach/resize.
pub const MIN_ROWS: u16 = 1;
pub const MAX_ROWS: u16 = 200;
/// Maximum branch name length accepted on attach.
pub const MAX_BRANCH_LEN: usize = 100;

/// WebSocket close codes used by the terminal endpoint.
pub mod close_code {
    /// Missing or malformed `repoId`.
    pub const BAD_REQUEST: u16 = 4000;
    /// No verified user on the connection.
    pub const UNAUTHORIZED: u16 = 4001;
    /// Client silent across two server heartbeats.
    pub const PING_TIMEOUT: u16 = 4002;
    /// Unknown `repoId` or `sessionId`.
    pub const NOT_FOUND: u16 = 4004;
}

/// Validation failures for client frames.
#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("input exceeds {MAX_INPUT_BYTES} bytes")]
    InputTooLarge,
    #[error("cols must be within [{MIN_COLS}, {MAX_COLS}]")]
    ColsOutOfRange,
    #[error("rows must be within [{MIN_ROWS}, {MAX_ROWS}]")]
    RowsOutOfRange,
    #[error("branch exceeds {MAX_BRANCH_LEN} characters")]
    BranchTooLong,
}

/// Session lifecycle phase as reported in `status` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Starting,
    Running,
    Exited,
}

/// Frames sent by the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    /// Attach to an existing session, or create one when `session_id` is
    /// absent.
    Attach {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cols: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rows: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
    },
    /// Keystrokes for the PTY.
    Input { data: String },
    /// Terminal geometry change.
    Resize { cols: u16, rows: u16 },
    /// Client-initiated liveness probe.
    Ping,
    /// Kill and respawn the PTY in place.
    Restart,
}

impl ClientFrame {
    /// Validate the frame's field constraints.
    pub fn validate(&self) -> Result<(), FrameError> {
        match self {
            ClientFrame::Attach {
                cols, rows, branch, ..
            } => {
                if let Some(cols) = cols {
                    check_cols(*cols)?;
                }
                if let Some(rows) = rows {
                    check_rows(*rows)?;
                }
                if let Some(branch) = branch {
                    if branch.len() > MAX_BRANCH_LEN {
                        return Err(FrameError::BranchTooLong);
                    }
                }
                Ok(())
            }
            ClientFrame::Input { data } => {
                if data.len() > MAX_INPUT_BYTES {
                    return Err(FrameError::InputTooLarge);
                }
                Ok(())
            }
            ClientFrame::Resize { cols, rows } => {
                check_cols(*cols)?;
                check_rows(*rows)
            }
            ClientFrame::Ping | ClientFrame::Restart => Ok(()),
        }
    }
}

fn check_cols(cols: u16) -> Result<(), FrameError> {
    if (MIN_COLS..=MAX_COLS).contains(&cols) {
        Ok(())
    } else {
        Err(FrameError::ColsOutOfRange)
    }
}

fn check_rows(rows: u16) -> Result<(), FrameError> {
    if (MIN_ROWS..=MAX_ROWS).contains(&rows) {
        Ok(())
    } else {
        Err(FrameError::RowsOutOfRange)
    }
}

/// Frames sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    /// PTY output, UTF-8 decoded (lossy).
    Output { data: String },
    /// Ring contents at attach time, delivered before any live output.
    Replay { data: String },
    /// Session lifecycle update.
    Status {
        state: SessionPhase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Recoverable per-frame error; the socket stays open.
    Error { message: String },
    /// Server heartbeat and the answer to a client `ping`.
    Pong,
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
