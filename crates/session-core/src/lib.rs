//! PTY session lifecycle for the terminal gateway.
//!
//! One session owns at most one PTY running the assistant binary. Clients
//! (WebSocket attachments) are fan-out targets with bounded frame queues; a
//! replay ring keeps the most recent output so a reattaching client's
//! terminal is not blank.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       SessionManager                         │
//! │                                                              │
//! │  attach ──► Session ──► PtyHandle (sh -lc 'exec claude')     │
//! │                │              │ master fd                    │
//! │                │              ▼                              │
//! │                │        reader task ──► replay ring          │
//! │                │              │                              │
//! │                │              ▼  ServerFrame                 │
//! │                └──────► client queues (bounded, per socket)  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod error;
mod manager;
mod pty;
mod replay;

pub use error::SessionError;
pub use manager::{
    CreateSessionParams, Session, SessionLimits, SessionManager, SessionManagerConfig,
    SessionSummary, CLIENT_QUEUE_CAPACITY, DEFAULT_COLS, DEFAULT_ROWS,
};
pub use pty::{PtyHandle, PtySpawnConfig};
pub use replay::{ReplayBuffer, REPLAY_CAPACITY};
