//! PTY spawning and control.
//!
//! The assistant binary is launched inside a login shell purely to pick up
//! the user's environment; the shell `exec`s the binary, so when the binary
//! exits the shell is gone too and the session can never fall back to a
//! prompt.

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::error::SessionError;

/// Parameters for spawning the assistant PTY.
#[derive(Debug, Clone)]
pub struct PtySpawnConfig {
    /// Path to the assistant binary.
    pub command: String,
    /// Working directory (worktree or repo root).
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
}

/// Handle to a live PTY: master side, writer, and the child process.
pub struct PtyHandle {
    master: Box<dyn MasterPty + Send>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    child: Option<Box<dyn Child + Send + Sync>>,
    pid: Option<u32>,
}

impl PtyHandle {
    /// Spawn the assistant in a fresh PTY.
    ///
    /// Returns the handle and the master-side reader to drain.
    pub fn spawn(config: &PtySpawnConfig) -> Result<(Self, Box<dyn Read + Send>), SessionError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Pty(format!("failed to open pty: {e}")))?;

        let exec = exec_line(&config.command);
        let mut cmd = CommandBuilder::new("sh");
        cmd.args(["-lc", exec.as_str()]);
        cmd.cwd(&config.cwd);

        // Controlled environment baseline: keep the identity variables,
        // force terminal and locale.
        cmd.env_clear();
        for key in ["HOME", "PATH", "USER", "SHELL"] {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        cmd.env("TERM", "xterm-256color");
        cmd.env("LANG", "en_US.UTF-8");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::Pty(format!("failed to spawn assistant: {e}")))?;
        drop(pair.slave);

        let pid = child.process_id();
        info!(pid = ?pid, cwd = %config.cwd.display(), "Assistant PTY spawned");

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::Pty(format!("failed to clone pty reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::Pty(format!("failed to take pty writer: {e}")))?;

        Ok((
            Self {
                master: pair.master,
                writer: Arc::new(Mutex::new(writer)),
                child: Some(child),
                pid,
            },
            reader,
        ))
    }

    /// Shared writer for the PTY's input side.
    pub fn writer(&self) -> Arc<Mutex<Box<dyn Write + Send>>> {
        self.writer.clone()
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Pty(format!("failed to resize pty: {e}")))
    }

    /// Kill the child process. Idempotent; a dead child is not an error.
    pub fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.kill() {
                debug!(error = %e, "Kill on pty child failed (likely already dead)");
            }
        }
    }

    /// Take the child for the blocking exit-status wait.
    pub fn take_child(&mut self) -> Option<Box<dyn Child + Send + Sync>> {
        self.child.take()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

impl std::fmt::Debug for PtyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyHandle")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// The shell line that replaces the login shell with the assistant binary.
fn exec_line(command: &str) -> String {
    format!("exec '{}'", command.replace('\'', r"'\''"))
}
