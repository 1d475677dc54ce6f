//! Session registry and lifecycle orchestration.
//!
//! The manager exclusively owns sessions and their PTYs. Sockets are
//! clients: they hold a session id and a bounded frame queue, and many may
//! attach to the same session. The registry mutex guards only the session
//! map; per-session state has its own mutex, and neither is ever held
//! across I/O.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use terminal_proto::{ServerFrame, SessionPhase};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SessionError;
use crate::pty::{PtyHandle, PtySpawnConfig};
use crate::replay::ReplayBuffer;

/// Default terminal geometry when the client does not send one.
pub const DEFAULT_COLS: u16 = 120;
pub const DEFAULT_ROWS: u16 = 30;

/// Outbound frame queue capacity per attached client.
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const PTY_READ_BUF: usize = 8192;

/// Capacity limits enforced before any PTY spawn.
#[derive(Debug, Clone)]
pub struct SessionLimits {
    pub max_per_user: usize,
    pub max_total: usize,
}

/// Static manager configuration.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Path to the assistant binary.
    pub claude_path: String,
    /// How long a fully-detached session survives before reaping.
    pub disconnected_ttl: Duration,
    pub limits: SessionLimits,
}

/// Parameters for creating a session.
#[derive(Debug, Clone)]
pub struct CreateSessionParams {
    pub user_email: String,
    pub repo_id: String,
    pub branch: Option<String>,
    /// Working directory for the PTY: the user's worktree, or the repo root
    /// when no branch was requested.
    pub workdir: PathBuf,
    pub name: Option<String>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

/// Session listing entry for the HTTP surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    pub state: SessionPhase,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
}

/// A PTY-backed session. Identity is immutable; mutable state sits behind
/// the per-session mutex.
pub struct Session {
    pub id: String,
    pub user_email: String,
    pub repo_id: String,
    pub branch: Option<String>,
    pub workdir: PathBuf,
    pub created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
}

struct SessionState {
    phase: SessionPhase,
    name: String,
    clients: HashMap<String, mpsc::Sender<ServerFrame>>,
    replay: ReplayBuffer,
    pty: Option<PtyHandle>,
    /// Invalidates reader tasks of killed/replaced PTYs.
    pty_epoch: u64,
    cols: u16,
    rows: u16,
    last_activity: Instant,
    disconnected_at: Option<Instant>,
    /// Invalidates reap timers armed by earlier detaches.
    reap_epoch: u64,
    exit_code: Option<i32>,
}

impl Session {
    fn summary(&self, include_repo: bool) -> SessionSummary {
        let state = self.state.lock().expect("session state mutex poisoned");
        SessionSummary {
            id: self.id.clone(),
            name: state.name.clone(),
            state: state.phase,
            created_at: self.created_at,
            branch: self.branch.clone(),
            repo_id: include_repo.then(|| self.repo_id.clone()),
        }
    }

    /// How long since the last client input or PTY output.
    pub fn idle_for(&self) -> Duration {
        let state = self.state.lock().expect("session state mutex poisoned");
        state.last_activity.elapsed()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user_email", &self.user_email)
            .field("repo_id", &self.repo_id)
            .finish_non_exhaustive()
    }
}

/// Process-wide session manager. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionManagerConfig,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(config: SessionManagerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start the background sweeper that reaps idle disconnected sessions.
    pub fn spawn_sweeper(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let ids: Vec<String> = {
                    let sessions = manager.lock_sessions();
                    sessions.keys().cloned().collect()
                };
                for id in ids {
                    manager.reap_if_expired(&id, None);
                }
            }
        });
    }

    /// Create a session and spawn its PTY (HTTP create path).
    pub fn create(&self, params: CreateSessionParams) -> Result<Arc<Session>, SessionError> {
        let session = self.register(params)?;
        if let Err(err) = self.spawn_session_pty(&session) {
            self.fail_session(&session);
            return Err(err);
        }
        Ok(session)
    }

    /// Create a session with the first client already attached (WS attach
    /// without a session id).
    ///
    /// The client is registered and receives `status(starting)` + an empty
    /// `replay` before the PTY spawn, so it observes the full lifecycle.
    pub fn attach_new(
        &self,
        params: CreateSessionParams,
        client_id: &str,
        sender: mpsc::Sender<ServerFrame>,
    ) -> Result<Arc<Session>, SessionError> {
        let session = self.register(params)?;

        {
            let mut state = lock_state(&session);
            let status = status_frame(&session, &state, None);
            let replay = replay_frame(&state);
            let _ = sender.try_send(status);
            let _ = sender.try_send(replay);
            state.clients.insert(client_id.to_string(), sender);
        }

        if let Err(err) = self.spawn_session_pty(&session) {
            self.fail_session(&session);
            return Err(err);
        }
        Ok(session)
    }

    /// Attach a client to an existing session.
    ///
    /// Cancels any pending reap and queues a `status` frame plus a `replay`
    /// snapshot ahead of all future output, in that order.
    pub fn attach(
        &self,
        session_id: &str,
        user_email: &str,
        repo_id: &str,
        client_id: &str,
        sender: mpsc::Sender<ServerFrame>,
        dims: Option<(u16, u16)>,
    ) -> Result<Arc<Session>, SessionError> {
        let session = self
            .get(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
        if session.user_email != user_email || session.repo_id != repo_id {
            return Err(SessionError::NotOwner);
        }

        let mut state = lock_state(&session);
        state.disconnected_at = None;
        state.reap_epoch += 1;

        if let Some((cols, rows)) = dims {
            if let Some(pty) = &state.pty {
                if pty.resize(cols, rows).is_ok() {
                    state.cols = cols;
                    state.rows = rows;
                }
            }
        }

        let status = status_frame(&session, &state, None);
        let replay = replay_frame(&state);
        let _ = sender.try_send(status);
        let _ = sender.try_send(replay);
        state.clients.insert(client_id.to_string(), sender);
        drop(state);

        debug!(session_id = %session.id, client_id, "Client attached");
        Ok(session)
    }

    /// Detach a client. Idempotent. Arms the reap timer when the last
    /// client leaves.
    pub fn detach(&self, session_id: &str, client_id: &str) {
        let Some(session) = self.get(session_id) else {
            return;
        };

        let armed = {
            let mut state = lock_state(&session);
            state.clients.remove(client_id);
            if state.clients.is_empty() && state.disconnected_at.is_none() {
                state.disconnected_at = Some(Instant::now());
                state.reap_epoch += 1;
                Some(state.reap_epoch)
            } else {
                None
            }
        };

        if let Some(epoch) = armed {
            let manager = self.clone();
            let id = session.id.clone();
            let ttl = self.inner.config.disconnected_ttl;
            tokio::spawn(async move {
                tokio::time::sleep(ttl).await;
                manager.reap_if_expired(&id, Some(epoch));
            });
            debug!(session_id = %session.id, "Last client detached, reap timer armed");
        }
    }

    /// Write client keystrokes to the PTY.
    pub async fn input(&self, session_id: &str, data: Vec<u8>) -> Result<(), SessionError> {
        let session = self
            .get(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;

        let writer = {
            let mut state = lock_state(&session);
            if state.phase != SessionPhase::Running {
                return Err(SessionError::NotRunning);
            }
            state.last_activity = Instant::now();
            state
                .pty
                .as_ref()
                .map(PtyHandle::writer)
                .ok_or(SessionError::NotRunning)?
        };

        tokio::task::spawn_blocking(move || -> Result<(), SessionError> {
            let mut writer = writer.lock().expect("pty writer mutex poisoned");
            writer.write_all(&data)?;
            writer.flush()?;
            Ok(())
        })
        .await
        .map_err(|e| SessionError::Pty(format!("input task failed: {e}")))?
    }

    /// Propagate a geometry change to the PTY.
    pub fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<(), SessionError> {
        if !(terminal_proto::MIN_COLS..=terminal_proto::MAX_COLS).contains(&cols)
            || !(terminal_proto::MIN_ROWS..=terminal_proto::MAX_ROWS).contains(&rows)
        {
            return Err(SessionError::InvalidSize { cols, rows });
        }

        let session = self
            .get(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
        let mut state = lock_state(&session);
        let pty = state.pty.as_ref().ok_or(SessionError::NotRunning)?;
        pty.resize(cols, rows)?;
        state.cols = cols;
        state.rows = rows;
        Ok(())
    }

    /// Kill and respawn the PTY in place. Clients stay attached and observe
    /// `status(starting)` then `status(running)`.
    pub fn restart(&self, session_id: &str) -> Result<(), SessionError> {
        let session = self
            .get(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;

        {
            let mut state = lock_state(&session);
            discard_pty(&mut state);
            state.replay.clear();
            state.phase = SessionPhase::Starting;
            let status = status_frame(&session, &state, None);
            fan_out(&mut state, &status);
        }

        info!(session_id = %session.id, "Session restarting");
        self.spawn_session_pty(&session)
    }

    /// Kill the PTY, notify clients, and drop the session.
    pub fn terminate(&self, session_id: &str) -> Result<(), SessionError> {
        let session = self
            .get(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
        self.terminate_session(&session, Some("terminated"));
        Ok(())
    }

    /// Terminate with an ownership check (HTTP delete path). Sessions the
    /// caller does not own are reported as missing.
    pub fn terminate_owned(&self, session_id: &str, user_email: &str) -> Result<(), SessionError> {
        let session = self
            .get(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
        if session.user_email != user_email {
            return Err(SessionError::SessionNotFound(session_id.to_string()));
        }
        self.terminate_session(&session, Some("terminated"));
        Ok(())
    }

    /// Rename a session (owner only).
    pub fn rename(
        &self,
        session_id: &str,
        user_email: &str,
        name: &str,
    ) -> Result<SessionSummary, SessionError> {
        let session = self
            .get(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
        if session.user_email != user_email {
            return Err(SessionError::SessionNotFound(session_id.to_string()));
        }

        {
            let mut state = lock_state(&session);
            state.name = name.to_string();
        }
        Ok(session.summary(false))
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.lock_sessions().get(session_id).cloned()
    }

    /// The caller's sessions on one repo, oldest first.
    pub fn list_for_repo(&self, user_email: &str, repo_id: &str) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .lock_sessions()
            .values()
            .filter(|s| s.user_email == user_email && s.repo_id == repo_id)
            .map(|s| s.summary(false))
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    /// All of the caller's sessions across repos, oldest first.
    pub fn list_for_user(&self, user_email: &str) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .lock_sessions()
            .values()
            .filter(|s| s.user_email == user_email)
            .map(|s| s.summary(true))
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    // ── internals ──

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.inner
            .sessions
            .lock()
            .expect("session registry mutex poisoned")
    }

    /// Insert a new session in `starting`, enforcing capacity and assigning
    /// a default name. No PTY exists yet.
    fn register(&self, params: CreateSessionParams) -> Result<Arc<Session>, SessionError> {
        let limits = &self.inner.config.limits;
        let mut sessions = self.lock_sessions();

        if sessions.len() >= limits.max_total {
            return Err(SessionError::GlobalLimit(limits.max_total));
        }
        let user_count = sessions
            .values()
            .filter(|s| s.user_email == params.user_email)
            .count();
        if user_count >= limits.max_per_user {
            return Err(SessionError::PerUserLimit(limits.max_per_user));
        }

        let name = params.name.clone().unwrap_or_else(|| {
            default_session_name(sessions.values(), &params.user_email, &params.repo_id)
        });

        let session = Arc::new(Session {
            id: Uuid::new_v4().to_string(),
            user_email: params.user_email,
            repo_id: params.repo_id,
            branch: params.branch,
            workdir: params.workdir,
            created_at: Utc::now(),
            state: Mutex::new(SessionState {
                phase: SessionPhase::Starting,
                name,
                clients: HashMap::new(),
                replay: ReplayBuffer::default(),
                pty: None,
                pty_epoch: 0,
                cols: params.cols.unwrap_or(DEFAULT_COLS),
                rows: params.rows.unwrap_or(DEFAULT_ROWS),
                last_activity: Instant::now(),
                disconnected_at: None,
                reap_epoch: 0,
                exit_code: None,
            }),
        });

        sessions.insert(session.id.clone(), session.clone());
        info!(
            session_id = %session.id,
            user = %session.user_email,
            repo_id = %session.repo_id,
            "Session registered"
        );
        Ok(session)
    }

    fn spawn_session_pty(&self, session: &Arc<Session>) -> Result<(), SessionError> {
        let config = {
            let state = lock_state(session);
            PtySpawnConfig {
                command: self.inner.config.claude_path.clone(),
                cwd: session.workdir.clone(),
                cols: state.cols,
                rows: state.rows,
            }
        };

        let (handle, reader) = PtyHandle::spawn(&config)?;

        let epoch = {
            let mut state = lock_state(session);
            state.pty_epoch += 1;
            state.pty = Some(handle);
            state.phase = SessionPhase::Starting;
            state.pty_epoch
        };

        self.spawn_pty_tasks(session.clone(), reader, epoch);
        Ok(())
    }

    /// Reader + pump tasks for one PTY incarnation. The epoch stamp makes
    /// output and exit handling of replaced PTYs inert.
    fn spawn_pty_tasks(&self, session: Arc<Session>, reader: Box<dyn Read + Send>, epoch: u64) {
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<Vec<u8>>(64);

        tokio::task::spawn_blocking(move || {
            let mut reader = reader;
            let mut buf = [0u8; PTY_READ_BUF];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if chunk_tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let manager = self.clone();
        tokio::spawn(async move {
            manager.mark_running(&session, epoch);
            while let Some(chunk) = chunk_rx.recv().await {
                manager.handle_output(&session, epoch, &chunk);
            }
            manager.handle_pty_eof(&session, epoch).await;
        });
    }

    /// `starting → running` once the spawn has completed and the reader is
    /// draining the master fd.
    fn mark_running(&self, session: &Arc<Session>, epoch: u64) {
        let mut state = lock_state(session);
        if state.pty_epoch != epoch || state.phase != SessionPhase::Starting {
            return;
        }
        state.phase = SessionPhase::Running;
        let status = status_frame(session, &state, None);
        fan_out(&mut state, &status);
        info!(session_id = %session.id, "Session running");
    }

    fn handle_output(&self, session: &Arc<Session>, epoch: u64, chunk: &[u8]) {
        let mut state = lock_state(session);
        if state.pty_epoch != epoch {
            return;
        }
        state.replay.append(chunk);
        state.last_activity = Instant::now();
        let frame = ServerFrame::Output {
            data: String::from_utf8_lossy(chunk).into_owned(),
        };
        fan_out(&mut state, &frame);
    }

    /// PTY reader hit EOF or an I/O error: harvest the exit status, notify
    /// clients, and drop the session from the index.
    async fn handle_pty_eof(&self, session: &Arc<Session>, epoch: u64) {
        let child = {
            let mut state = lock_state(session);
            if state.pty_epoch != epoch {
                return;
            }
            state.pty.as_mut().and_then(PtyHandle::take_child)
        };

        let exit_code = match child {
            Some(mut child) => tokio::task::spawn_blocking(move || {
                child.wait().ok().map(|status| status.exit_code() as i32)
            })
            .await
            .ok()
            .flatten(),
            None => None,
        };

        {
            let mut state = lock_state(session);
            if state.pty_epoch != epoch {
                return;
            }
            state.phase = SessionPhase::Exited;
            state.exit_code = exit_code;
            state.pty = None;
            let message = exit_code.map(|code| format!("assistant exited with code {code}"));
            let status = status_frame(session, &state, message);
            fan_out(&mut state, &status);
            state.clients.clear();
        }

        self.remove_session(&session.id);
        info!(session_id = %session.id, exit_code = ?exit_code, "Session exited");
    }

    /// A registered session whose first spawn failed: mark exited and drop.
    fn fail_session(&self, session: &Arc<Session>) {
        {
            let mut state = lock_state(session);
            state.phase = SessionPhase::Exited;
            let status = status_frame(session, &state, Some("failed to start".to_string()));
            fan_out(&mut state, &status);
            state.clients.clear();
        }
        self.remove_session(&session.id);
    }

    fn terminate_session(&self, session: &Arc<Session>, message: Option<&str>) {
        {
            let mut state = lock_state(session);
            discard_pty(&mut state);
            state.phase = SessionPhase::Exited;
            let status = status_frame(session, &state, message.map(str::to_string));
            fan_out(&mut state, &status);
            state.clients.clear();
        }
        self.remove_session(&session.id);
        info!(session_id = %session.id, "Session terminated");
    }

    /// Reap a session whose last client detached longer than the TTL ago.
    ///
    /// Called from both the per-detach timer (with its arming epoch) and the
    /// sweeper (without); converging here makes double-reap a no-op and a
    /// reattach in the meantime cancels both paths.
    fn reap_if_expired(&self, session_id: &str, armed_epoch: Option<u64>) {
        let Some(session) = self.get(session_id) else {
            return;
        };

        {
            let mut state = lock_state(&session);
            if !state.clients.is_empty() {
                return;
            }
            let Some(disconnected_at) = state.disconnected_at else {
                return;
            };
            if let Some(epoch) = armed_epoch {
                if state.reap_epoch != epoch {
                    return;
                }
            }
            if disconnected_at.elapsed() < self.inner.config.disconnected_ttl {
                return;
            }
            discard_pty(&mut state);
            state.phase = SessionPhase::Exited;
        }

        self.remove_session(&session.id);
        info!(
            session_id = %session.id,
            idle = ?session.idle_for(),
            "Session reaped after disconnect TTL"
        );
    }

    fn remove_session(&self, session_id: &str) {
        self.lock_sessions().remove(session_id);
    }
}

fn lock_state(session: &Session) -> std::sync::MutexGuard<'_, SessionState> {
    session.state.lock().expect("session state mutex poisoned")
}

/// Kill the current PTY and detach its child for an off-thread wait.
///
/// Bumps the epoch so the dying reader's output and exit handling are inert
/// from this point on, even before a replacement PTY is spawned.
fn discard_pty(state: &mut SessionState) {
    state.pty_epoch += 1;
    if let Some(mut pty) = state.pty.take() {
        pty.kill();
        if let Some(mut child) = pty.take_child() {
            tokio::task::spawn_blocking(move || {
                let _ = child.wait();
            });
        }
    }
}

/// Deliver a frame to every client; a failed send detaches that client and
/// leaves the session unaffected. If the last client is dropped this way,
/// the session becomes reap-eligible for the sweeper.
fn fan_out(state: &mut SessionState, frame: &ServerFrame) {
    let mut dead = Vec::new();
    for (client_id, sender) in state.clients.iter() {
        if sender.try_send(frame.clone()).is_err() {
            dead.push(client_id.clone());
        }
    }
    for client_id in dead {
        warn!(client_id = %client_id, "Dropping client with stalled frame queue");
        state.clients.remove(&client_id);
    }

    if state.clients.is_empty()
        && state.disconnected_at.is_none()
        && state.phase != SessionPhase::Exited
    {
        state.disconnected_at = Some(Instant::now());
    }
}

fn status_frame(session: &Session, state: &SessionState, message: Option<String>) -> ServerFrame {
    ServerFrame::Status {
        state: state.phase,
        session_id: Some(session.id.clone()),
        session_name: Some(state.name.clone()),
        branch: session.branch.clone(),
        message,
    }
}

fn replay_frame(state: &SessionState) -> ServerFrame {
    ServerFrame::Replay {
        data: String::from_utf8_lossy(&state.replay.snapshot()).into_owned(),
    }
}

/// `Session <n>` with the smallest positive integer unused by the user's
/// live sessions on the repo.
fn default_session_name<'a>(
    sessions: impl Iterator<Item = &'a Arc<Session>>,
    user_email: &str,
    repo_id: &str,
) -> String {
    let used: Vec<u32> = sessions
        .filter(|s| s.user_email == user_email && s.repo_id == repo_id)
        .filter_map(|s| {
            let state = s.state.lock().expect("session state mutex poisoned");
            state
                .name
                .strip_prefix("Session ")
                .and_then(|n| n.parse::<u32>().ok())
        })
        .collect();

    let mut n = 1;
    while used.contains(&n) {
        n += 1;
    }
    format!("Session {n}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_name_starts_at_one() {
        let sessions: Vec<Arc<Session>> = Vec::new();
        let name = default_session_name(sessions.iter(), "u@x", "r/demo");
        assert_eq!(name, "Session 1");
    }
}
