//! Shared gateway state.

use crate::app::RepoLocks;
use gateway_config::{AuditSink, Config, SettingsStore};
use identity_gate::IdentityGate;
use repo_registry::RepoRegistry;
use session_core::SessionManager;
use std::sync::Arc;
use task_runner::TaskRunner;

/// Shared application state (thread-safe, cheap to clone).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Repo-id resolution against the configured roots.
    pub registry: Arc<RepoRegistry>,
    /// PTY session registry and lifecycle.
    pub sessions: SessionManager,
    /// Edge-token verification.
    pub gate: Arc<IdentityGate>,
    /// Runtime-mutable allowlist and admin set.
    pub settings: Arc<SettingsStore>,
    /// Append-only audit log.
    pub audit: Arc<AuditSink>,
    /// Whitelisted ad-hoc task runs.
    pub tasks: TaskRunner,
    /// Per-repo locks serializing worktree creation and cleanup.
    pub repo_locks: RepoLocks,
}

/// A request identity that passed the gate.
#[derive(Debug, Clone)]
pub struct VerifiedUser {
    pub email: String,
    pub is_admin: bool,
}
