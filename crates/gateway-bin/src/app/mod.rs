//! Gateway assembly and startup.

mod repo_locks;
mod state;
mod workdir;

pub use repo_locks::RepoLocks;
pub use state::{AppState, VerifiedUser};
pub use workdir::{ensure_session_workdir, existing_access_root};

use gateway_config::{AuditSink, Config, SettingsStore};
use identity_gate::{IdentityConfig, IdentityGate};
use repo_registry::RepoRegistry;
use session_core::{SessionLimits, SessionManager, SessionManagerConfig};
use std::sync::Arc;
use task_runner::TaskRunner;
use tracing::info;

/// Build the shared state and serve until shutdown.
///
/// Initialization order: settings, audit sink, session manager, HTTP
/// server. Teardown happens in reverse as the server drains.
pub async fn run_gateway(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);

    let settings = Arc::new(SettingsStore::load_or_seed(
        config.settings_path(),
        &config.allowlist_emails,
        &config.admin_emails,
    )?);

    let audit = Arc::new(AuditSink::new(config.audit_dir()));

    let sessions = SessionManager::new(SessionManagerConfig {
        claude_path: config.claude_path.clone(),
        disconnected_ttl: config.disconnected_ttl(),
        limits: SessionLimits {
            max_per_user: config.max_sessions_per_user,
            max_total: config.max_total_sessions,
        },
    });
    sessions.spawn_sweeper();

    let gate = Arc::new(IdentityGate::new(IdentityConfig {
        team_domain: config.cf_access_team_domain.clone(),
        audience: config.cf_access_aud.clone(),
        dev_mode: !config.environment.is_production(),
    }));

    let state = AppState {
        registry: Arc::new(RepoRegistry::new(config.repo_roots.clone())),
        sessions,
        gate,
        settings,
        audit,
        tasks: TaskRunner::new(config.tasks_enabled),
        repo_locks: RepoLocks::new(),
        config: config.clone(),
    };

    let app = crate::http::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    info!(addr = %config.bind_addr(), "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
