//! HTTP router assembly.

mod auth;
mod error;
mod files;
mod git;
mod repos;
mod search;
mod sessions;
mod settings;
mod tasks;

pub use auth::identify_request;
pub use error::ApiError;

use crate::app::AppState;
use axum::routing::{delete, get, post};
use axum::{middleware, Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

/// The full gateway router: authenticated `/api` surface, the WS
/// endpoints, and an open liveness probe.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/repos", get(repos::list))
        .route("/api/sessions", get(sessions::list).post(sessions::create))
        .route("/api/sessions/all", get(sessions::list_all))
        .route(
            "/api/sessions/:id",
            delete(sessions::remove).patch(sessions::rename),
        )
        .route("/api/tree", get(files::tree))
        .route(
            "/api/file",
            get(files::read).put(files::write).delete(files::remove),
        )
        .route("/api/search", post(search::search))
        .route("/api/git/status", get(git::status))
        .route("/api/git/diff", get(git::diff))
        .route("/api/git/log", get(git::log))
        .route("/api/git/branches", get(git::branches))
        .route("/api/git/checkout", post(git::checkout))
        .route("/api/git/worktrees", get(git::list_worktrees))
        .route("/api/git/worktree", delete(git::remove_worktree))
        .route("/api/tasks", get(tasks::list).post(tasks::start))
        .route("/api/tasks/:run_id", get(tasks::snapshot))
        .route("/api/settings", get(settings::get).put(settings::update))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::authenticate,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws/claude", get(crate::ws::terminal::ws_terminal))
        .route("/ws/tasks", get(crate::ws::tasks::ws_tasks))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
