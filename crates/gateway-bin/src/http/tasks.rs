//! Task-runner HTTP surface.

use crate::app::{existing_access_root, AppState, VerifiedUser};
use crate::http::ApiError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use gateway_config::AuditEvent;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTaskBody {
    repo_id: String,
    task: String,
    branch: Option<String>,
}

/// `GET /api/tasks`: whitelist listing.
pub async fn list(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "enabled": state.tasks.enabled(),
        "tasks": task_runner::task_names(),
    }))
}

/// `POST /api/tasks`
pub async fn start(
    State(state): State<AppState>,
    Extension(user): Extension<VerifiedUser>,
    Json(body): Json<StartTaskBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let repo_root = state.registry.resolve(&body.repo_id)?;
    let workdir = existing_access_root(&repo_root, &user.email, body.branch.as_deref())?;

    let run_id = state.tasks.start(&body.task, workdir)?;

    state.audit.record(
        AuditEvent::new(&user.email, "task.start")
            .repo(&body.repo_id)
            .detail(format!("task={} run={run_id}", body.task)),
    );

    Ok((StatusCode::CREATED, Json(json!({ "runId": run_id }))))
}

/// `GET /api/tasks/:runId`
pub async fn snapshot(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let snapshot = state.tasks.snapshot(&run_id)?;
    Ok(Json(serde_json::to_value(snapshot).unwrap_or_default()))
}
