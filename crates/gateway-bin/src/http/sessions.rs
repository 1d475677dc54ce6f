//! Session HTTP surface.

use crate::app::{ensure_session_workdir, AppState, VerifiedUser};
use crate::http::ApiError;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use gateway_config::AuditEvent;
use serde::Deserialize;
use serde_json::{json, Value};
use session_core::CreateSessionParams;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoQuery {
    repo_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionBody {
    repo_id: String,
    name: Option<String>,
    branch: Option<String>,
}

#[derive(Deserialize)]
pub struct RenameBody {
    name: String,
}

/// `GET /api/sessions?repoId=…`
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<VerifiedUser>,
    Query(query): Query<RepoQuery>,
) -> Result<Json<Value>, ApiError> {
    state.registry.resolve(&query.repo_id)?;
    let tabs = state.sessions.list_for_repo(&user.email, &query.repo_id);
    Ok(Json(json!({ "tabs": tabs })))
}

/// `GET /api/sessions/all`: cross-repo listing for the caller.
pub async fn list_all(
    State(state): State<AppState>,
    Extension(user): Extension<VerifiedUser>,
) -> Result<Json<Value>, ApiError> {
    let tabs = state.sessions.list_for_user(&user.email);
    Ok(Json(json!({ "tabs": tabs })))
}

/// `POST /api/sessions`
pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<VerifiedUser>,
    Json(body): Json<CreateSessionBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let repo_root = state.registry.resolve(&body.repo_id)?;
    let workdir = ensure_session_workdir(
        &state.repo_locks,
        &repo_root,
        &user.email,
        body.branch.as_deref(),
    )
    .await?;

    let session = state.sessions.create(CreateSessionParams {
        user_email: user.email.clone(),
        repo_id: body.repo_id.clone(),
        branch: body.branch.clone(),
        workdir,
        name: body.name,
        cols: None,
        rows: None,
    })?;

    state.audit.record(
        AuditEvent::new(&user.email, "session.create")
            .repo(&body.repo_id)
            .detail(session.id.clone()),
    );

    let summaries = state.sessions.list_for_repo(&user.email, &body.repo_id);
    let summary = summaries
        .into_iter()
        .find(|s| s.id == session.id)
        .map(|s| serde_json::to_value(s).unwrap_or_default())
        .unwrap_or_default();

    Ok((StatusCode::CREATED, Json(summary)))
}

/// `DELETE /api/sessions/:id` with owner check; foreign sessions look absent.
pub async fn remove(
    State(state): State<AppState>,
    Extension(user): Extension<VerifiedUser>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.sessions.terminate_owned(&session_id, &user.email)?;
    state.audit.record(
        AuditEvent::new(&user.email, "session.delete").detail(session_id),
    );
    Ok(StatusCode::NO_CONTENT)
}

/// `PATCH /api/sessions/:id`
pub async fn rename(
    State(state): State<AppState>,
    Extension(user): Extension<VerifiedUser>,
    Path(session_id): Path<String>,
    Json(body): Json<RenameBody>,
) -> Result<Json<Value>, ApiError> {
    let name = body.name.trim();
    if name.is_empty() || name.len() > 120 {
        return Err(ApiError::bad_request("session name must be 1-120 characters"));
    }
    let summary = state.sessions.rename(&session_id, &user.email, name)?;
    Ok(Json(serde_json::to_value(summary).unwrap_or_default()))
}
