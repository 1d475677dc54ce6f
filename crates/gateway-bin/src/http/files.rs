//! File and tree HTTP surface.

use crate::app::{existing_access_root, AppState, VerifiedUser};
use crate::http::ApiError;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use gateway_config::AuditEvent;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeQuery {
    repo_id: String,
    #[serde(default)]
    path: String,
    branch: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileQuery {
    repo_id: String,
    path: String,
    branch: Option<String>,
}

#[derive(Deserialize)]
pub struct WriteBody {
    content: String,
}

/// `GET /api/tree?repoId=…&path=…`
pub async fn tree(
    State(state): State<AppState>,
    Extension(user): Extension<VerifiedUser>,
    Query(query): Query<TreeQuery>,
) -> Result<Json<Value>, ApiError> {
    let repo_root = state.registry.resolve(&query.repo_id)?;
    let root = existing_access_root(&repo_root, &user.email, query.branch.as_deref())?;

    let entries = file_surface::list_tree(&root, &query.path)?;
    Ok(Json(json!({
        "path": query.path,
        "entries": entries,
    })))
}

/// `GET /api/file?repoId=…&path=…`
pub async fn read(
    State(state): State<AppState>,
    Extension(user): Extension<VerifiedUser>,
    Query(query): Query<FileQuery>,
) -> Result<Json<Value>, ApiError> {
    let repo_root = state.registry.resolve(&query.repo_id)?;
    let root = existing_access_root(&repo_root, &user.email, query.branch.as_deref())?;

    let content = file_surface::read_file(&root, &query.path, state.config.max_file_size_bytes)?;
    Ok(Json(json!({
        "path": query.path,
        "content": content,
    })))
}

/// `PUT /api/file?repoId=…&path=…`
pub async fn write(
    State(state): State<AppState>,
    Extension(user): Extension<VerifiedUser>,
    Query(query): Query<FileQuery>,
    Json(body): Json<WriteBody>,
) -> Result<Json<Value>, ApiError> {
    let repo_root = state.registry.resolve(&query.repo_id)?;
    let root = existing_access_root(&repo_root, &user.email, query.branch.as_deref())?;

    file_surface::write_file(
        &root,
        &query.path,
        &body.content,
        state.config.max_file_size_bytes,
    )?;

    state.audit.record(
        AuditEvent::new(&user.email, "file.write")
            .repo(&query.repo_id)
            .detail(query.path.clone()),
    );
    Ok(Json(json!({ "path": query.path, "ok": true })))
}

/// `DELETE /api/file?repoId=…&path=…`
pub async fn remove(
    State(state): State<AppState>,
    Extension(user): Extension<VerifiedUser>,
    Query(query): Query<FileQuery>,
) -> Result<StatusCode, ApiError> {
    let repo_root = state.registry.resolve(&query.repo_id)?;
    let root = existing_access_root(&repo_root, &user.email, query.branch.as_deref())?;

    file_surface::delete_file(&root, &query.path)?;

    state.audit.record(
        AuditEvent::new(&user.email, "file.delete")
            .repo(&query.repo_id)
            .detail(query.path.clone()),
    );
    Ok(StatusCode::NO_CONTENT)
}
