//! Git HTTP surface: a safe allowlist of read operations plus
//! checkout-with-worktree-creation.

use crate::app::{ensure_session_workdir, existing_access_root, AppState, VerifiedUser};
use crate::http::ApiError;
use axum::extract::{Query, State};
use axum::{Extension, Json};
use gateway_config::AuditEvent;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitQuery {
    repo_id: String,
    /// Selects the user's worktree; absent means the repo root.
    branch: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffQuery {
    repo_id: String,
    branch: Option<String>,
    path: Option<String>,
    max_lines: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogQuery {
    repo_id: String,
    branch: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
    /// Branch name or commit hash to start the walk from.
    rev: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutBody {
    repo_id: String,
    branch: String,
    #[serde(default)]
    create: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeBody {
    repo_id: String,
    branch: String,
}

/// `GET /api/git/status?repoId=…`
pub async fn status(
    State(state): State<AppState>,
    Extension(user): Extension<VerifiedUser>,
    Query(query): Query<GitQuery>,
) -> Result<Json<Value>, ApiError> {
    let repo_root = state.registry.resolve(&query.repo_id)?;
    let root = existing_access_root(&repo_root, &user.email, query.branch.as_deref())?;

    let result =
        tokio::task::spawn_blocking(move || git_surface::status(&root))
            .await
            .map_err(|e| ApiError::internal(format!("git task failed: {e}")))??;
    Ok(Json(serde_json::to_value(result).unwrap_or_default()))
}

/// `GET /api/git/diff?repoId=…&path=…`
pub async fn diff(
    State(state): State<AppState>,
    Extension(user): Extension<VerifiedUser>,
    Query(query): Query<DiffQuery>,
) -> Result<Json<Value>, ApiError> {
    let repo_root = state.registry.resolve(&query.repo_id)?;
    let root = existing_access_root(&repo_root, &user.email, query.branch.as_deref())?;
    if let Some(path) = &query.path {
        path_safety::validate_relative_path(path)?;
    }

    let result = tokio::task::spawn_blocking(move || {
        git_surface::diff(&root, query.path.as_deref(), query.max_lines)
    })
    .await
    .map_err(|e| ApiError::internal(format!("git task failed: {e}")))??;
    Ok(Json(serde_json::to_value(result).unwrap_or_default()))
}

/// `GET /api/git/log?repoId=…&limit=…&offset=…`
pub async fn log(
    State(state): State<AppState>,
    Extension(user): Extension<VerifiedUser>,
    Query(query): Query<LogQuery>,
) -> Result<Json<Value>, ApiError> {
    let repo_root = state.registry.resolve(&query.repo_id)?;
    let root = existing_access_root(&repo_root, &user.email, query.branch.as_deref())?;

    let result = tokio::task::spawn_blocking(move || {
        git_surface::log(&root, query.limit, query.offset, query.rev.as_deref())
    })
    .await
    .map_err(|e| ApiError::internal(format!("git task failed: {e}")))??;
    Ok(Json(serde_json::to_value(result).unwrap_or_default()))
}

/// `GET /api/git/branches?repoId=…`
pub async fn branches(
    State(state): State<AppState>,
    Extension(user): Extension<VerifiedUser>,
    Query(query): Query<GitQuery>,
) -> Result<Json<Value>, ApiError> {
    let repo_root = state.registry.resolve(&query.repo_id)?;
    let root = existing_access_root(&repo_root, &user.email, query.branch.as_deref())?;

    let result = tokio::task::spawn_blocking(move || git_surface::branches(&root))
        .await
        .map_err(|e| ApiError::internal(format!("git task failed: {e}")))??;
    Ok(Json(serde_json::to_value(result).unwrap_or_default()))
}

/// `POST /api/git/checkout`: create or locate the user's worktree.
pub async fn checkout(
    State(state): State<AppState>,
    Extension(user): Extension<VerifiedUser>,
    Json(body): Json<CheckoutBody>,
) -> Result<Json<Value>, ApiError> {
    let repo_root = state.registry.resolve(&body.repo_id)?;

    let worktree_path = if body.create {
        let guard = state.repo_locks.lock(&repo_root).await;
        let root = repo_root.clone();
        let email = user.email.clone();
        let branch = body.branch.clone();
        let created = tokio::task::spawn_blocking(move || {
            worktree_ops::ensure_worktree_from_new_branch(&root, &email, &branch)
        })
        .await
        .map_err(|e| ApiError::internal(format!("worktree task failed: {e}")))??;
        drop(guard);
        created
    } else {
        ensure_session_workdir(&state.repo_locks, &repo_root, &user.email, Some(&body.branch))
            .await?
    };

    state.audit.record(
        AuditEvent::new(&user.email, "git.checkout")
            .repo(&body.repo_id)
            .detail(format!("branch={} create={}", body.branch, body.create)),
    );

    Ok(Json(json!({
        "worktreePath": worktree_path.to_string_lossy(),
        "branch": body.branch,
    })))
}

/// `GET /api/git/worktrees?repoId=…` lists the caller's worktrees on a repo.
pub async fn list_worktrees(
    State(state): State<AppState>,
    Extension(user): Extension<VerifiedUser>,
    Query(query): Query<GitQuery>,
) -> Result<Json<Value>, ApiError> {
    let repo_root = state.registry.resolve(&query.repo_id)?;

    let worktrees = worktree_ops::list_for_user(&repo_root, &user.email)?;
    let listing: Vec<Value> = worktrees
        .into_iter()
        .map(|w| {
            json!({
                "branch": w.branch,
                "path": w.path.to_string_lossy(),
            })
        })
        .collect();
    Ok(Json(json!({ "worktrees": listing })))
}

/// `DELETE /api/git/worktree`: explicit worktree cleanup (worktrees are
/// retained across session reaps, this is the only removal surface).
pub async fn remove_worktree(
    State(state): State<AppState>,
    Extension(user): Extension<VerifiedUser>,
    Json(body): Json<WorktreeBody>,
) -> Result<Json<Value>, ApiError> {
    let repo_root = state.registry.resolve(&body.repo_id)?;
    let worktree = existing_access_root(&repo_root, &user.email, Some(&body.branch))?;

    let guard = state.repo_locks.lock(&repo_root).await;
    tokio::task::spawn_blocking(move || worktree_ops::cleanup(&repo_root, &worktree))
        .await
        .map_err(|e| ApiError::internal(format!("worktree task failed: {e}")))?;
    drop(guard);

    state.audit.record(
        AuditEvent::new(&user.email, "git.worktree_cleanup")
            .repo(&body.repo_id)
            .detail(body.branch.clone()),
    );

    Ok(Json(json!({ "ok": true })))
}
