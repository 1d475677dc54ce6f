//! Working-directory resolution for sessions and the file/git surface.
//!
//! A session (or file-API call) on a branch operates inside the user's
//! worktree; without a branch it operates on the repo root. The worktree is
//! created lazily on the session path and required to already exist on the
//! access path.

use crate::app::RepoLocks;
use crate::http::ApiError;
use std::path::{Path, PathBuf};
use worktree_ops::WorktreeError;

/// Resolve the working directory for a new session, creating the user's
/// worktree if the branch needs one. Runs the git work off the async
/// runtime under the repo's mutation lock; worktree creation is the one
/// long operation on the attach path.
pub async fn ensure_session_workdir(
    locks: &RepoLocks,
    repo_root: &Path,
    user_email: &str,
    branch: Option<&str>,
) -> Result<PathBuf, ApiError> {
    let Some(branch) = branch else {
        return Ok(repo_root.to_path_buf());
    };

    let guard = locks.lock(repo_root).await;

    let repo_root = repo_root.to_path_buf();
    let user = user_email.to_string();
    let branch = branch.to_string();

    let result = tokio::task::spawn_blocking(move || {
        worktree_ops::ensure_worktree_from_existing(&repo_root, &user, &branch)
    })
    .await
    .map_err(|e| ApiError::internal(format!("worktree task failed: {e}")))?
    .map_err(ApiError::from);
    drop(guard);

    result
}

/// Resolve the root for file/search/git access: the user's existing
/// worktree when a branch is named, the repo root otherwise. Never creates
/// anything.
pub fn existing_access_root(
    repo_root: &Path,
    user_email: &str,
    branch: Option<&str>,
) -> Result<PathBuf, ApiError> {
    let Some(branch) = branch else {
        return Ok(repo_root.to_path_buf());
    };

    worktree_ops::validate_branch_name(branch)?;
    let short = worktree_ops::short_user_id(user_email)?;
    let candidate = repo_root
        .join(worktree_ops::WORKTREES_DIR)
        .join(&short)
        .join(branch);

    if !candidate.is_dir() {
        return Err(ApiError::not_found(format!(
            "no worktree for branch {branch}"
        )));
    }

    path_safety::ensure_contained(repo_root, &candidate)
        .map_err(|_| ApiError::from(WorktreeError::Containment))
}
