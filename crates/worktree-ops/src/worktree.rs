//! Worktree creation, lookup, and cleanup.
//!
//! Worktrees live at `<repoRoot>/.worktrees/<shortUserId>/<baseBranch>` and
//! always check out the user-namespaced branch
//! `logpose/<shortUserId>/<baseBranch>`, so two users on the same base
//! branch never share a checkout or a ref.

use git2::{BranchType, Repository, WorktreeAddOptions, WorktreePruneOptions};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::branch::{short_user_id, user_branch_name, validate_branch_name, worktree_name};
use crate::error::WorktreeError;

/// Directory under the repo root that holds all per-user worktrees.
pub const WORKTREES_DIR: &str = ".worktrees";

/// A user's worktree as discovered on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    /// The base branch the worktree was created for.
    pub branch: String,
    /// Absolute path of the worktree directory.
    pub path: PathBuf,
}

/// Ensure a worktree for `(user, base_branch)` exists, creating it from an
/// existing base branch if needed.
///
/// If the worktree directory already exists it is returned unchanged. The
/// base branch must exist locally or as `origin/<base_branch>`; otherwise
/// the call fails with [`WorktreeError::BranchMissing`]. The user branch is
/// created from the base when missing (tracking the remote if only a remote
/// ref was found) and checked out in the new worktree.
pub fn ensure_worktree_from_existing(
    repo_root: &Path,
    user_email: &str,
    base_branch: &str,
) -> Result<PathBuf, WorktreeError> {
    validate_branch_name(base_branch)?;
    let short = short_user_id(user_email)?;

    if let Some(existing) = existing_worktree_path(repo_root, &short, base_branch)? {
        debug!(path = %existing.display(), "Worktree already exists");
        return Ok(existing);
    }

    let repo = open_repo(repo_root)?;

    // Resolve the base: local branch first, then the origin remote ref.
    let (base_commit_id, remote_upstream) =
        match repo.find_branch(base_branch, BranchType::Local) {
            Ok(branch) => {
                let id = branch
                    .get()
                    .peel_to_commit()
                    .map_err(WorktreeError::from)?
                    .id();
                (id, None)
            }
            Err(_) => {
                let remote_name = format!("origin/{base_branch}");
                let branch = repo
                    .find_branch(&remote_name, BranchType::Remote)
                    .map_err(|_| WorktreeError::BranchMissing(base_branch.to_string()))?;
                let id = branch
                    .get()
                    .peel_to_commit()
                    .map_err(WorktreeError::from)?
                    .id();
                (id, Some(remote_name))
            }
        };

    let user_branch = user_branch_name(&short, base_branch);
    let branch_ref_name = match repo.find_branch(&user_branch, BranchType::Local) {
        Ok(existing) => reference_name(existing)?,
        Err(_) => {
            let commit = repo.find_commit(base_commit_id)?;
            let mut created = repo.branch(&user_branch, &commit, false)?;
            if let Some(upstream) = &remote_upstream {
                if let Err(err) = created.set_upstream(Some(upstream)) {
                    warn!(branch = %user_branch, error = %err, "Failed to set upstream");
                }
            }
            reference_name(created)?
        }
    };

    create_worktree_checkout(&repo, repo_root, &short, base_branch, &branch_ref_name)
}

/// Ensure a worktree whose user branch is created fresh from current HEAD.
///
/// Fails with [`WorktreeError::BranchExists`] if the user's namespaced
/// branch already exists.
pub fn ensure_worktree_from_new_branch(
    repo_root: &Path,
    user_email: &str,
    new_base_branch: &str,
) -> Result<PathBuf, WorktreeError> {
    validate_branch_name(new_base_branch)?;
    let short = short_user_id(user_email)?;

    let user_branch = user_branch_name(&short, new_base_branch);
    let repo = open_repo(repo_root)?;

    if repo.find_branch(&user_branch, BranchType::Local).is_ok() {
        return Err(WorktreeError::BranchExists(user_branch));
    }

    let head_commit = repo
        .head()
        .and_then(|head| head.peel_to_commit())
        .map_err(WorktreeError::from)?;
    let created = repo.branch(&user_branch, &head_commit, false)?;
    let branch_ref_name = reference_name(created)?;

    create_worktree_checkout(&repo, repo_root, &short, new_base_branch, &branch_ref_name)
}

/// Remove a worktree: prune the git registration and delete the directory.
///
/// Never returns an error; cleanup runs during session termination and a
/// failure there must not take the session teardown down with it.
pub fn cleanup(repo_root: &Path, worktree_path: &Path) {
    match Repository::open(repo_root) {
        Ok(repo) => {
            if let Some(name) = registration_name(repo_root, worktree_path) {
                if let Ok(worktree) = repo.find_worktree(&name) {
                    let result = worktree.prune(Some(
                        WorktreePruneOptions::new().valid(true).working_tree(true),
                    ));
                    if let Err(err) = result {
                        warn!(worktree = %name, error = %err, "Failed to prune worktree");
                    }
                }
            }
        }
        Err(err) => {
            warn!(repo = %repo_root.display(), error = %err, "Failed to open repo for cleanup");
        }
    }

    if worktree_path.exists() {
        if let Err(err) = fs::remove_dir_all(worktree_path) {
            warn!(path = %worktree_path.display(), error = %err, "Failed to remove worktree dir");
            return;
        }
    }

    // Trim now-empty parents up to the .worktrees directory.
    let mut parent = worktree_path.parent();
    while let Some(dir) = parent {
        if dir
            .file_name()
            .map(|n| n == WORKTREES_DIR)
            .unwrap_or(true)
        {
            let _ = fs::remove_dir(dir);
            break;
        }
        if fs::remove_dir(dir).is_err() {
            break;
        }
        parent = dir.parent();
    }

    info!(path = %worktree_path.display(), "Worktree cleaned up");
}

/// List the user's worktrees by walking `<repoRoot>/.worktrees/<shortUserId>/`.
pub fn list_for_user(repo_root: &Path, user_email: &str) -> Result<Vec<WorktreeInfo>, WorktreeError> {
    let short = short_user_id(user_email)?;
    let user_dir = repo_root.join(WORKTREES_DIR).join(&short);

    let mut found = Vec::new();
    if user_dir.is_dir() {
        collect_worktrees(&user_dir, &user_dir, &mut found)?;
    }
    found.sort_by(|a, b| a.branch.cmp(&b.branch));
    Ok(found)
}

fn collect_worktrees(
    base: &Path,
    dir: &Path,
    found: &mut Vec<WorktreeInfo>,
) -> Result<(), WorktreeError> {
    // A linked worktree root carries a `.git` file pointing at the main repo.
    if dir.join(".git").exists() {
        let branch = dir
            .strip_prefix(base)
            .unwrap_or(dir)
            .to_string_lossy()
            .replace('\\', "/");
        found.push(WorktreeInfo {
            branch,
            path: dir.to_path_buf(),
        });
        return Ok(());
    }

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            collect_worktrees(base, &entry.path(), found)?;
        }
    }
    Ok(())
}

fn open_repo(repo_root: &Path) -> Result<Repository, WorktreeError> {
    Repository::open(repo_root).map_err(|e| WorktreeError::RepositoryOpen(e.message().to_string()))
}

fn existing_worktree_path(
    repo_root: &Path,
    short: &str,
    base_branch: &str,
) -> Result<Option<PathBuf>, WorktreeError> {
    let relative = format!("{WORKTREES_DIR}/{short}/{base_branch}");
    path_safety::validate_relative_path(&relative).map_err(|_| WorktreeError::Containment)?;

    let candidate = repo_root.join(&relative);
    if !candidate.is_dir() {
        return Ok(None);
    }

    let contained = path_safety::ensure_contained(repo_root, &candidate)
        .map_err(|_| WorktreeError::Containment)?;
    Ok(Some(contained))
}

fn create_worktree_checkout(
    repo: &Repository,
    repo_root: &Path,
    short: &str,
    base_branch: &str,
    branch_ref_name: &str,
) -> Result<PathBuf, WorktreeError> {
    let relative = format!("{WORKTREES_DIR}/{short}/{base_branch}");
    path_safety::validate_relative_path(&relative).map_err(|_| WorktreeError::Containment)?;
    let worktree_path = repo_root.join(&relative);

    if let Some(parent) = worktree_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let name = worktree_name(short, base_branch);

    // A stale registration (directory removed out-of-band) blocks re-adding
    // under the same name; prune it first.
    if let Ok(stale) = repo.find_worktree(&name) {
        if !stale.path().exists() {
            let _ = stale.prune(Some(
                WorktreePruneOptions::new().valid(true).working_tree(true),
            ));
        }
    }

    let reference = repo.find_reference(branch_ref_name)?;
    let mut options = WorktreeAddOptions::new();
    options.reference(Some(&reference));

    if let Err(err) = repo.worktree(&name, &worktree_path, Some(&options)) {
        let _ = fs::remove_dir_all(&worktree_path);
        return Err(WorktreeError::WorktreeCreate(err.message().to_string()));
    }

    let contained = path_safety::ensure_contained(repo_root, &worktree_path)
        .map_err(|_| WorktreeError::Containment)?;

    info!(
        path = %contained.display(),
        branch = %branch_ref_name,
        "Worktree created"
    );
    Ok(contained)
}

fn reference_name(branch: git2::Branch<'_>) -> Result<String, WorktreeError> {
    branch
        .into_reference()
        .name()
        .map(String::from)
        .ok_or_else(|| WorktreeError::Git("branch reference has no name".to_string()))
}

fn registration_name(repo_root: &Path, worktree_path: &Path) -> Option<String> {
    let relative = worktree_path
        .strip_prefix(repo_root.join(WORKTREES_DIR))
        .ok()?;
    let flat = relative.to_string_lossy().replace(['/', '\\'], "-");
    if flat.is_empty() {
        None
    } else {
        Some(flat)
    }
}
