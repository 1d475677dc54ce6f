//! Per-user git worktree management.
//!
//! Sessions isolate each user on a `(repo, branch)` pair through a dedicated
//! git worktree checked out on a user-namespaced branch. This crate owns the
//! naming scheme, branch validation, creation, and cleanup of those
//! worktrees; all git access goes through libgit2.

mod branch;
mod error;
mod worktree;

pub use branch::{
    short_user_id, user_branch_name, validate_branch_name, worktree_name, USER_BRANCH_NAMESPACE,
};
pub use error::WorktreeError;
pub use worktree::{
    cleanup, ensure_worktree_from_existing, ensure_worktree_from_new_branch, list_for_user,
    WorktreeInfo, WORKTREES_DIR,
};
