//! Error types for worktree operations.

use thiserror::Error;

/// Errors that can occur while creating or cleaning per-user worktrees.
#[derive(Debug, Error)]
pub enum WorktreeError {
    /// The branch name failed validation.
    #[error("invalid branch name: {0}")]
    InvalidBranchName(String),

    /// The requested base branch exists neither locally nor on origin.
    #[error("branch not found: {0}")]
    BranchMissing(String),

    /// The user's namespaced branch already exists.
    #[error("branch already exists: {0}")]
    BranchExists(String),

    /// The email yields an empty filesystem identity.
    #[error("invalid user identity: {0}")]
    InvalidUser(String),

    /// Failed to open the repository.
    #[error("failed to open repository: {0}")]
    RepositoryOpen(String),

    /// Failed to create the worktree.
    #[error("failed to create worktree: {0}")]
    WorktreeCreate(String),

    /// The computed worktree path does not resolve under the repo root.
    #[error("worktree path escapes repository root")]
    Containment,

    /// Any other libgit2 failure.
    #[error("git error: {0}")]
    Git(String),

    /// Filesystem operation failed.
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<git2::Error> for WorktreeError {
    fn from(err: git2::Error) -> Self {
        WorktreeError::Git(err.message().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_name_the_subject() {
        let cases: Vec<(WorktreeError, &str)> = vec![
            (
                WorktreeError::InvalidBranchName("a..b".into()),
                "invalid branch name: a..b",
            ),
            (
                WorktreeError::BranchMissing("release".into()),
                "branch not found: release",
            ),
            (
                WorktreeError::BranchExists("logpose/u/main".into()),
                "branch already exists: logpose/u/main",
            ),
            (
                WorktreeError::RepositoryOpen("not a repo".into()),
                "failed to open repository: not a repo",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }
}
