//! Git status, diff, log, and branch listing for a repo or worktree.
//!
//! Operations are pure functions over a repository path; no state is kept
//! between calls. Everything is parameterized per-arg through libgit2;
//! client input never reaches a shell.

use git2::{BranchType, DiffOptions, Repository, Sort, StatusOptions};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Cap on diff lines returned in one response.
pub const MAX_DIFF_LINES: usize = 2000;
/// Cap on commits returned by a single log call.
pub const MAX_LOG_LIMIT: usize = 200;

/// Errors from git-surface operations.
#[derive(Debug, Error)]
pub enum GitSurfaceError {
    /// The path is not a git repository.
    #[error("not a git repository: {0}")]
    NotARepository(String),

    /// Branch or commit not found.
    #[error("revision not found: {0}")]
    RevisionNotFound(String),

    /// A commit hash failed validation.
    #[error("invalid commit hash: {0}")]
    InvalidCommitHash(String),

    /// Any other libgit2 failure.
    #[error("git error: {0}")]
    Git(String),
}

impl From<git2::Error> for GitSurfaceError {
    fn from(err: git2::Error) -> Self {
        GitSurfaceError::Git(err.message().to_string())
    }
}

/// File status relative to the index or working tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Modified,
    Added,
    Deleted,
    Renamed,
    Typechange,
    Untracked,
    Conflicted,
}

/// One changed file in a status listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusFile {
    pub path: String,
    pub status: FileStatus,
    pub staged: bool,
}

/// Result of the status operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResult {
    pub files: Vec<StatusFile>,
    /// Current branch, `None` on a detached HEAD.
    pub branch: Option<String>,
    pub is_clean: bool,
}

/// Unified diff output plus counters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResult {
    pub diff: String,
    pub is_truncated: bool,
    pub additions: u32,
    pub deletions: u32,
}

/// One commit in a log listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitEntry {
    pub oid: String,
    pub short_oid: String,
    pub summary: String,
    pub author_name: String,
    pub author_email: String,
    pub author_time: i64,
}

/// Result of the log operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogResult {
    pub commits: Vec<CommitEntry>,
    pub has_more: bool,
}

/// One branch in a branch listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchEntry {
    pub name: String,
    pub is_current: bool,
    pub is_remote: bool,
}

/// Result of the branch listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchesResult {
    pub local: Vec<BranchEntry>,
    pub remote: Vec<BranchEntry>,
    pub current: Option<String>,
}

/// Validate a client-supplied commit hash before it reaches libgit2.
pub fn validate_commit_hash(hash: &str) -> Result<(), GitSurfaceError> {
    let valid = (7..=40).contains(&hash.len())
        && hash
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
    if valid {
        Ok(())
    } else {
        Err(GitSurfaceError::InvalidCommitHash(hash.to_string()))
    }
}

fn open(repo_path: &Path) -> Result<Repository, GitSurfaceError> {
    Repository::open(repo_path)
        .map_err(|e| GitSurfaceError::NotARepository(e.message().to_string()))
}

fn resolve_start(repo: &Repository, start: &str) -> Result<git2::Oid, GitSurfaceError> {
    if let Ok(branch) = repo
        .find_branch(start, BranchType::Local)
        .or_else(|_| repo.find_branch(start, BranchType::Remote))
    {
        return branch
            .get()
            .target()
            .ok_or_else(|| GitSurfaceError::RevisionNotFound(start.to_string()));
    }

    validate_commit_hash(start)?;
    repo.revparse_single(start)
        .and_then(|obj| obj.peel_to_commit())
        .map(|commit| commit.id())
        .map_err(|_| GitSurfaceError::RevisionNotFound(start.to_string()))
}

/// Status of the working tree and index.
pub fn status(repo_path: &Path) -> Result<StatusResult, GitSurfaceError> {
    let repo = open(repo_path)?;

    let branch = repo
        .head()
        .ok()
        .and_then(|head| head.shorthand().map(String::from));

    let mut status_opts = StatusOptions::new();
    status_opts
        .include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false)
        .include_unmodified(false);

    let statuses = repo.statuses(Some(&mut status_opts))?;

    let mut files = Vec::new();
    for entry in statuses.iter() {
        let path = entry.path().unwrap_or("").to_string();
        let flags = entry.status();

        let index_status = if flags.is_index_new() {
            Some(FileStatus::Added)
        } else if flags.is_index_modified() {
            Some(FileStatus::Modified)
        } else if flags.is_index_deleted() {
            Some(FileStatus::Deleted)
        } else if flags.is_index_renamed() {
            Some(FileStatus::Renamed)
        } else if flags.is_index_typechange() {
            Some(FileStatus::Typechange)
        } else {
            None
        };

        let wt_status = if flags.is_wt_new() {
            Some(FileStatus::Untracked)
        } else if flags.is_wt_modified() {
            Some(FileStatus::Modified)
        } else if flags.is_wt_deleted() {
            Some(FileStatus::Deleted)
        } else if flags.is_wt_renamed() {
            Some(FileStatus::Renamed)
        } else if flags.is_wt_typechange() {
            Some(FileStatus::Typechange)
        } else {
            None
        };

        if let Some(file_status) = index_status {
            files.push(StatusFile {
                path: path.clone(),
                status: file_status,
                staged: true,
            });
        }
        if let Some(file_status) = wt_status {
            files.push(StatusFile {
                path: path.clone(),
                status: file_status,
                staged: false,
            });
        }
        if index_status.is_none() && wt_status.is_none() && flags.is_conflicted() {
            files.push(StatusFile {
                path,
                status: FileStatus::Conflicted,
                staged: false,
            });
        }
    }

    let is_clean = files.is_empty();
    Ok(StatusResult {
        files,
        branch,
        is_clean,
    })
}

/// Unified diff of the working tree, optionally scoped to one path.
///
/// Falls back to the staged diff when the working tree shows no change for
/// the pathspec.
pub fn diff(
    repo_path: &Path,
    file_path: Option<&str>,
    max_lines: Option<usize>,
) -> Result<DiffResult, GitSurfaceError> {
    let repo = open(repo_path)?;
    let max_lines = max_lines.unwrap_or(MAX_DIFF_LINES).min(MAX_DIFF_LINES);

    let mut diff_opts = DiffOptions::new();
    diff_opts.context_lines(3);
    if let Some(path) = file_path {
        diff_opts.pathspec(path);
    }

    let workdir_diff = repo.diff_index_to_workdir(None, Some(&mut diff_opts))?;
    let diff = if workdir_diff.deltas().count() == 0 {
        let head_tree = repo.head().ok().and_then(|head| head.peel_to_tree().ok());
        repo.diff_tree_to_index(head_tree.as_ref(), None, Some(&mut diff_opts))?
    } else {
        workdir_diff
    };

    if diff.deltas().any(|d| d.flags().is_binary()) {
        return Ok(DiffResult {
            diff: "(binary file)".to_string(),
            is_truncated: false,
            additions: 0,
            deletions: 0,
        });
    }

    let mut lines = Vec::new();
    let mut additions = 0u32;
    let mut deletions = 0u32;
    let mut is_truncated = false;

    diff.print(git2::DiffFormat::Patch, |_delta, _hunk, line| {
        if lines.len() >= max_lines {
            is_truncated = true;
            return false;
        }
        let content = std::str::from_utf8(line.content()).unwrap_or("");
        match line.origin() {
            '+' => {
                additions += 1;
                lines.push(format!("+{}", content.trim_end()));
            }
            '-' => {
                deletions += 1;
                lines.push(format!("-{}", content.trim_end()));
            }
            ' ' => lines.push(format!(" {}", content.trim_end())),
            _ => lines.push(content.trim_end().to_string()),
        }
        true
    })?;

    Ok(DiffResult {
        diff: lines.join("\n"),
        is_truncated,
        additions,
        deletions,
    })
}

/// Commit history, capped and paginated.
///
/// `start` may name a branch (local or remote) or a commit hash; hashes are
/// validated before they reach libgit2. Absent, the walk starts at HEAD.
pub fn log(
    repo_path: &Path,
    limit: Option<usize>,
    offset: Option<usize>,
    start: Option<&str>,
) -> Result<LogResult, GitSurfaceError> {
    let repo = open(repo_path)?;
    let limit = limit.unwrap_or(50).min(MAX_LOG_LIMIT);
    let offset = offset.unwrap_or(0);

    let start_oid = if let Some(start) = start {
        resolve_start(&repo, start)?
    } else {
        repo.head()?
            .target()
            .ok_or_else(|| GitSurfaceError::RevisionNotFound("HEAD".to_string()))?
    };

    let mut revwalk = repo.revwalk()?;
    revwalk.push(start_oid)?;
    revwalk.set_sorting(Sort::TIME | Sort::TOPOLOGICAL)?;

    let mut commits = Vec::new();
    let mut skipped = 0;
    let mut has_more = false;

    for oid_result in revwalk {
        let Ok(oid) = oid_result else { continue };

        if skipped < offset {
            skipped += 1;
            continue;
        }
        if commits.len() >= limit {
            has_more = true;
            break;
        }

        let Ok(commit) = repo.find_commit(oid) else {
            continue;
        };
        let author = commit.author();
        let oid_str = oid.to_string();

        commits.push(CommitEntry {
            short_oid: oid_str[..7.min(oid_str.len())].to_string(),
            oid: oid_str,
            summary: commit.summary().unwrap_or("").to_string(),
            author_name: author.name().unwrap_or("Unknown").to_string(),
            author_email: author.email().unwrap_or("").to_string(),
            author_time: author.when().seconds(),
        });
    }

    Ok(LogResult { commits, has_more })
}

/// Local and remote branches, current branch first then alphabetical.
pub fn branches(repo_path: &Path) -> Result<BranchesResult, GitSurfaceError> {
    let repo = open(repo_path)?;

    let current = repo.head().ok().and_then(|head| {
        if head.is_branch() {
            head.shorthand().map(String::from)
        } else {
            None
        }
    });

    let mut local = Vec::new();
    let mut remote = Vec::new();

    for branch_result in repo.branches(None)? {
        let Ok((branch, branch_type)) = branch_result else {
            continue;
        };
        let Ok(Some(name)) = branch.name() else {
            continue;
        };
        let name = name.to_string();
        let is_remote = branch_type == BranchType::Remote;
        let entry = BranchEntry {
            is_current: current.as_deref() == Some(&name),
            is_remote,
            name,
        };
        if is_remote {
            remote.push(entry);
        } else {
            local.push(entry);
        }
    }

    local.sort_by(|a, b| match (a.is_current, b.is_current) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => a.name.cmp(&b.name),
    });
    remote.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(BranchesResult {
        local,
        remote,
        current,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_hash_validation() {
        assert!(validate_commit_hash("abc1234").is_ok());
        assert!(validate_commit_hash(&"a".repeat(40)).is_ok());

        assert!(validate_commit_hash("abc123").is_err()); // too short
        assert!(validate_commit_hash(&"a".repeat(41)).is_err()); // too long
        assert!(validate_commit_hash("ABC1234").is_err()); // uppercase
        assert!(validate_commit_hash("xyz1234").is_err()); // non-hex
        assert!(validate_commit_hash("abc123;").is_err()); // punctuation
    }

    #[test]
    fn status_on_non_repo_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            status(temp.path()),
            Err(GitSurfaceError::NotARepository(_))
        ));
    }
}
