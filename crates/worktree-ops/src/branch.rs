//! Branch naming rules and the per-user filesystem identity.

use crate::error::WorktreeError;

/// Namespace prefix for user branches.
pub const USER_BRANCH_NAMESPACE: &str = "logpose";

const MAX_BRANCH_LEN: usize = 255;

/// Derive the path-safe short id for a user email.
///
/// Lowercased local part with every character outside `[a-z0-9]` collapsed
/// to `-`, trimmed of leading and trailing `-`.
pub fn short_user_id(email: &str) -> Result<String, WorktreeError> {
    let local_part = email.split('@').next().unwrap_or("");

    let mut collapsed = String::with_capacity(local_part.len());
    let mut last_was_dash = false;
    for ch in local_part.to_lowercase().chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            collapsed.push(ch);
            last_was_dash = false;
        } else if !last_was_dash {
            collapsed.push('-');
            last_was_dash = true;
        }
    }

    let trimmed = collapsed.trim_matches('-').to_string();
    if trimmed.is_empty() {
        return Err(WorktreeError::InvalidUser(email.to_string()));
    }
    Ok(trimmed)
}

/// The user-namespaced branch for a base branch.
pub fn user_branch_name(short_user_id: &str, base_branch: &str) -> String {
    format!("{USER_BRANCH_NAMESPACE}/{short_user_id}/{base_branch}")
}

/// Validate a branch name supplied by a client.
///
/// Accepts slash-namespaced names. Each `/`-delimited segment must be
/// non-empty and must neither start nor end with a dot.
pub fn validate_branch_name(name: &str) -> Result<(), WorktreeError> {
    let reject = || WorktreeError::InvalidBranchName(name.to_string());

    if name.is_empty() || name.len() > MAX_BRANCH_LEN {
        return Err(reject());
    }
    if name == "@" {
        return Err(reject());
    }
    if name.starts_with('-') {
        return Err(reject());
    }
    if name.contains("..") || name.contains("@{") || name.contains('\\') {
        return Err(reject());
    }
    if name
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '~' | '^' | ':' | '*' | '[' | ']' | '?'))
    {
        return Err(reject());
    }

    for segment in name.split('/') {
        if segment.is_empty() || segment.starts_with('.') || segment.ends_with('.') {
            return Err(reject());
        }
    }

    Ok(())
}

/// The git worktree registration name for a (user, branch) pair.
///
/// Worktree names cannot contain slashes, so the path segments are joined
/// with dashes.
pub fn worktree_name(short_user_id: &str, base_branch: &str) -> String {
    format!("{short_user_id}-{}", base_branch.replace('/', "-"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validator_accepts_plain_and_namespaced_names() {
        for name in ["main", "feature/x", "claude/user/main", "v1.2.3", "a-b_c"] {
            assert!(
                validate_branch_name(name).is_ok(),
                "expected acceptance for {name:?}"
            );
        }
    }

    #[test]
    fn validator_rejects_unsafe_names() {
        for name in [
            "", "-x", "a..b", "@", "a@{1}", "a/./b", "a//b", ".hidden", "x ", "x*", "a\\b",
            "a~b", "a^b", "a:b", "a[b]", "tip.", "dir/.name", "dir/name.",
        ] {
            assert!(
                validate_branch_name(name).is_err(),
                "expected rejection for {name:?}"
            );
        }
    }

    #[test]
    fn short_user_id_hyphenates_local_part() {
        assert_eq!(short_user_id("alice@example.com").unwrap(), "alice");
        assert_eq!(short_user_id("Bob.Smith@example.com").unwrap(), "bob-smith");
        assert_eq!(short_user_id("x__y+z@example.com").unwrap(), "x-y-z");
        assert_eq!(short_user_id("...a...@example.com").unwrap(), "a");
    }

    #[test]
    fn short_user_id_rejects_empty_identity() {
        assert!(matches!(
            short_user_id("+++@example.com"),
            Err(WorktreeError::InvalidUser(_))
        ));
    }

    #[test]
    fn user_branch_is_namespaced() {
        assert_eq!(user_branch_name("alice", "main"), "logpose/alice/main");
        assert_eq!(
            user_branch_name("bob", "feature/x"),
            "logpose/bob/feature/x"
        );
    }

    #[test]
    fn worktree_name_flattens_slashes() {
        assert_eq!(worktree_name("alice", "main"), "alice-main");
        assert_eq!(worktree_name("bob", "feature/x"), "bob-feature-x");
    }
}
