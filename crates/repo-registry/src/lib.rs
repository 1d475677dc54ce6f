//! Resolution of opaque repo ids against the configured repository roots.
//!
//! A repo id has the form `<rootName>/<sub-path>` where `rootName` is the
//! basename of exactly one configured root directory. The registry is
//! stateless beyond its immutable configuration; every call re-resolves
//! against the filesystem.

use path_safety::PathSafetyError;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Errors from repo id parsing and resolution.
#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("repository not found: {0}")]
    NotFound(String),
    #[error("invalid repo id: {0}")]
    InvalidRepoId(String),
}

/// A discovered repository, as shown in the repo picker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoListing {
    pub repo_id: String,
    pub display_name: String,
    pub path_hint: String,
}

/// Resolves repo ids to on-disk paths under the configured roots.
#[derive(Debug, Clone)]
pub struct RepoRegistry {
    roots: Vec<PathBuf>,
}

impl RepoRegistry {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Enumerate the immediate children of each configured root.
    ///
    /// Skips hidden entries and non-directories. Sorted by display name,
    /// case-insensitive.
    pub fn discover(&self) -> Vec<RepoListing> {
        let mut listings = Vec::new();

        for root in &self.roots {
            let Some(root_name) = root_basename(root) else {
                continue;
            };
            let Ok(entries) = fs::read_dir(root) else {
                continue;
            };

            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    continue;
                }
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                if !is_dir {
                    continue;
                }

                listings.push(RepoListing {
                    repo_id: format!("{root_name}/{name}"),
                    display_name: name,
                    path_hint: entry.path().to_string_lossy().to_string(),
                });
            }
        }

        listings.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
        });
        listings
    }

    /// Resolve a repo id to the real path of its directory.
    ///
    /// The resolved real path must lie under the matching root after symlink
    /// resolution; anything else is reported as not-found, so callers cannot
    /// distinguish an escape attempt from a missing repo.
    pub fn resolve(&self, repo_id: &str) -> Result<PathBuf, RegistryError> {
        let (root_name, sub) = repo_id
            .split_once('/')
            .ok_or_else(|| RegistryError::InvalidRepoId(repo_id.to_string()))?;

        if root_name.is_empty() || sub.is_empty() {
            return Err(RegistryError::InvalidRepoId(repo_id.to_string()));
        }

        let root = self
            .roots
            .iter()
            .find(|root| root_basename(root).as_deref() == Some(root_name))
            .ok_or_else(|| RegistryError::NotFound(repo_id.to_string()))?;

        let resolved = path_safety::resolve_repo_path(root, sub).map_err(|err| match err {
            PathSafetyError::UnsafePath => RegistryError::InvalidRepoId(repo_id.to_string()),
            _ => RegistryError::NotFound(repo_id.to_string()),
        })?;

        if !resolved.is_dir() {
            return Err(RegistryError::NotFound(repo_id.to_string()));
        }

        Ok(resolved)
    }
}

fn root_basename(root: &Path) -> Option<String> {
    root.file_name().map(|n| n.to_string_lossy().to_string())
}
