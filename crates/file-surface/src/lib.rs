//! File and directory operations within a repo root or worktree.
//!
//! Every entry point resolves its relative path through `path-safety`, so
//! traversal and symlink escapes are refused before any filesystem access.
//! Reads and writes are bounded by the configured size limit and refuse
//! binary extensions; writes are atomic (temp file + rename).

use path_safety::PathSafetyError;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Errors from file-surface operations.
#[derive(thiserror::Error, Debug)]
pub enum FileSurfaceError {
    #[error(transparent)]
    Unsafe(#[from] PathSafetyError),
    #[error("file not found")]
    NotFound,
    #[error("target is not a file")]
    NotAFile,
    #[error("target is not a directory")]
    NotADirectory,
    #[error("file exceeds the {limit}-byte limit")]
    TooLarge { limit: u64 },
    #[error("binary files are not served as text")]
    BinaryFile,
    #[error("file is not valid UTF-8")]
    InvalidUtf8,
    #[error("io error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for FileSurfaceError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FileSurfaceError::NotFound,
            io::ErrorKind::InvalidData => FileSurfaceError::InvalidUtf8,
            _ => FileSurfaceError::Io(err),
        }
    }
}

/// Entry type in a tree listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    File,
    Dir,
}

/// A single tree-listing entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
}

/// Directories elided from tree listings: build outputs, vendored
/// dependencies, VCS metadata, and the gateway's own worktrees.
fn elided_dirs() -> HashSet<&'static str> {
    [
        "node_modules",
        ".git",
        ".worktrees",
        "dist",
        "build",
        ".next",
        "target",
        "DerivedData",
        "Pods",
        "vendor",
    ]
    .into_iter()
    .collect()
}

/// Glob patterns excluding the elided directories, for the search subprocess.
pub fn elided_dir_globs() -> Vec<String> {
    let mut dirs: Vec<&str> = elided_dirs().into_iter().collect();
    dirs.sort_unstable();
    dirs.iter().map(|d| format!("!{d}/**")).collect()
}

/// List a directory inside the root.
///
/// Hidden entries and known heavy directories are elided. Sorted dirs-first,
/// then by name ascending, case-insensitive.
pub fn list_tree(root: &Path, relative_path: &str) -> Result<Vec<TreeEntry>, FileSurfaceError> {
    let target = if relative_path.is_empty() {
        root.canonicalize()
            .map_err(|_| PathSafetyError::InvalidRoot)?
    } else {
        path_safety::resolve_file_path(root, relative_path)?
    };

    let metadata = fs::metadata(&target)?;
    if !metadata.is_dir() {
        return Err(FileSurfaceError::NotADirectory);
    }

    let skip = elided_dirs();
    let mut entries = Vec::new();
    for entry in fs::read_dir(&target)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }

        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let is_dir = file_type.is_dir() && !file_type.is_symlink();
        if is_dir && skip.contains(name.as_str()) {
            continue;
        }

        entries.push(TreeEntry {
            name,
            entry_type: if is_dir { EntryType::Dir } else { EntryType::File },
        });
    }

    entries.sort_by(|a, b| match (a.entry_type, b.entry_type) {
        (EntryType::Dir, EntryType::File) => std::cmp::Ordering::Less,
        (EntryType::File, EntryType::Dir) => std::cmp::Ordering::Greater,
        _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    });

    Ok(entries)
}

/// Read a text file, refusing binary extensions and oversized payloads.
pub fn read_file(root: &Path, relative_path: &str, max_bytes: u64) -> Result<String, FileSurfaceError> {
    if path_safety::is_binary_extension(relative_path) {
        return Err(FileSurfaceError::BinaryFile);
    }

    let path = path_safety::resolve_file_path(root, relative_path)?;
    let metadata = fs::metadata(&path)?;
    if metadata.is_dir() {
        return Err(FileSurfaceError::NotAFile);
    }
    if metadata.len() > max_bytes {
        return Err(FileSurfaceError::TooLarge { limit: max_bytes });
    }

    Ok(fs::read_to_string(&path)?)
}

/// Write a text file atomically. The parent directory must already exist;
/// it takes part in symlink-escape detection.
pub fn write_file(
    root: &Path,
    relative_path: &str,
    content: &str,
    max_bytes: u64,
) -> Result<(), FileSurfaceError> {
    if path_safety::is_binary_extension(relative_path) {
        return Err(FileSurfaceError::BinaryFile);
    }
    if content.len() as u64 > max_bytes {
        return Err(FileSurfaceError::TooLarge { limit: max_bytes });
    }

    let path = path_safety::resolve_file_path(root, relative_path)?;
    if path.is_dir() {
        return Err(FileSurfaceError::NotAFile);
    }

    atomic_write(&path, content)?;
    Ok(())
}

/// Delete a file (never a directory).
pub fn delete_file(root: &Path, relative_path: &str) -> Result<(), FileSurfaceError> {
    let path = path_safety::resolve_file_path(root, relative_path)?;
    let metadata = fs::symlink_metadata(&path)?;
    if metadata.is_dir() {
        return Err(FileSurfaceError::NotAFile);
    }
    fs::remove_file(&path)?;
    Ok(())
}

/// Write-then-rename so readers never observe a partial file. Existing mode
/// bits survive the replacement.
fn atomic_write(path: &Path, content: &str) -> Result<(), FileSurfaceError> {
    let dir = path.parent().ok_or(PathSafetyError::UnsafePath)?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or(PathSafetyError::UnsafePath)?;

    let tmp_name = format!(
        ".{}.logpose.tmp.{}",
        file_name,
        std::time::SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    );
    let tmp_path = dir.join(tmp_name);

    #[cfg(unix)]
    let existing_mode = if path.exists() {
        use std::os::unix::fs::PermissionsExt;
        Some(fs::metadata(path)?.permissions().mode())
    } else {
        None
    };

    let write_result = (|| -> Result<(), io::Error> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;

        #[cfg(unix)]
        if let Some(mode) = existing_mode {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp_path, fs::Permissions::from_mode(mode))?;
        }

        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }

    Ok(())
}
