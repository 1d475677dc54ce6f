//! Path validation and containment checks for file access on behalf of
//! browser clients.
//!
//! Every file reference that crosses the HTTP or WebSocket boundary is a
//! `(repo, relative path)` pair; the routines here are the only way those
//! pairs become absolute paths. Resolution always canonicalizes and verifies
//! the result stays under the caller's root, so a symlink created inside a
//! worktree cannot redirect reads outside of it.

use std::io;
use std::path::{Component, Path, PathBuf};

/// Errors from path validation and resolution.
#[derive(thiserror::Error, Debug)]
pub enum PathSafetyError {
    /// The relative path is empty, absolute, or contains a `..` segment.
    #[error("unsafe relative path")]
    UnsafePath,
    /// The resolved real path is not contained by the root (symlink escape).
    #[error("path escapes repository root")]
    PathEscape,
    /// The root does not exist or cannot be canonicalized.
    #[error("root path does not exist or is invalid")]
    InvalidRoot,
    /// The target does not exist.
    #[error("path not found")]
    NotFound,
    #[error("io error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for PathSafetyError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            PathSafetyError::NotFound
        } else {
            PathSafetyError::Io(err)
        }
    }
}

/// Validate a client-supplied relative path.
///
/// Rejects empty paths, absolute paths, paths starting with a separator, and
/// any path containing a `..` component.
pub fn validate_relative_path(relative_path: &str) -> Result<(), PathSafetyError> {
    if relative_path.is_empty() {
        return Err(PathSafetyError::UnsafePath);
    }

    if relative_path.starts_with('/') || relative_path.starts_with('\\') {
        return Err(PathSafetyError::UnsafePath);
    }

    let path = Path::new(relative_path);
    if path.is_absolute() {
        return Err(PathSafetyError::UnsafePath);
    }

    if path
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return Err(PathSafetyError::UnsafePath);
    }

    Ok(())
}

/// Resolve `<root>/<sub>` to its real path, requiring containment.
///
/// Used by the repo registry: `sub` is the repo-id tail, `root` one of the
/// configured repo roots.
pub fn resolve_repo_path(root: &Path, sub: &str) -> Result<PathBuf, PathSafetyError> {
    validate_relative_path(sub)?;

    let root_canon = root
        .canonicalize()
        .map_err(|_| PathSafetyError::InvalidRoot)?;
    let target_canon = root_canon.join(sub).canonicalize()?;

    if !target_canon.starts_with(&root_canon) {
        return Err(PathSafetyError::PathEscape);
    }

    Ok(target_canon)
}

/// Resolve a client-supplied relative path against a repo (or worktree) root.
///
/// The target is real-path resolved; if it does not exist yet, its parent
/// directory is resolved instead and the file name re-attached, so writes to
/// new files still get symlink-escape detection on every existing component.
pub fn resolve_file_path(repo_root: &Path, relative_path: &str) -> Result<PathBuf, PathSafetyError> {
    validate_relative_path(relative_path)?;

    let root_canon = repo_root
        .canonicalize()
        .map_err(|_| PathSafetyError::InvalidRoot)?;
    let target = root_canon.join(relative_path);

    if target.exists() {
        let target_canon = target.canonicalize()?;
        if !target_canon.starts_with(&root_canon) {
            return Err(PathSafetyError::PathEscape);
        }
        return Ok(target_canon);
    }

    let parent = target.parent().ok_or(PathSafetyError::UnsafePath)?;
    let file_name = target
        .file_name()
        .ok_or(PathSafetyError::UnsafePath)?
        .to_os_string();

    let parent_canon = parent.canonicalize()?;
    if !parent_canon.starts_with(&root_canon) {
        return Err(PathSafetyError::PathEscape);
    }

    Ok(parent_canon.join(file_name))
}

/// Canonicalize `candidate` and require `root` as a real-path prefix.
///
/// Containment check shared with the worktree manager, which computes its
/// own paths but must still prove they sit under the repo root.
pub fn ensure_contained(root: &Path, candidate: &Path) -> Result<PathBuf, PathSafetyError> {
    let root_canon = root
        .canonicalize()
        .map_err(|_| PathSafetyError::InvalidRoot)?;
    let candidate_canon = candidate.canonicalize()?;

    if !candidate_canon.starts_with(&root_canon) {
        return Err(PathSafetyError::PathEscape);
    }

    Ok(candidate_canon)
}

/// Extensions refused by textual file reads and writes.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tiff", "svgz", "pdf", "zip", "gz", "tar",
    "bz2", "xz", "zst", "7z", "rar", "jar", "war", "class", "exe", "dll", "so", "dylib", "a",
    "o", "bin", "dat", "db", "sqlite", "sqlite3", "wasm", "mp3", "mp4", "mov", "avi", "mkv",
    "wav", "flac", "ogg", "woff", "woff2", "ttf", "otf", "eot",
];

/// Whether a file name carries an extension from the binary denylist.
pub fn is_binary_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let lower = ext.to_ascii_lowercase();
            BINARY_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn rejects_empty_path() {
        assert!(matches!(
            validate_relative_path(""),
            Err(PathSafetyError::UnsafePath)
        ));
    }

    #[test]
    fn rejects_absolute_path() {
        assert!(matches!(
            validate_relative_path("/etc/passwd"),
            Err(PathSafetyError::UnsafePath)
        ));
    }

    #[test]
    fn rejects_parent_segments() {
        for candidate in ["..", "../x", "a/../b", "a/.."] {
            assert!(
                matches!(
                    validate_relative_path(candidate),
                    Err(PathSafetyError::UnsafePath)
                ),
                "expected rejection for {candidate:?}"
            );
        }
    }

    #[test]
    fn accepts_plain_relative_paths() {
        for candidate in ["src/main.rs", "README.md", "a/b/c.txt", "dir/."] {
            assert!(
                validate_relative_path(candidate).is_ok(),
                "expected acceptance for {candidate:?}"
            );
        }
    }

    #[test]
    fn resolve_file_path_existing_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("hello.txt"), "hi").expect("write");

        let resolved = resolve_file_path(temp.path(), "hello.txt").expect("resolve");
        assert!(resolved.ends_with("hello.txt"));
        assert!(resolved.starts_with(temp.path().canonicalize().expect("canon")));
    }

    #[test]
    fn resolve_file_path_missing_file_resolves_parent() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir(temp.path().join("sub")).expect("mkdir");

        let resolved = resolve_file_path(temp.path(), "sub/new.txt").expect("resolve");
        assert!(resolved.ends_with("sub/new.txt"));
    }

    #[test]
    fn resolve_file_path_missing_parent_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = resolve_file_path(temp.path(), "no-such-dir/new.txt").expect_err("must fail");
        assert!(matches!(err, PathSafetyError::NotFound));
    }

    #[test]
    fn resolve_file_path_rejects_traversal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = resolve_file_path(temp.path(), "../../etc/passwd").expect_err("must fail");
        assert!(matches!(err, PathSafetyError::UnsafePath));
    }

    #[cfg(unix)]
    #[test]
    fn resolve_file_path_detects_symlink_escape() {
        let temp = tempfile::tempdir().expect("tempdir");
        let outside = tempfile::tempdir().expect("outside tempdir");
        fs::write(outside.path().join("secret.txt"), "secret").expect("write");

        std::os::unix::fs::symlink(outside.path(), temp.path().join("evil")).expect("symlink");

        let err = resolve_file_path(temp.path(), "evil/secret.txt").expect_err("must fail");
        assert!(matches!(err, PathSafetyError::PathEscape));
    }

    #[cfg(unix)]
    #[test]
    fn resolve_file_path_detects_symlink_escape_for_new_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let outside = tempfile::tempdir().expect("outside tempdir");

        std::os::unix::fs::symlink(outside.path(), temp.path().join("evil")).expect("symlink");

        let err = resolve_file_path(temp.path(), "evil/new.txt").expect_err("must fail");
        assert!(matches!(err, PathSafetyError::PathEscape));
    }

    #[test]
    fn resolve_repo_path_contained() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir(temp.path().join("demo")).expect("mkdir");

        let resolved = resolve_repo_path(temp.path(), "demo").expect("resolve");
        assert!(resolved.ends_with("demo"));
    }

    #[test]
    fn resolve_repo_path_missing_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = resolve_repo_path(temp.path(), "absent").expect_err("must fail");
        assert!(matches!(err, PathSafetyError::NotFound));
    }

    #[test]
    fn binary_extension_denylist() {
        assert!(is_binary_extension("photo.PNG"));
        assert!(is_binary_extension("archive.tar"));
        assert!(is_binary_extension("lib.so"));
        assert!(!is_binary_extension("main.rs"));
        assert!(!is_binary_extension("README"));
        assert!(!is_binary_extension("notes.txt"));
    }

    #[test]
    fn ensure_contained_accepts_inner_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join(".worktrees/alice/main")).expect("mkdir");

        let inner = temp.path().join(".worktrees/alice/main");
        assert!(ensure_contained(temp.path(), &inner).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn ensure_contained_rejects_symlinked_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let outside = tempfile::tempdir().expect("outside tempdir");
        std::os::unix::fs::symlink(outside.path(), temp.path().join("link")).expect("symlink");

        let err = ensure_contained(temp.path(), &temp.path().join("link")).expect_err("must fail");
        assert!(matches!(err, PathSafetyError::PathEscape));
    }
}
