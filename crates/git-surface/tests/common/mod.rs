#![allow(dead_code)]

use git2::{Repository, Signature};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Create a temp repo with an initial commit on `main`.
pub fn init_test_repo() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let repo_path = dir.path().to_path_buf();

    let mut opts = git2::RepositoryInitOptions::new();
    opts.initial_head("refs/heads/main");
    let repo = Repository::init_opts(&repo_path, &opts).expect("failed to init repo");

    create_file(&repo_path, "README.md", "# Test Repo\n");

    let mut index = repo.index().expect("failed to get index");
    index
        .add_path(Path::new("README.md"))
        .expect("failed to add to index");
    index.write().expect("failed to write index");

    let tree_id = index.write_tree().expect("failed to write tree");
    let tree = repo.find_tree(tree_id).expect("failed to find tree");

    let sig = Signature::now("Test User", "test@example.com").expect("failed to create sig");
    repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
        .expect("failed to create initial commit");

    (dir, repo_path)
}

pub fn create_file(repo_path: &Path, name: &str, content: &str) {
    let file_path = repo_path.join(name);
    if let Some(parent) = file_path.parent() {
        fs::create_dir_all(parent).expect("failed to create parent dirs");
    }
    fs::write(&file_path, content).expect("failed to write file");
}

/// Stage all changes and commit with the given message.
pub fn commit_all(repo_path: &Path, message: &str) {
    let repo = Repository::open(repo_path).expect("failed to open repo");
    let mut index = repo.index().expect("failed to get index");
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .expect("failed to add all");
    index.write().expect("failed to write index");

    let tree_id = index.write_tree().expect("failed to write tree");
    let tree = repo.find_tree(tree_id).expect("failed to find tree");

    let sig = Signature::now("Test User", "test@example.com").expect("failed to create sig");
    let head = repo.head().expect("failed to get head");
    let parent = head.peel_to_commit().expect("failed to peel to commit");

    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])
        .expect("failed to commit");
}

/// Create a local branch at current HEAD without checking it out.
pub fn create_branch(repo_path: &Path, name: &str) {
    let repo = Repository::open(repo_path).expect("failed to open repo");
    let head = repo
        .head()
        .and_then(|h| h.peel_to_commit())
        .expect("failed to get head commit");
    repo.branch(name, &head, false).expect("failed to branch");
}
