mod common;

use common::{commit_all, create_branch, create_file, init_test_repo};
use git_surface::{branches, diff, log, status, FileStatus};

#[test]
fn clean_repo_reports_clean_status() {
    let (_dir, repo_path) = init_test_repo();

    let result = status(&repo_path).expect("status");
    assert!(result.is_clean);
    assert!(result.files.is_empty());
    assert_eq!(result.branch.as_deref(), Some("main"));
}

#[test]
fn untracked_and_modified_files_show_up() {
    let (_dir, repo_path) = init_test_repo();
    create_file(&repo_path, "new.txt", "fresh\n");
    create_file(&repo_path, "README.md", "# Changed\n");

    let result = status(&repo_path).expect("status");
    assert!(!result.is_clean);

    let untracked = result
        .files
        .iter()
        .find(|f| f.path == "new.txt")
        .expect("untracked entry");
    assert_eq!(untracked.status, FileStatus::Untracked);
    assert!(!untracked.staged);

    let modified = result
        .files
        .iter()
        .find(|f| f.path == "README.md")
        .expect("modified entry");
    assert_eq!(modified.status, FileStatus::Modified);
}

#[test]
fn diff_reports_added_and_removed_lines() {
    let (_dir, repo_path) = init_test_repo();
    create_file(&repo_path, "README.md", "# Test Repo\nextra line\n");

    let result = diff(&repo_path, Some("README.md"), None).expect("diff");
    assert!(result.diff.contains("+extra line"));
    assert!(result.additions >= 1);
    assert!(!result.is_truncated);
}

#[test]
fn diff_line_cap_truncates() {
    let (_dir, repo_path) = init_test_repo();
    create_file(&repo_path, "big.txt", "start\n");
    commit_all(&repo_path, "Add big.txt");

    let body: String = (0..200).map(|i| format!("line {i}\n")).collect();
    create_file(&repo_path, "big.txt", &body);

    let result = diff(&repo_path, Some("big.txt"), Some(10)).expect("diff");
    assert!(result.is_truncated);
    assert!(result.diff.lines().count() <= 10);
}

#[test]
fn log_pages_through_history() {
    let (_dir, repo_path) = init_test_repo();
    for i in 0..5 {
        create_file(&repo_path, &format!("file_{i}.txt"), "content\n");
        commit_all(&repo_path, &format!("Commit {i}"));
    }

    let first_page = log(&repo_path, Some(3), None, None).expect("log");
    assert_eq!(first_page.commits.len(), 3);
    assert!(first_page.has_more);
    assert_eq!(first_page.commits[0].summary, "Commit 4");

    let second_page = log(&repo_path, Some(3), Some(3), None).expect("log");
    assert_eq!(second_page.commits.len(), 3);
    assert!(!second_page.has_more);
    assert_eq!(second_page.commits[2].summary, "Initial commit");
}

#[test]
fn log_of_unknown_branch_fails() {
    let (_dir, repo_path) = init_test_repo();
    assert!(log(&repo_path, None, None, Some("no-such-branch")).is_err());
}

#[test]
fn log_can_start_from_a_commit_hash() {
    let (_dir, repo_path) = init_test_repo();
    create_file(&repo_path, "second.txt", "content\n");
    commit_all(&repo_path, "Second commit");

    let full = log(&repo_path, None, None, None).expect("log");
    let first_oid = &full.commits[1].oid;

    let from_hash = log(&repo_path, None, None, Some(first_oid)).expect("log from hash");
    assert_eq!(from_hash.commits.len(), 1);
    assert_eq!(from_hash.commits[0].summary, "Initial commit");

    // Short hashes work too; malformed hashes are rejected before libgit2.
    let short = &first_oid[..7];
    assert_eq!(
        log(&repo_path, None, None, Some(short))
            .expect("log from short hash")
            .commits
            .len(),
        1
    );
    assert!(log(&repo_path, None, None, Some("XYZ-not-a-hash")).is_err());
}

#[test]
fn branches_lists_locals_with_current_first() {
    let (_dir, repo_path) = init_test_repo();
    create_branch(&repo_path, "aardvark");
    create_branch(&repo_path, "zebra");

    let result = branches(&repo_path).expect("branches");
    assert_eq!(result.current.as_deref(), Some("main"));

    let names: Vec<&str> = result.local.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["main", "aardvark", "zebra"]);
    assert!(result.local[0].is_current);
    assert!(result.remote.is_empty());
}

#[test]
fn operations_refuse_non_git_directories() {
    let temp = tempfile::tempdir().expect("tempdir");
    assert!(status(temp.path()).is_err());
    assert!(diff(temp.path(), None, None).is_err());
    assert!(log(temp.path(), None, None, None).is_err());
    assert!(branches(temp.path()).is_err());
}
