//! Code search delegated to a ripgrep subprocess.
//!
//! ripgrep runs with JSON output (one event per line) and a wall-clock
//! timeout; matches are parsed out of the `match` events and capped. The
//! query and paths are passed per-arg, never through a shell. Smart-case
//! gives case-insensitive search for all-lowercase queries.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Wall-clock bound on one search subprocess.
pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Cap on matches returned from one query.
pub const MAX_MATCHES: usize = 200;
/// Per-file match cap passed to ripgrep.
const MAX_MATCHES_PER_FILE: u32 = 10;
/// Files above this size are not searched.
const MAX_FILE_SIZE: &str = "1M";

/// Errors from the search subprocess.
#[derive(thiserror::Error, Debug)]
pub enum SearchError {
    #[error("search query must not be empty")]
    EmptyQuery,
    #[error("invalid search path: {0}")]
    InvalidPath(String),
    #[error("ripgrep is not installed")]
    NotInstalled,
    #[error("search timed out after {}s", SEARCH_TIMEOUT.as_secs())]
    Timeout,
    #[error("search failed: {0}")]
    Failed(String),
}

/// One match line.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchMatch {
    pub path: String,
    pub line: u64,
    pub text: String,
}

#[derive(Deserialize)]
struct RgEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: Option<RgMatchData>,
}

#[derive(Deserialize)]
struct RgMatchData {
    path: Option<RgText>,
    line_number: Option<u64>,
    lines: Option<RgText>,
}

#[derive(Deserialize)]
struct RgText {
    text: Option<String>,
}

/// Run a search over `root`, optionally scoped to relative `paths`.
pub async fn search(
    root: &Path,
    query: &str,
    paths: &[String],
) -> Result<Vec<SearchMatch>, SearchError> {
    if query.trim().is_empty() {
        return Err(SearchError::EmptyQuery);
    }
    for path in paths {
        path_safety::validate_relative_path(path)
            .map_err(|_| SearchError::InvalidPath(path.clone()))?;
    }

    let mut cmd = Command::new("rg");
    cmd.arg("--json")
        .arg("--smart-case")
        .arg("--follow")
        .args(["--max-count", &MAX_MATCHES_PER_FILE.to_string()])
        .args(["--max-filesize", MAX_FILE_SIZE]);
    for glob in file_surface::elided_dir_globs() {
        cmd.args(["--glob", &glob]);
    }
    cmd.arg("--").arg(query);
    if paths.is_empty() {
        cmd.arg("./");
    } else {
        for path in paths {
            cmd.arg(path);
        }
    }
    cmd.current_dir(root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(query, paths = paths.len(), "Running search");

    let output = match timeout(SEARCH_TIMEOUT, cmd.output()).await {
        Err(_) => return Err(SearchError::Timeout),
        Ok(Err(err)) => {
            return if err.kind() == std::io::ErrorKind::NotFound {
                Err(SearchError::NotInstalled)
            } else {
                Err(SearchError::Failed(err.to_string()))
            };
        }
        Ok(Ok(output)) => output,
    };

    // ripgrep exits 1 when nothing matched; that is an empty result, not an
    // error. Exit code 2 is a real failure.
    if !output.status.success() && output.status.code() != Some(1) {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(stderr = %stderr, "Search subprocess failed");
        return Err(SearchError::Failed(if stderr.is_empty() {
            format!("ripgrep exited with {:?}", output.status.code())
        } else {
            stderr
        }));
    }

    Ok(parse_matches(&String::from_utf8_lossy(&output.stdout)))
}

/// Extract matches from ripgrep's JSON-lines output, capped at
/// [`MAX_MATCHES`].
fn parse_matches(stdout: &str) -> Vec<SearchMatch> {
    let mut matches = Vec::new();

    for line in stdout.lines() {
        if matches.len() >= MAX_MATCHES {
            break;
        }
        let Ok(event) = serde_json::from_str::<RgEvent>(line) else {
            continue;
        };
        if event.event_type != "match" {
            continue;
        }
        let Some(data) = event.data else { continue };

        let path = data
            .path
            .and_then(|p| p.text)
            .unwrap_or_default()
            .trim_start_matches("./")
            .to_string();
        let Some(line_number) = data.line_number else {
            continue;
        };
        let text = data
            .lines
            .and_then(|l| l.text)
            .unwrap_or_default()
            .trim_end_matches('\n')
            .to_string();

        matches.push(SearchMatch {
            path,
            line: line_number,
            text,
        });
    }

    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn parses_match_events_and_skips_the_rest() {
        let stdout = concat!(
            r#"{"type":"begin","data":{"path":{"text":"./src/main.rs"}}}"#,
            "\n",
            r#"{"type":"match","data":{"path":{"text":"./src/main.rs"},"lines":{"text":"fn main() {\n"},"line_number":3,"absolute_offset":10,"submatches":[]}}"#,
            "\n",
            r#"{"type":"end","data":{"path":{"text":"./src/main.rs"}}}"#,
            "\n",
        );

        let matches = parse_matches(stdout);
        assert_eq!(
            matches,
            vec![SearchMatch {
                path: "src/main.rs".to_string(),
                line: 3,
                text: "fn main() {".to_string(),
            }]
        );
    }

    #[test]
    fn match_cap_is_enforced() {
        let line = r#"{"type":"match","data":{"path":{"text":"a.txt"},"lines":{"text":"x\n"},"line_number":1}}"#;
        let stdout = vec![line; MAX_MATCHES + 50].join("\n");
        assert_eq!(parse_matches(&stdout).len(), MAX_MATCHES);
    }

    #[test]
    fn garbage_lines_are_ignored() {
        let matches = parse_matches("not json\n{\"type\":\"summary\"}\n");
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            search(temp.path(), "   ", &[]).await,
            Err(SearchError::EmptyQuery)
        ));
    }

    #[tokio::test]
    async fn traversal_paths_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = search(temp.path(), "query", &["../outside".to_string()])
            .await
            .expect_err("must fail");
        assert!(matches!(err, SearchError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn finds_matches_in_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("alpha.txt"), "needle here\nnothing\n").expect("write");
        fs::write(temp.path().join("beta.txt"), "no match\n").expect("write");

        let matches = match search(temp.path(), "needle", &[]).await {
            Ok(matches) => matches,
            // Machines without ripgrep cannot run this assertion.
            Err(SearchError::NotInstalled) => return,
            Err(other) => panic!("search failed: {other}"),
        };

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, "alpha.txt");
        assert_eq!(matches[0].line, 1);
        assert!(matches[0].text.contains("needle"));
    }

    #[tokio::test]
    async fn smart_case_is_insensitive_for_lowercase_queries() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("data.txt"), "Mixed CASE Needle\n").expect("write");

        let matches = match search(temp.path(), "needle", &[]).await {
            Ok(matches) => matches,
            Err(SearchError::NotInstalled) => return,
            Err(other) => panic!("search failed: {other}"),
        };
        assert_eq!(matches.len(), 1);
    }

    #[tokio::test]
    async fn no_match_is_an_empty_result() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("data.txt"), "nothing\n").expect("write");

        match search(temp.path(), "zzz-not-present", &[]).await {
            Ok(matches) => assert!(matches.is_empty()),
            Err(SearchError::NotInstalled) => {}
            Err(other) => panic!("search failed: {other}"),
        }
    }
}
