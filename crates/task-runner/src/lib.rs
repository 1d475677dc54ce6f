//! Whitelisted ad-hoc tasks.
//!
//! A task is a fixed command from a compile-time table, run inside a
//! session's working directory with a wall-clock timeout. Output accumulates
//! in a bounded buffer and is simultaneously broadcast, so a read-only
//! WebSocket can stream a run it joined late without losing the beginning.
//! Nothing here ever passes client input to a shell; the whitelist supplies
//! both the program and its arguments.

use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

/// Wall-clock bound on one task subprocess.
pub const TASK_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Bound on the buffered output kept per run.
pub const OUTPUT_BUFFER_BYTES: usize = 256 * 1024;

/// Errors from task execution.
#[derive(thiserror::Error, Debug)]
pub enum TaskError {
    #[error("tasks are disabled")]
    Disabled,
    #[error("unknown task: {0}")]
    UnknownTask(String),
    #[error("task run not found: {0}")]
    RunNotFound(String),
    #[error("failed to spawn task: {0}")]
    Spawn(String),
}

/// A whitelisted task definition.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub name: &'static str,
    pub program: &'static str,
    pub args: &'static [&'static str],
}

/// The fixed task table. Client input selects a row; it never contributes
/// arguments.
pub const TASK_TABLE: &[TaskDefinition] = &[
    TaskDefinition {
        name: "git-fetch",
        program: "git",
        args: &["fetch", "--all", "--prune"],
    },
    TaskDefinition {
        name: "npm-install",
        program: "npm",
        args: &["install"],
    },
    TaskDefinition {
        name: "npm-test",
        program: "npm",
        args: &["test", "--", "--watch=false"],
    },
];

/// Lifecycle of a task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Finished,
    TimedOut,
    Failed,
}

/// Events streamed to run watchers.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Output(String),
    Status { state: RunState, exit_code: Option<i32> },
}

/// Point-in-time view of a run for late joiners and the HTTP surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub run_id: String,
    pub task: String,
    pub state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub output: String,
}

struct Run {
    task: &'static str,
    state: RunState,
    exit_code: Option<i32>,
    output: String,
    events: broadcast::Sender<TaskEvent>,
}

/// Registry of live and recently-finished task runs.
#[derive(Clone)]
pub struct TaskRunner {
    enabled: bool,
    runs: Arc<Mutex<HashMap<String, Run>>>,
}

impl TaskRunner {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Start a whitelisted task in `workdir`. Returns the run id.
    pub fn start(&self, task_name: &str, workdir: PathBuf) -> Result<String, TaskError> {
        if !self.enabled {
            return Err(TaskError::Disabled);
        }
        let definition = TASK_TABLE
            .iter()
            .find(|t| t.name == task_name)
            .ok_or_else(|| TaskError::UnknownTask(task_name.to_string()))?;

        let run_id = Uuid::new_v4().to_string();
        let (events, _) = broadcast::channel(256);

        {
            let mut runs = self.lock_runs();
            runs.insert(
                run_id.clone(),
                Run {
                    task: definition.name,
                    state: RunState::Running,
                    exit_code: None,
                    output: String::new(),
                    events: events.clone(),
                },
            );
        }

        let runner = self.clone();
        let definition = definition.clone();
        let id = run_id.clone();
        tokio::spawn(async move {
            runner.drive(&id, &definition, workdir).await;
        });

        info!(run_id = %run_id, task = %task_name, "Task run started");
        Ok(run_id)
    }

    /// Snapshot a run's buffered output and state.
    pub fn snapshot(&self, run_id: &str) -> Result<RunSnapshot, TaskError> {
        let runs = self.lock_runs();
        let run = runs
            .get(run_id)
            .ok_or_else(|| TaskError::RunNotFound(run_id.to_string()))?;
        Ok(RunSnapshot {
            run_id: run_id.to_string(),
            task: run.task.to_string(),
            state: run.state,
            exit_code: run.exit_code,
            output: run.output.clone(),
        })
    }

    /// Subscribe to a run's events, together with the snapshot taken at the
    /// same moment so the caller can backfill.
    pub fn subscribe(
        &self,
        run_id: &str,
    ) -> Result<(RunSnapshot, broadcast::Receiver<TaskEvent>), TaskError> {
        let runs = self.lock_runs();
        let run = runs
            .get(run_id)
            .ok_or_else(|| TaskError::RunNotFound(run_id.to_string()))?;
        let snapshot = RunSnapshot {
            run_id: run_id.to_string(),
            task: run.task.to_string(),
            state: run.state,
            exit_code: run.exit_code,
            output: run.output.clone(),
        };
        Ok((snapshot, run.events.subscribe()))
    }

    /// Drop a finished run from the registry.
    pub fn forget(&self, run_id: &str) {
        self.lock_runs().remove(run_id);
    }

    async fn drive(&self, run_id: &str, definition: &TaskDefinition, workdir: PathBuf) {
        let mut cmd = Command::new(definition.program);
        cmd.args(definition.args)
            .current_dir(&workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(run_id, error = %err, "Task spawn failed");
                self.finish(run_id, RunState::Failed, None, Some(err.to_string()));
                return;
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let runner = self.clone();
        let id = run_id.to_string();
        let stdout_task = stdout.map(|out| {
            let runner = runner.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(out).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    runner.push_output(&id, &line);
                }
            })
        });
        let stderr_task = stderr.map(|err| {
            let runner = runner.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    runner.push_output(&id, &line);
                }
            })
        });

        let waited = tokio::time::timeout(TASK_TIMEOUT, child.wait()).await;

        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        match waited {
            Err(_) => {
                let _ = child.kill().await;
                self.finish(run_id, RunState::TimedOut, None, None);
            }
            Ok(Err(err)) => {
                self.finish(run_id, RunState::Failed, None, Some(err.to_string()));
            }
            Ok(Ok(status)) => {
                let code = status.code();
                let state = if status.success() {
                    RunState::Finished
                } else {
                    RunState::Failed
                };
                self.finish(run_id, state, code, None);
            }
        }
    }

    fn push_output(&self, run_id: &str, line: &str) {
        let mut runs = self.lock_runs();
        let Some(run) = runs.get_mut(run_id) else {
            return;
        };
        run.output.push_str(line);
        run.output.push('\n');
        if run.output.len() > OUTPUT_BUFFER_BYTES {
            let cut = run.output.len() - OUTPUT_BUFFER_BYTES;
            // Trim from the front at a char boundary.
            let boundary = run
                .output
                .char_indices()
                .map(|(i, _)| i)
                .find(|&i| i >= cut)
                .unwrap_or(0);
            run.output.drain(..boundary);
        }
        let _ = run.events.send(TaskEvent::Output(format!("{line}\n")));
    }

    fn finish(&self, run_id: &str, state: RunState, exit_code: Option<i32>, note: Option<String>) {
        let mut runs = self.lock_runs();
        let Some(run) = runs.get_mut(run_id) else {
            return;
        };
        if let Some(note) = note {
            run.output.push_str(&note);
            run.output.push('\n');
        }
        run.state = state;
        run.exit_code = exit_code;
        let _ = run.events.send(TaskEvent::Status { state, exit_code });
        info!(run_id, state = ?state, exit_code = ?exit_code, "Task run finished");
    }

    fn lock_runs(&self) -> std::sync::MutexGuard<'_, HashMap<String, Run>> {
        self.runs.lock().expect("task run registry mutex poisoned")
    }
}

/// The whitelisted task names, for the HTTP listing.
pub fn task_names() -> Vec<&'static str> {
    TASK_TABLE.iter().map(|t| t.name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_table_has_unique_names() {
        let names = task_names();
        let mut deduped = names.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(names.len(), deduped.len());
    }

    #[tokio::test]
    async fn disabled_runner_refuses_everything() {
        let runner = TaskRunner::new(false);
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            runner.start("git-fetch", temp.path().to_path_buf()),
            Err(TaskError::Disabled)
        ));
    }

    #[tokio::test]
    async fn unknown_task_is_rejected() {
        let runner = TaskRunner::new(true);
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            runner.start("rm-rf-everything", temp.path().to_path_buf()),
            Err(TaskError::UnknownTask(_))
        ));
    }

    #[tokio::test]
    async fn unknown_run_snapshot_is_not_found() {
        let runner = TaskRunner::new(true);
        assert!(matches!(
            runner.snapshot("no-such-run"),
            Err(TaskError::RunNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn git_fetch_in_non_repo_finishes_as_failed() {
        let runner = TaskRunner::new(true);
        let temp = tempfile::tempdir().expect("tempdir");

        let run_id = match runner.start("git-fetch", temp.path().to_path_buf()) {
            Ok(id) => id,
            // No git on this machine; spawn failure is recorded, not thrown.
            Err(err) => panic!("start should not fail synchronously: {err}"),
        };

        let (snapshot, mut events) = runner.subscribe(&run_id).expect("subscribe");
        let deadline = tokio::time::Duration::from_secs(30);
        let status = if snapshot.state != RunState::Running {
            snapshot.state
        } else {
            tokio::time::timeout(deadline, async {
                loop {
                    match events.recv().await {
                        Ok(TaskEvent::Status { state, .. }) => return state,
                        Ok(TaskEvent::Output(_)) => continue,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => {
                            return runner.snapshot(&run_id).expect("snapshot").state;
                        }
                    }
                }
            })
            .await
            .expect("run should finish")
        };

        assert_ne!(status, RunState::Running);
        runner.forget(&run_id);
        assert!(runner.snapshot(&run_id).is_err());
    }
}
