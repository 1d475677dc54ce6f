//! Append-only audit log.
//!
//! One JSONL file per day under the configured directory. Failures are
//! logged and swallowed; auditing never fails the operation that produced
//! the event.

use chrono::{DateTime, Local, NaiveDate, SecondsFormat, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// One audit record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub timestamp: String,
    pub user: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEvent {
    pub fn new(user: &str, action: &str) -> Self {
        Self {
            timestamp: now_rfc3339(),
            user: user.to_string(),
            action: action.to_string(),
            repo_id: None,
            detail: None,
        }
    }

    pub fn repo(mut self, repo_id: &str) -> Self {
        self.repo_id = Some(repo_id.to_string());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Mutex-guarded JSONL appender, one file per day.
#[derive(Debug)]
pub struct AuditSink {
    base_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditSink {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            write_lock: Mutex::new(()),
        }
    }

    /// Append an event. Errors are logged, never propagated.
    pub fn record(&self, event: AuditEvent) {
        if let Err(err) = self.append(&event, Local::now().date_naive()) {
            warn!(error = %err, action = %event.action, "Failed to write audit event");
        }
    }

    fn append(&self, event: &AuditEvent, date: NaiveDate) -> io::Result<()> {
        let path = self.file_for(date);
        let line = serde_json::to_string(event).map_err(io::Error::other)?;

        let _guard = self.write_lock.lock().expect("audit sink mutex poisoned");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.base_dir.join(format!("{}.jsonl", date.format("%Y-%m-%d")))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

fn now_rfc3339() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.to_rfc3339_opts(SecondsFormat::Micros, true)
}
