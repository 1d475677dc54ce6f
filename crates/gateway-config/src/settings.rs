//! Runtime-mutable settings persisted at `<data>/settings.json`.
//!
//! The file holds the allowlist and admin set; the admin API rewrites it
//! atomically (write-then-rename) and swaps the in-memory copy under the
//! lock, so readers always see a consistent snapshot.

use crate::error::SettingsError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::UNIX_EPOCH;
use tracing::info;

/// Worktree retention policy, reported on the admin surface. Worktrees
/// survive session reaps; only the explicit cleanup surface removes them.
pub const WORKTREE_RETENTION: &str = "retain";

/// The persisted settings document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub allowlist_emails: BTreeSet<String>,
    pub admin_emails: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

impl Settings {
    fn seed(allowlist: &[String], admins: &[String]) -> Self {
        Self {
            allowlist_emails: allowlist.iter().map(|e| e.to_lowercase()).collect(),
            admin_emails: admins.iter().map(|e| e.to_lowercase()).collect(),
            updated_at: Utc::now(),
            updated_by: "boot".to_string(),
        }
    }
}

/// Thread-safe settings store backed by settings.json.
pub struct SettingsStore {
    path: PathBuf,
    inner: RwLock<Settings>,
}

impl SettingsStore {
    /// Load settings from disk, seeding from the boot config when the file
    /// does not exist yet.
    pub fn load_or_seed(
        path: PathBuf,
        allowlist: &[String],
        admins: &[String],
    ) -> Result<Self, SettingsError> {
        let settings = if path.exists() {
            let content = fs::read_to_string(&path)?;
            let mut loaded: Settings = serde_json::from_str(&content)?;
            // Boot-config emails are always honored, so an operator cannot
            // lock every admin out by editing the file.
            for email in allowlist {
                loaded.allowlist_emails.insert(email.to_lowercase());
            }
            for email in admins {
                loaded.admin_emails.insert(email.to_lowercase());
            }
            loaded
        } else {
            Settings::seed(allowlist, admins)
        };

        Ok(Self {
            path,
            inner: RwLock::new(settings),
        })
    }

    /// Snapshot of the current settings.
    pub fn current(&self) -> Settings {
        self.inner
            .read()
            .expect("settings store lock poisoned")
            .clone()
    }

    pub fn is_allowlisted(&self, email: &str) -> bool {
        let settings = self.inner.read().expect("settings store lock poisoned");
        settings.allowlist_emails.contains(&email.to_lowercase())
    }

    pub fn is_admin(&self, email: &str) -> bool {
        let settings = self.inner.read().expect("settings store lock poisoned");
        settings.admin_emails.contains(&email.to_lowercase())
    }

    /// Replace the allowlist and admin set (admin check happens here, not
    /// at the HTTP layer, so every caller gets it).
    pub fn update(
        &self,
        updated_by: &str,
        allowlist: BTreeSet<String>,
        admins: BTreeSet<String>,
    ) -> Result<Settings, SettingsError> {
        if !self.is_admin(updated_by) {
            return Err(SettingsError::NotAdmin);
        }

        let next = Settings {
            allowlist_emails: allowlist.into_iter().map(|e| e.to_lowercase()).collect(),
            admin_emails: admins.into_iter().map(|e| e.to_lowercase()).collect(),
            updated_at: Utc::now(),
            updated_by: updated_by.to_lowercase(),
        };

        atomic_write_json(&self.path, &next)?;

        let mut current = self.inner.write().expect("settings store lock poisoned");
        *current = next.clone();
        info!(updated_by = %next.updated_by, "Settings updated");
        Ok(next)
    }
}

fn atomic_write_json(path: &Path, settings: &Settings) -> Result<(), SettingsError> {
    let dir = path
        .parent()
        .ok_or_else(|| SettingsError::Persist("settings path has no parent".to_string()))?;
    fs::create_dir_all(dir)?;

    let tmp_name = format!(
        ".settings.json.tmp.{}",
        std::time::SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    );
    let tmp_path = dir.join(tmp_name);

    let content = serde_json::to_string_pretty(settings)?;
    let result = (|| -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if let Err(err) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}
