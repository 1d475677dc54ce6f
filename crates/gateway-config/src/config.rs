//! Boot-time configuration.
//!
//! All options come from the environment, parsed once at startup into a
//! fixed record. Production refuses to start without the identity-gate
//! settings; everything else has a default.

use crate::error::ConfigError;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_MAX_SESSIONS_PER_USER: usize = 3;
pub const DEFAULT_MAX_TOTAL_SESSIONS: usize = 20;
pub const DEFAULT_DISCONNECTED_TTL_MINUTES: u64 = 20;
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 2_000_000;
pub const DEFAULT_CLAUDE_PATH: &str = "claude";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

/// The complete gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    /// Absolute paths holding the served repositories.
    pub repo_roots: Vec<PathBuf>,
    /// Seed allowlist; the settings store may extend it at runtime.
    pub allowlist_emails: Vec<String>,
    /// Subset of the allowlist with admin rights.
    pub admin_emails: Vec<String>,
    pub cf_access_team_domain: Option<String>,
    pub cf_access_aud: Option<String>,
    pub max_sessions_per_user: usize,
    pub max_total_sessions: usize,
    pub disconnected_ttl_minutes: u64,
    pub max_file_size_bytes: u64,
    pub tasks_enabled: bool,
    /// Path to the assistant binary spawned in each session PTY.
    pub claude_path: String,
    /// Directory for settings.json and the audit log.
    pub data_dir: PathBuf,
    pub log_level: String,
}

impl Config {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary lookup (tests inject a
    /// map here instead of mutating the process environment).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let environment = match lookup("GATEWAY_ENV")
            .or_else(|| lookup("NODE_ENV"))
            .as_deref()
        {
            Some("production") => Environment::Production,
            _ => Environment::Development,
        };

        let config = Self {
            host: lookup("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or("PORT", &lookup, DEFAULT_PORT)?,
            environment,
            repo_roots: parse_list(&lookup("REPO_ROOTS"))
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            allowlist_emails: parse_email_list(&lookup("ALLOWLIST_EMAILS")),
            admin_emails: parse_email_list(&lookup("ADMIN_EMAILS")),
            cf_access_team_domain: non_empty(lookup("CF_ACCESS_TEAM_DOMAIN")),
            cf_access_aud: non_empty(lookup("CF_ACCESS_AUD")),
            max_sessions_per_user: parse_or(
                "MAX_SESSIONS_PER_USER",
                &lookup,
                DEFAULT_MAX_SESSIONS_PER_USER,
            )?,
            max_total_sessions: parse_or("MAX_TOTAL_SESSIONS", &lookup, DEFAULT_MAX_TOTAL_SESSIONS)?,
            disconnected_ttl_minutes: parse_or(
                "DISCONNECTED_TTL_MINUTES",
                &lookup,
                DEFAULT_DISCONNECTED_TTL_MINUTES,
            )?,
            max_file_size_bytes: parse_or(
                "MAX_FILE_SIZE_BYTES",
                &lookup,
                DEFAULT_MAX_FILE_SIZE_BYTES,
            )?,
            tasks_enabled: lookup("TASKS_ENABLED")
                .map(|raw| parse_bool(&raw))
                .unwrap_or(true),
            claude_path: non_empty(lookup("CLAUDE_PATH"))
                .unwrap_or_else(|| DEFAULT_CLAUDE_PATH.to_string()),
            data_dir: non_empty(lookup("GATEWAY_DATA_DIR"))
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
            log_level: non_empty(lookup("GATEWAY_LOG_LEVEL"))
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Startup validation. Fatal: the caller exits non-zero on error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repo_roots.is_empty() {
            return Err(ConfigError::Missing("REPO_ROOTS"));
        }
        for root in &self.repo_roots {
            if !root.is_absolute() {
                return Err(ConfigError::Invalid {
                    key: "REPO_ROOTS",
                    reason: format!("{} is not an absolute path", root.display()),
                });
            }
        }

        if self.environment.is_production() {
            if self.cf_access_team_domain.is_none() {
                return Err(ConfigError::Missing("CF_ACCESS_TEAM_DOMAIN"));
            }
            if self.cf_access_aud.is_none() {
                return Err(ConfigError::Missing("CF_ACCESS_AUD"));
            }
            if self.allowlist_emails.is_empty() {
                return Err(ConfigError::Missing("ALLOWLIST_EMAILS"));
            }
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn disconnected_ttl(&self) -> Duration {
        Duration::from_secs(self.disconnected_ttl_minutes * 60)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.data_dir.join("audit")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("logpose")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn parse_list(value: &Option<String>) -> Vec<String> {
    value
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_email_list(value: &Option<String>) -> Vec<String> {
    parse_list(value)
        .into_iter()
        .map(|email| email.to_lowercase())
        .collect()
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    lookup: &impl Fn(&str) -> Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(default);
            }
            trimmed.parse().map_err(|_| ConfigError::Invalid {
                key,
                reason: format!("cannot parse {trimmed:?}"),
            })
        }
    }
}
