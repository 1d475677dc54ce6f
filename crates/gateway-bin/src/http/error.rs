//! HTTP error envelope.
//!
//! Library errors funnel through [`ApiError`], which owns the status-code
//! mapping and the `{error, code}` response shape. Internal details are
//! logged, never returned to the caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use file_surface::FileSurfaceError;
use gateway_config::SettingsError;
use git_surface::GitSurfaceError;
use identity_gate::IdentityError;
use path_safety::PathSafetyError;
use repo_registry::RegistryError;
use search_ops::SearchError;
use serde_json::json;
use session_core::SessionError;
use task_runner::TaskError;
use tracing::{error, warn};
use worktree_ops::WorktreeError;

/// An error ready to be rendered to the HTTP caller.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = self.code, message = %self.message, "Request failed");
        } else {
            warn!(code = self.code, message = %self.message, "Request rejected");
        }

        let body = Json(json!({
            "error": self.message,
            "code": self.code,
        }));
        (self.status, body).into_response()
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::MissingToken | IdentityError::InvalidToken(_) => {
                Self::unauthorized(err.to_string())
            }
            IdentityError::NotAllowlisted(_) => Self::forbidden(err.to_string()),
            IdentityError::ConfigMissing(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                err.to_string(),
            ),
            IdentityError::JwksFetch(_) => Self::internal("identity verification unavailable"),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => Self::not_found(err.to_string()),
            RegistryError::InvalidRepoId(_) => Self::bad_request(err.to_string()),
        }
    }
}

impl From<PathSafetyError> for ApiError {
    fn from(err: PathSafetyError) -> Self {
        match err {
            PathSafetyError::UnsafePath | PathSafetyError::PathEscape => Self::new(
                StatusCode::BAD_REQUEST,
                "PATH_SAFETY",
                "path is outside the repository",
            ),
            PathSafetyError::NotFound => Self::not_found("path not found"),
            PathSafetyError::InvalidRoot | PathSafetyError::Io(_) => {
                Self::internal(err.to_string())
            }
        }
    }
}

impl From<FileSurfaceError> for ApiError {
    fn from(err: FileSurfaceError) -> Self {
        match err {
            FileSurfaceError::Unsafe(inner) => inner.into(),
            FileSurfaceError::NotFound => Self::not_found("file not found"),
            FileSurfaceError::NotAFile | FileSurfaceError::NotADirectory => {
                Self::bad_request(err.to_string())
            }
            FileSurfaceError::TooLarge { .. } => Self::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                "FILE_TOO_LARGE",
                err.to_string(),
            ),
            FileSurfaceError::BinaryFile => {
                Self::new(StatusCode::BAD_REQUEST, "BINARY_FILE", err.to_string())
            }
            FileSurfaceError::InvalidUtf8 => Self::bad_request(err.to_string()),
            FileSurfaceError::Io(_) => Self::internal(err.to_string()),
        }
    }
}

impl From<WorktreeError> for ApiError {
    fn from(err: WorktreeError) -> Self {
        match err {
            WorktreeError::InvalidBranchName(_) => Self::new(
                StatusCode::BAD_REQUEST,
                "INVALID_BRANCH_NAME",
                err.to_string(),
            ),
            WorktreeError::BranchMissing(_) => {
                Self::new(StatusCode::NOT_FOUND, "BRANCH_NOT_FOUND", err.to_string())
            }
            WorktreeError::BranchExists(_) => {
                Self::new(StatusCode::CONFLICT, "BRANCH_EXISTS", err.to_string())
            }
            WorktreeError::InvalidUser(_) => Self::bad_request(err.to_string()),
            WorktreeError::Containment => Self::new(
                StatusCode::BAD_REQUEST,
                "PATH_SAFETY",
                "worktree path is outside the repository",
            ),
            WorktreeError::RepositoryOpen(_) => {
                Self::bad_request("repository is not a git repository")
            }
            WorktreeError::WorktreeCreate(_) | WorktreeError::Git(_) | WorktreeError::Io(_) => {
                Self::internal(err.to_string())
            }
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::SessionNotFound(_) => Self::not_found(err.to_string()),
            SessionError::NotOwner => Self::not_found("session not found"),
            SessionError::PerUserLimit(_) => Self::new(
                StatusCode::TOO_MANY_REQUESTS,
                "MAX_SESSIONS_PER_USER",
                err.to_string(),
            ),
            SessionError::GlobalLimit(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVER_MAX_CAPACITY",
                err.to_string(),
            ),
            SessionError::NotRunning | SessionError::InvalidSize { .. } => {
                Self::bad_request(err.to_string())
            }
            SessionError::Pty(_) | SessionError::Io(_) => Self::internal(err.to_string()),
        }
    }
}

impl From<GitSurfaceError> for ApiError {
    fn from(err: GitSurfaceError) -> Self {
        match err {
            GitSurfaceError::NotARepository(_) => {
                Self::new(StatusCode::BAD_REQUEST, "NOT_A_REPOSITORY", err.to_string())
            }
            GitSurfaceError::RevisionNotFound(_) => Self::not_found(err.to_string()),
            GitSurfaceError::InvalidCommitHash(_) => Self::bad_request(err.to_string()),
            GitSurfaceError::Git(_) => Self::internal(err.to_string()),
        }
    }
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::EmptyQuery | SearchError::InvalidPath(_) => {
                Self::bad_request(err.to_string())
            }
            SearchError::Timeout => Self::new(
                StatusCode::GATEWAY_TIMEOUT,
                "SEARCH_TIMEOUT",
                err.to_string(),
            ),
            SearchError::NotInstalled | SearchError::Failed(_) => Self::internal(err.to_string()),
        }
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::Disabled => {
                Self::new(StatusCode::FORBIDDEN, "TASKS_DISABLED", err.to_string())
            }
            TaskError::UnknownTask(_) | TaskError::RunNotFound(_) => {
                Self::not_found(err.to_string())
            }
            TaskError::Spawn(_) => Self::internal(err.to_string()),
        }
    }
}

impl From<SettingsError> for ApiError {
    fn from(err: SettingsError) -> Self {
        match err {
            SettingsError::NotAdmin => Self::forbidden(err.to_string()),
            SettingsError::Persist(_) | SettingsError::Io(_) | SettingsError::Malformed(_) => {
                Self::internal(err.to_string())
            }
        }
    }
}
