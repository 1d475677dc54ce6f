//! Admin settings surface.

use crate::app::{AppState, VerifiedUser};
use crate::http::ApiError;
use axum::extract::State;
use axum::{Extension, Json};
use gateway_config::{AuditEvent, WORKTREE_RETENTION};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsBody {
    allowlist_emails: BTreeSet<String>,
    admin_emails: BTreeSet<String>,
}

/// `GET /api/settings`
pub async fn get(
    State(state): State<AppState>,
    Extension(user): Extension<VerifiedUser>,
) -> Json<Value> {
    let settings = state.settings.current();
    Json(json!({
        "allowlistEmails": settings.allowlist_emails,
        "adminEmails": settings.admin_emails,
        "updatedAt": settings.updated_at,
        "updatedBy": settings.updated_by,
        "worktreeRetention": WORKTREE_RETENTION,
        "isAdmin": user.is_admin,
    }))
}

/// `PUT /api/settings`: admin only; rewrites settings.json atomically and
/// reloads the in-memory state.
pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<VerifiedUser>,
    Json(body): Json<UpdateSettingsBody>,
) -> Result<Json<Value>, ApiError> {
    let updated = state
        .settings
        .update(&user.email, body.allowlist_emails, body.admin_emails)?;

    state
        .audit
        .record(AuditEvent::new(&user.email, "settings.update"));

    Ok(Json(json!({
        "allowlistEmails": updated.allowlist_emails,
        "adminEmails": updated.admin_emails,
        "updatedAt": updated.updated_at,
        "updatedBy": updated.updated_by,
        "worktreeRetention": WORKTREE_RETENTION,
    })))
}
