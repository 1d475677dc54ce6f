//! Repo discovery surface.

use crate::app::{AppState, VerifiedUser};
use axum::extract::State;
use axum::{Extension, Json};
use serde_json::{json, Value};

/// `GET /api/repos`
pub async fn list(
    State(state): State<AppState>,
    Extension(_user): Extension<VerifiedUser>,
) -> Json<Value> {
    Json(json!({ "repos": state.registry.discover() }))
}
