//! Search HTTP surface.

use crate::app::{existing_access_root, AppState, VerifiedUser};
use crate::http::ApiError;
use axum::extract::State;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchBody {
    repo_id: String,
    query: String,
    #[serde(default)]
    paths: Vec<String>,
    branch: Option<String>,
}

/// `POST /api/search`
pub async fn search(
    State(state): State<AppState>,
    Extension(user): Extension<VerifiedUser>,
    Json(body): Json<SearchBody>,
) -> Result<Json<Value>, ApiError> {
    let repo_root = state.registry.resolve(&body.repo_id)?;
    let root = existing_access_root(&repo_root, &user.email, body.branch.as_deref())?;

    let matches = search_ops::search(&root, &body.query, &body.paths).await?;
    Ok(Json(json!({ "matches": matches })))
}
