//! Identity middleware.
//!
//! Runs before every `/api` handler: verifies the edge token (or dev
//! identity), enforces the allowlist, and attaches a [`VerifiedUser`] to
//! the request. WebSocket endpoints reuse [`identify_request`] directly so
//! they can close with protocol codes instead of HTTP statuses.

use crate::app::{AppState, VerifiedUser};
use crate::http::ApiError;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use identity_gate::{check_allowlisted, ACCESS_TOKEN_HEADER, DEV_EMAIL_HEADER};

/// Resolve and authorize the identity on a request.
pub async fn identify_request(
    state: &AppState,
    headers: &HeaderMap,
    query_email: Option<&str>,
) -> Result<VerifiedUser, ApiError> {
    let email = match headers
        .get(ACCESS_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        Some(token) => state.gate.verify_token(token).await?,
        None => {
            let dev_email = headers
                .get(DEV_EMAIL_HEADER)
                .and_then(|value| value.to_str().ok())
                .or(query_email);
            state.gate.dev_identity(dev_email)?
        }
    };

    let settings = state.settings.current();
    check_allowlisted(&email, &settings.allowlist_emails)?;

    Ok(VerifiedUser {
        is_admin: state.settings.is_admin(&email),
        email,
    })
}

/// axum middleware wrapping [`identify_request`].
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let query_email = query_param(request.uri().query(), "email");
    let user = identify_request(&state, request.headers(), query_email.as_deref()).await?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Minimal query-string lookup; identity is the only place the middleware
/// needs it, the handlers use typed extractors.
fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    let query = query?;
    for pair in query.split('&') {
        if let Some((k, v)) = pair.split_once('=') {
            if k == key {
                return Some(v.replace("%40", "@").replace('+', " "));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_param_finds_email() {
        assert_eq!(
            query_param(Some("repoId=r/demo&email=u%40x.com"), "email"),
            Some("u@x.com".to_string())
        );
        assert_eq!(query_param(Some("repoId=r/demo"), "email"), None);
        assert_eq!(query_param(None, "email"), None);
    }
}
