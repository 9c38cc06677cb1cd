use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::db::AppState;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

fn key_matches(headers: &HeaderMap, expected: &str) -> bool {
    let Some(provided) = headers.get(ADMIN_KEY_HEADER).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    provided.len() == expected.len() && bool::from(provided.ct_eq(expected))
}

/// Reviewer endpoints answer 404 when no admin key is configured, so an
/// unconfigured deployment looks like it has no admin surface at all.
pub async fn require_admin_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.admin_api_key.as_deref() else {
        return Err(StatusCode::NOT_FOUND);
    };

    if !key_matches(request.headers(), expected) {
        tracing::warn!("Rejected admin request to {}", request.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}
