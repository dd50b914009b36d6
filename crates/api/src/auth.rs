use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

use crate::AppState;

/// Bearer-token gate for the `/api` routes. An empty configured token locks
/// the API entirely.
pub async fn require_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let presented = bearer(&headers);
    let accepted = !state.api_token.is_empty()
        && presented.is_some_and(|t| tokens_match(t.as_bytes(), state.api_token.as_bytes()));

    if accepted {
        return next.run(request).await;
    }
    warn!(
        path = %request.uri().path(),
        token_present = presented.is_some(),
        "Rejected API request"
    );
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "unauthorized"})),
    )
        .into_response()
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Compare without short-circuiting on the first differing byte, so response
/// timing does not reveal how much of the token was right.
fn tokens_match(presented: &[u8], expected: &[u8]) -> bool {
    if presented.len() != expected.len() {
        return false;
    }
    presented
        .iter()
        .zip(expected)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
