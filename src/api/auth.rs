//! Bearer key guard for the thread admin endpoints

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::Response,
};

use super::{ApiError, ApiState, error_response};

/// Token from `Authorization: Bearer <token>`, scheme matched case-insensitively
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Reject admin requests without the configured key
///
/// With no `CREDIFLEX_API_KEY` set the admin surface is open, which is only
/// meant for local development.
pub async fn require_api_key(
    State(state): State<Arc<ApiState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    match bearer_token(req.headers()) {
        Some(token) if token == expected => Ok(next.run(req).await),
        provided => {
            tracing::warn!(
                path = %req.uri().path(),
                key_present = provided.is_some(),
                "rejected thread admin request"
            );
            Err(error_response(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "a valid bearer API key is required",
            ))
        }
    }
}
