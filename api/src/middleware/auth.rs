use axum::{
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};
use common::errors::AuthError;

use crate::handlers::ErrorResponse;
use crate::state::AppState;

/// Authentication middleware that validates bearer tokens
///
/// Inserts the resolved `Caller` into request extensions for the handlers.
#[tracing::instrument(skip(state, req, next))]
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ErrorResponse> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            tracing::warn!("Missing or malformed authorization header");
            ErrorResponse::from(AuthError::MissingCredential)
        })?;

    let caller = state
        .jwt
        .resolve_caller(token, state.config.scheduling.global_sharing)?;
    tracing::debug!(user_id = %caller.user_id, "Caller authenticated");

    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}
