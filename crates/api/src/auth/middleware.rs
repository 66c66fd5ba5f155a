//! Authentication middleware

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use super::{Identity, JwtError};
use crate::{error::ApiError, state::AppState};

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Verify the bearer token, confirm the account is still active and attach
/// the caller's [`Identity`].
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&req).ok_or(ApiError::Unauthorized)?;

    let identity = state.tokens.verify(token).map_err(|e| {
        match &e {
            JwtError::Expired | JwtError::Invalid => {
                tracing::debug!(error = %e, "Rejected bearer token")
            }
            _ => tracing::warn!(error = %e, "Bearer token validation failed"),
        }
        ApiError::InvalidToken
    })?;

    // Deactivation takes effect on the next request, not at token expiry
    match state.find_user(identity.user_id).await? {
        Some(user) if user.is_active => {}
        Some(_) => {
            tracing::info!(user_id = %identity.user_id, "Refused request from deactivated account");
            return Err(ApiError::AccountDisabled);
        }
        None => {
            tracing::warn!(user_id = %identity.user_id, "Valid token for unknown user");
            return Err(ApiError::InvalidToken);
        }
    }

    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}

/// Admit only callers whose token carries the admin claim.
/// Must run after [`require_auth`].
pub async fn require_admin(req: Request, next: Next) -> Result<Response, ApiError> {
    let identity = req
        .extensions()
        .get::<Identity>()
        .ok_or(ApiError::Unauthorized)?;

    if !identity.is_admin {
        tracing::warn!(user_id = %identity.user_id, "Non-admin caller refused on admin route");
        return Err(ApiError::Forbidden);
    }

    Ok(next.run(req).await)
}
