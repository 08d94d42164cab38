//! Request authentication: bearer-token checks and the route guard.

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::auth::{verify_access_token, TokenError};
use crate::server::error::ApiError;
use crate::server::state::SharedState;

/// Authenticated caller, resolved against the live user row so revoked or
/// deactivated accounts are rejected even with a valid token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub email: String,
    pub username: String,
}

/// Check the `Authorization: Bearer` header and load the caller. Used by the
/// [`require_auth`] guard and directly by handlers on mixed-access routes.
pub async fn authenticate(
    state: &SharedState,
    headers: &HeaderMap,
) -> Result<AuthUser, ApiError> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("MISSING_TOKEN", "authorization required"))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::unauthorized("INVALID_TOKEN", "malformed authorization header"))?;

    let st = state.lock().await;
    let claims = verify_access_token(token, &st.config.jwt_secret).map_err(|e| match e {
        TokenError::Expired => ApiError::unauthorized("TOKEN_EXPIRED", "access token expired"),
        TokenError::Invalid => ApiError::unauthorized("INVALID_TOKEN", "invalid access token"),
    })?;

    let user = st
        .storage
        .get_user(claims.sub)?
        .ok_or_else(|| ApiError::unauthorized("USER_NOT_FOUND", "user no longer exists"))?;
    if !user.is_active {
        return Err(ApiError::unauthorized(
            "ACCOUNT_DISABLED",
            "account is deactivated",
        ));
    }

    Ok(AuthUser {
        id: user.id,
        email: user.email,
        username: user.username,
    })
}

/// Route guard for fully protected routers. Inserts [`AuthUser`] into the
/// request extensions on success.
pub async fn require_auth(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticate(&state, request.headers()).await {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}
