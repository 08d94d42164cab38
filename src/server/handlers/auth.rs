//! Registration, login, token refresh, and the current-user endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use crate::auth::{hash_password, issue_token_pair, verify_password, verify_refresh_token};
use crate::logging;
use crate::olog;
use crate::server::auth::AuthUser;
use crate::server::error::ApiError;
use crate::server::extract::JsonBody;
use crate::server::handlers::now_secs;
use crate::server::state::SharedState;
use crate::storage::UserRow;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub(crate) fn validate_registration(
    email: &str,
    username: &str,
    password: &str,
) -> Result<(), ApiError> {
    if !email.contains('@') || !email.contains('.') || email.len() > 254 {
        return Err(ApiError::validation("invalid email address"));
    }
    if username.len() < 3 || username.len() > 32 {
        return Err(ApiError::validation(
            "username must be 3-32 characters",
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ApiError::validation(
            "username may only contain letters, digits, '_' and '-'",
        ));
    }
    if password.len() < 8 {
        return Err(ApiError::validation(
            "password must be at least 8 characters",
        ));
    }
    Ok(())
}

pub(crate) fn user_json(user: &UserRow) -> serde_json::Value {
    json!({
        "id": user.id,
        "email": user.email,
        "username": user.username,
        "createdAt": user.created_at,
    })
}

pub async fn register_handler(
    State(state): State<SharedState>,
    JsonBody(req): JsonBody<RegisterRequest>,
) -> Result<Response, ApiError> {
    let email = req.email.trim().to_lowercase();
    let username = req.username.trim().to_string();
    validate_registration(&email, &username, &req.password)?;

    let password_hash =
        hash_password(&req.password).map_err(|e| ApiError::internal(e.to_string()))?;

    let st = state.lock().await;
    let user = st
        .storage
        .insert_user(&email, &username, &password_hash, now_secs())
        .map_err(|e| match e {
            crate::storage::StorageError::AlreadyExists(_) => {
                ApiError::conflict("email or username already registered")
            }
            other => other.into(),
        })?;
    let tokens = issue_token_pair(
        user.id,
        &user.email,
        &user.username,
        &st.config.jwt_secret,
        st.config.access_ttl_secs,
        st.config.refresh_ttl_secs,
    )
    .map_err(|e| ApiError::internal(e.to_string()))?;

    olog!("auth: registered {}", logging::user_tag(user.id));
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "user": user_json(&user),
            "accessToken": tokens.access_token,
            "refreshToken": tokens.refresh_token,
        })),
    )
        .into_response())
}

pub async fn login_handler(
    State(state): State<SharedState>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> Result<Response, ApiError> {
    let email = req.email.trim().to_lowercase();
    let st = state.lock().await;

    let user = st
        .storage
        .get_user_by_email(&email)?
        .ok_or_else(|| ApiError::unauthorized("UNAUTHORIZED", "invalid email or password"))?;
    let valid = verify_password(&user.password_hash, &req.password)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if !valid {
        return Err(ApiError::unauthorized(
            "UNAUTHORIZED",
            "invalid email or password",
        ));
    }
    if !user.is_active {
        return Err(ApiError::unauthorized(
            "ACCOUNT_DISABLED",
            "account is deactivated",
        ));
    }

    let tokens = issue_token_pair(
        user.id,
        &user.email,
        &user.username,
        &st.config.jwt_secret,
        st.config.access_ttl_secs,
        st.config.refresh_ttl_secs,
    )
    .map_err(|e| ApiError::internal(e.to_string()))?;

    olog!("auth: login for {}", logging::user_tag(user.id));
    Ok(Json(json!({
        "user": user_json(&user),
        "accessToken": tokens.access_token,
        "refreshToken": tokens.refresh_token,
    }))
    .into_response())
}

/// Exchange a refresh token for a fresh pair. Both tokens rotate.
pub async fn refresh_handler(
    State(state): State<SharedState>,
    JsonBody(req): JsonBody<RefreshRequest>,
) -> Result<Response, ApiError> {
    let st = state.lock().await;

    let claims =
        verify_refresh_token(&req.refresh_token, &st.config.jwt_secret).map_err(|e| match e {
            crate::auth::TokenError::Expired => {
                ApiError::unauthorized("TOKEN_EXPIRED", "refresh token expired")
            }
            crate::auth::TokenError::Invalid => {
                ApiError::unauthorized("INVALID_TOKEN", "invalid refresh token")
            }
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

    let tokens = issue_token_pair(
        user.id,
        &user.email,
        &user.username,
        &st.config.jwt_secret,
        st.config.access_ttl_secs,
        st.config.refresh_ttl_secs,
    )
    .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(Json(json!({
        "accessToken": tokens.access_token,
        "refreshToken": tokens.refresh_token,
    }))
    .into_response())
}

pub async fn me_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response, ApiError> {
    let st = state.lock().await;
    let row = st
        .storage
        .get_user(user.id)?
        .ok_or_else(|| ApiError::unauthorized("USER_NOT_FOUND", "user no longer exists"))?;
    let points = st.storage.get_points(user.id)?;

    let mut body = user_json(&row);
    body["points"] = json!(points.as_ref().map(|p| p.total_points).unwrap_or(0));
    body["level"] = json!(points.as_ref().map(|p| p.level).unwrap_or(1));
    Ok(Json(body).into_response())
}
