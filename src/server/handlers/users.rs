//! User directory and account creation.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::auth::hash_password;
use crate::server::auth::authenticate;
use crate::server::error::ApiError;
use crate::server::extract::JsonBody;
use crate::server::handlers::auth::{user_json, validate_registration};
use crate::server::handlers::now_secs;
use crate::server::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

/// Directory of active users: id, username, points, level. No emails.
/// Authenticated in-handler because POST on the same path is open.
pub async fn list_users_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    authenticate(&state, &headers).await?;

    let st = state.lock().await;
    let mut directory = Vec::new();
    for user in st.storage.list_users()? {
        if !user.is_active {
            continue;
        }
        let points = st.storage.get_points(user.id)?;
        directory.push(json!({
            "id": user.id,
            "username": user.username,
            "points": points.as_ref().map(|p| p.total_points).unwrap_or(0),
            "level": points.as_ref().map(|p| p.level).unwrap_or(1),
        }));
    }
    Ok(Json(json!(directory)).into_response())
}

/// Create an account without issuing tokens. Same validation as register.
pub async fn create_user_handler(
    State(state): State<SharedState>,
    JsonBody(req): JsonBody<CreateUserRequest>,
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

    Ok((StatusCode::CREATED, Json(user_json(&user))).into_response())
}
