//! Recovery sessions: start, list active streaks, record a relapse.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use crate::logging;
use crate::olog;
use crate::progress::streak_days;
use crate::server::auth::AuthUser;
use crate::server::error::ApiError;
use crate::server::extract::JsonBody;
use crate::server::handlers::now_secs;
use crate::server::state::SharedState;
use crate::storage::{RecoverySessionRow, StorageError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRecoveryRequest {
    pub addiction_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelapseRequest {
    pub addiction_type: String,
    pub notes: Option<String>,
}

fn session_json(session: &RecoverySessionRow, now: i64) -> serde_json::Value {
    let streak_end = session.ended_at.unwrap_or(now);
    json!({
        "id": session.id,
        "addictionType": session.addiction_type,
        "startedAt": session.started_at,
        "endedAt": session.ended_at,
        "isActive": session.is_active,
        "streakDays": streak_days(session.started_at, streak_end),
    })
}

fn normalize_addiction_type(raw: &str) -> Result<String, ApiError> {
    let value = raw.trim().to_lowercase();
    if value.is_empty() || value.len() > 64 {
        return Err(ApiError::validation(
            "addictionType must be 1-64 characters",
        ));
    }
    Ok(value)
}

/// Start a streak. At most one active session per addiction type; a second
/// start is a 409.
pub async fn start_recovery_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    JsonBody(req): JsonBody<StartRecoveryRequest>,
) -> Result<Response, ApiError> {
    let addiction_type = normalize_addiction_type(&req.addiction_type)?;
    let now = now_secs();

    let st = state.lock().await;
    let session = st
        .storage
        .insert_recovery_session(user.id, &addiction_type, now)
        .map_err(|e| match e {
            StorageError::AlreadyExists(_) => ApiError::conflict(format!(
                "an active {addiction_type} session already exists"
            )),
            other => other.into(),
        })?;

    olog!(
        "recovery: {} started {} session",
        logging::user_tag(user.id),
        addiction_type
    );
    Ok((StatusCode::CREATED, Json(session_json(&session, now))).into_response())
}

pub async fn active_sessions_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response, ApiError> {
    let now = now_secs();
    let st = state.lock().await;
    let sessions = st.storage.list_active_sessions(user.id)?;
    let body: Vec<_> = sessions.iter().map(|s| session_json(s, now)).collect();
    Ok(Json(json!(body)).into_response())
}

/// Close the active session for an addiction type. The streak ends but the
/// row is kept; best-streak history is computed from ended sessions.
pub async fn relapse_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    JsonBody(req): JsonBody<RelapseRequest>,
) -> Result<Response, ApiError> {
    let addiction_type = normalize_addiction_type(&req.addiction_type)?;
    if let Some(notes) = &req.notes {
        if notes.chars().count() > 1000 {
            return Err(ApiError::validation("notes must be at most 1000 characters"));
        }
    }
    let now = now_secs();

    let st = state.lock().await;
    let session = st
        .storage
        .get_active_session(user.id, &addiction_type)?
        .ok_or_else(|| {
            ApiError::not_found(format!("no active {addiction_type} session"))
        })?;
    st.storage
        .end_recovery_session(session.id, now, req.notes.as_deref())?;

    let final_streak = streak_days(session.started_at, now);
    olog!(
        "recovery: {} relapsed on {} after {} days",
        logging::user_tag(user.id),
        addiction_type,
        final_streak
    );
    Ok(Json(json!({
        "id": session.id,
        "addictionType": addiction_type,
        "startedAt": session.started_at,
        "endedAt": now,
        "isActive": false,
        "streakDays": final_streak,
    }))
    .into_response())
}
