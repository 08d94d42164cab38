//! Push token registration and notification dispatch.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use crate::logging;
use crate::olog;
use crate::push::{self, is_valid_push_token, PushMessage};
use crate::server::auth::AuthUser;
use crate::server::error::ApiError;
use crate::server::extract::JsonBody;
use crate::server::handlers::now_secs;
use crate::server::state::SharedState;

const DEFAULT_LIST_LIMIT: u32 = 50;
const MAX_LIST_LIMIT: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct RegisterTokenRequest {
    pub token: String,
    pub platform: Option<String>,
}

/// Fixed notification shapes a client can ask for by name instead of
/// supplying its own title and body.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Template {
    TaskReminder { task_title: String },
    StreakMilestone { addiction_type: String, days: i64 },
    CheckinReminder,
    Motivation,
    CommunityInteraction { username: String },
    AchievementUnlocked { title: String },
}

impl Template {
    fn render(&self) -> PushMessage {
        match self {
            Template::TaskReminder { task_title } => push::task_reminder(task_title),
            Template::StreakMilestone {
                addiction_type,
                days,
            } => push::streak_milestone(addiction_type, *days),
            Template::CheckinReminder => push::checkin_reminder(),
            Template::Motivation => push::motivation(),
            Template::CommunityInteraction { username } => {
                push::community_interaction(username)
            }
            Template::AchievementUnlocked { title } => push::achievement_unlocked(title),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub title: Option<String>,
    pub body: Option<String>,
    pub data: Option<serde_json::Value>,
    pub template: Option<Template>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
}

/// Register a device token for the caller. A token already registered to
/// another account is silently reassigned; devices change hands.
pub async fn register_token_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    JsonBody(req): JsonBody<RegisterTokenRequest>,
) -> Result<Response, ApiError> {
    if !is_valid_push_token(&req.token) {
        return Err(ApiError::validation("not a valid push token"));
    }

    let st = state.lock().await;
    let row = st
        .storage
        .upsert_push_token(user.id, &req.token, req.platform.as_deref(), now_secs())?;

    olog!(
        "push: registered {} for {}",
        logging::token_tag(&row.token),
        logging::user_tag(user.id)
    );
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": row.id,
            "token": row.token,
            "platform": row.platform,
        })),
    )
        .into_response())
}

/// Dispatch a notification to all of the caller's devices. Partial gateway
/// failure never aborts the batch; the outcome is recorded per token and one
/// log row is written per dispatch.
pub async fn send_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    JsonBody(req): JsonBody<SendRequest>,
) -> Result<Response, ApiError> {
    let message = match &req.template {
        Some(template) => template.render(),
        None => {
            let title = req.title.as_deref().unwrap_or("").trim();
            let body = req.body.as_deref().unwrap_or("").trim();
            if title.is_empty() || body.is_empty() {
                return Err(ApiError::validation(
                    "title and body are required unless a template is given",
                ));
            }
            let mut message = PushMessage::new(title, body);
            if let Some(data) = req.data.clone() {
                message = message.with_data(data);
            }
            message
        }
    };

    // Read tokens and grab the dispatcher, then release the lock for the
    // network round trip.
    let (tokens, dispatcher) = {
        let st = state.lock().await;
        let rows = st.storage.list_push_tokens(user.id)?;
        (
            rows.into_iter().map(|r| r.token).collect::<Vec<_>>(),
            Arc::clone(&st.push),
        )
    };
    if tokens.is_empty() {
        return Err(ApiError::not_found("no push tokens registered"));
    }

    let outcome = dispatcher.send_bulk(&tokens, &message);

    let status = if outcome.failed.is_empty() {
        "sent"
    } else {
        "failed"
    };
    let data_str = message.data.as_ref().map(|d| d.to_string());
    {
        let st = state.lock().await;
        st.storage.insert_notification(
            user.id,
            &message.title,
            &message.body,
            data_str.as_deref(),
            status,
            now_secs(),
        )?;
    }

    olog!(
        "push: dispatch for {}: {} sent, {} failed",
        logging::user_tag(user.id),
        outcome.sent.len(),
        outcome.failed.len()
    );
    Ok(Json(json!({
        "status": status,
        "sent": outcome.sent,
        "failed": outcome
            .failed
            .iter()
            .map(|f| json!({ "token": f.token, "reason": f.reason }))
            .collect::<Vec<_>>(),
    }))
    .into_response())
}

/// Dispatch history for the caller, newest first.
pub async fn list_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    let st = state.lock().await;
    let rows = st.storage.list_notifications(user.id, limit)?;
    let body: Vec<_> = rows
        .iter()
        .map(|row| {
            json!({
                "id": row.id,
                "title": row.title,
                "body": row.body,
                "data": row.data,
                "status": row.status,
                "createdAt": row.created_at,
            })
        })
        .collect();
    Ok(Json(json!(body)).into_response())
}
