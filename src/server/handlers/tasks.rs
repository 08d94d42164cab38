//! Task catalog, daily task list, and idempotent task completion.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use std::sync::Arc;

use crate::logging;
use crate::olog;
use crate::progress::level_title;
use crate::push::achievement_unlocked;
use crate::server::auth::{authenticate, AuthUser};
use crate::server::error::ApiError;
use crate::server::extract::JsonBody;
use crate::server::handlers::{now_secs, today_utc, valid_date};
use crate::server::state::SharedState;
use crate::storage::{StorageError, TaskRow};

const DEFAULT_TASK_POINTS: i64 = 10;
const MAX_TASK_POINTS: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub points: Option<i64>,
    pub is_daily: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteTaskRequest {
    pub task_id: i64,
    pub completion_date: Option<String>,
}

fn task_json(task: &TaskRow) -> serde_json::Value {
    json!({
        "id": task.id,
        "title": task.title,
        "description": task.description,
        "category": task.category,
        "points": task.points,
        "isDaily": task.is_daily,
    })
}

/// Public task catalog, optionally filtered by category.
pub async fn list_tasks_handler(
    State(state): State<SharedState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Response, ApiError> {
    let st = state.lock().await;
    let tasks = st.storage.list_tasks(query.category.as_deref())?;
    let body: Vec<_> = tasks.iter().map(task_json).collect();
    Ok(Json(json!(body)).into_response())
}

/// Authenticated in-handler because GET on the same path is open.
pub async fn create_task_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    JsonBody(req): JsonBody<CreateTaskRequest>,
) -> Result<Response, ApiError> {
    authenticate(&state, &headers).await?;

    let title = req.title.trim();
    if title.is_empty() || title.chars().count() > 200 {
        return Err(ApiError::validation("title must be 1-200 characters"));
    }
    let points = req.points.unwrap_or(DEFAULT_TASK_POINTS);
    if !(1..=MAX_TASK_POINTS).contains(&points) {
        return Err(ApiError::validation(format!(
            "points must be between 1 and {MAX_TASK_POINTS}"
        )));
    }
    let category = req.category.as_deref().unwrap_or("general");

    let st = state.lock().await;
    let task = st.storage.insert_task(
        title,
        req.description.as_deref(),
        category,
        points,
        req.is_daily.unwrap_or(true),
        now_secs(),
    )?;
    Ok((StatusCode::CREATED, Json(task_json(&task))).into_response())
}

/// Today's daily tasks, each flagged with whether the caller already
/// completed it.
pub async fn daily_tasks_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response, ApiError> {
    let today = today_utc();
    let st = state.lock().await;
    let tasks = st.storage.list_daily_tasks()?;
    let done = st.storage.completed_task_ids(user.id, &today)?;

    let body: Vec<_> = tasks
        .iter()
        .map(|task| {
            let mut item = task_json(task);
            item["completed"] = json!(done.contains(&task.id));
            item
        })
        .collect();
    Ok(Json(json!({ "date": today, "tasks": body })).into_response())
}

/// Complete a task for a calendar day. A repeat completion for the same day
/// is a 409 and awards nothing.
pub async fn complete_task_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    JsonBody(req): JsonBody<CompleteTaskRequest>,
) -> Result<Response, ApiError> {
    let completion_date = match req.completion_date {
        Some(date) => {
            if !valid_date(&date) {
                return Err(ApiError::validation("completionDate must be YYYY-MM-DD"));
            }
            date
        }
        None => today_utc(),
    };

    let (outcome, push_job) = {
        let st = state.lock().await;
        let outcome = st
            .storage
            .complete_task(user.id, req.task_id, &completion_date, now_secs())
            .map_err(|e| match e {
                StorageError::AlreadyExists(_) => {
                    ApiError::conflict("task already completed for this date")
                }
                other => other.into(),
            })?;

        // A level-up that carries an achievement title gets a push to the
        // caller's devices. Tokens and dispatcher are captured here so the
        // lock is not held across the network round trip.
        let mut push_job = None;
        if outcome.level_up {
            if let Some(title) = level_title(outcome.level) {
                let tokens: Vec<String> = st
                    .storage
                    .list_push_tokens(user.id)?
                    .into_iter()
                    .map(|r| r.token)
                    .collect();
                if !tokens.is_empty() {
                    push_job = Some((title, tokens, Arc::clone(&st.push)));
                }
            }
        }
        (outcome, push_job)
    };

    olog!(
        "tasks: {} completed task {} for {} (+{} pts, total {})",
        logging::user_tag(user.id),
        req.task_id,
        completion_date,
        outcome.points_earned,
        outcome.total_points
    );
    if outcome.level_up {
        olog!(
            "tasks: {} reached level {}",
            logging::user_tag(user.id),
            outcome.level
        );
    }

    if let Some((title, tokens, dispatcher)) = push_job {
        let message = achievement_unlocked(title);
        let dispatch = dispatcher.send_bulk(&tokens, &message);
        let status = if dispatch.failed.is_empty() {
            "sent"
        } else {
            "failed"
        };
        let data_str = message.data.as_ref().map(|d| d.to_string());
        let st = state.lock().await;
        // The points are already awarded; a notification hiccup must not
        // turn the completion into an error.
        if let Err(e) = st.storage.insert_notification(
            user.id,
            &message.title,
            &message.body,
            data_str.as_deref(),
            status,
            now_secs(),
        ) {
            olog!("push: failed to record achievement notification: {e}");
        }
        olog!(
            "push: achievement dispatch for {}: {} sent, {} failed",
            logging::user_tag(user.id),
            dispatch.sent.len(),
            dispatch.failed.len()
        );
    }

    Ok(Json(json!({
        "pointsEarned": outcome.points_earned,
        "totalPoints": outcome.total_points,
        "level": outcome.level,
        "levelUp": outcome.level_up,
        "completionDate": completion_date,
    }))
    .into_response())
}
