//! Daily mood check-ins: one row per user per UTC day, updated in place.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use crate::server::auth::AuthUser;
use crate::server::error::ApiError;
use crate::server::extract::JsonBody;
use crate::server::handlers::{now_secs, today_utc, valid_date};
use crate::server::state::SharedState;
use crate::storage::DailyCheckinRow;

#[derive(Debug, Deserialize)]
pub struct CheckinQuery {
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckinRequest {
    pub mood: i64,
    pub energy: Option<i64>,
    pub stress: Option<i64>,
    pub notes: Option<String>,
    pub date: Option<String>,
}

fn checkin_json(row: &DailyCheckinRow) -> serde_json::Value {
    json!({
        "id": row.id,
        "date": row.checkin_date,
        "mood": row.mood,
        "energy": row.energy,
        "stress": row.stress,
        "notes": row.notes,
    })
}

fn valid_scale(value: i64) -> bool {
    (1..=10).contains(&value)
}

pub async fn get_checkin_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<CheckinQuery>,
) -> Result<Response, ApiError> {
    let date = match query.date {
        Some(date) => {
            if !valid_date(&date) {
                return Err(ApiError::validation("date must be YYYY-MM-DD"));
            }
            date
        }
        None => today_utc(),
    };

    let st = state.lock().await;
    let row = st
        .storage
        .get_checkin(user.id, &date)?
        .ok_or_else(|| ApiError::not_found(format!("no check-in for {date}")))?;
    Ok(Json(checkin_json(&row)).into_response())
}

/// Record or revise the day's check-in. 201 on first write for the day,
/// 200 on a same-day update; the row id stays stable across updates.
pub async fn post_checkin_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    JsonBody(req): JsonBody<CheckinRequest>,
) -> Result<Response, ApiError> {
    if !valid_scale(req.mood) {
        return Err(ApiError::validation("mood must be between 1 and 10"));
    }
    for (name, value) in [("energy", req.energy), ("stress", req.stress)] {
        if let Some(v) = value {
            if !valid_scale(v) {
                return Err(ApiError::validation(format!(
                    "{name} must be between 1 and 10"
                )));
            }
        }
    }
    if let Some(notes) = &req.notes {
        if notes.chars().count() > 1000 {
            return Err(ApiError::validation("notes must be at most 1000 characters"));
        }
    }
    let date = match req.date {
        Some(date) => {
            if !valid_date(&date) {
                return Err(ApiError::validation("date must be YYYY-MM-DD"));
            }
            date
        }
        None => today_utc(),
    };

    let st = state.lock().await;
    let (row, created) = st.storage.upsert_checkin(
        user.id,
        &date,
        req.mood,
        req.energy,
        req.stress,
        req.notes.as_deref(),
        now_secs(),
    )?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let mut body = checkin_json(&row);
    body["created"] = json!(created);
    Ok((status, Json(body)).into_response())
}
