//! Achievement evaluation against the caller's progress.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::json;

use crate::progress::{achievements_for, ProgressSnapshot};
use crate::server::auth::AuthUser;
use crate::server::error::ApiError;
use crate::server::handlers::now_secs;
use crate::server::handlers::stats::best_streak;
use crate::server::state::SharedState;

/// The fixed catalog with per-entry unlocked flags. Nothing is stored;
/// achievements are re-derived from progress on every call.
pub async fn achievements_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response, ApiError> {
    let now = now_secs();
    let st = state.lock().await;

    let snapshot = ProgressSnapshot {
        total_points: st
            .storage
            .get_points(user.id)?
            .map(|p| p.total_points)
            .unwrap_or(0),
        completions: st.storage.count_completions(user.id)?,
        checkins: st.storage.count_checkins(user.id)?,
        best_streak_days: best_streak(&st.storage.list_sessions(user.id)?, now),
    };

    let achievements = achievements_for(&snapshot);
    let unlocked = achievements.iter().filter(|a| a.unlocked).count();
    Ok(Json(json!({
        "unlocked": unlocked,
        "total": achievements.len(),
        "achievements": achievements,
    }))
    .into_response())
}
