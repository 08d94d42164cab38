//! Aggregate per-user statistics.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::json;

use crate::progress::{points_to_next_level, streak_days};
use crate::server::auth::AuthUser;
use crate::server::error::ApiError;
use crate::server::handlers::{now_secs, today_utc};
use crate::server::state::SharedState;
use crate::storage::RecoverySessionRow;

/// Longest streak across all sessions; active sessions count up to `now`,
/// ended sessions up to when they ended.
pub(crate) fn best_streak(sessions: &[RecoverySessionRow], now: i64) -> i64 {
    sessions
        .iter()
        .map(|s| streak_days(s.started_at, s.ended_at.unwrap_or(now)))
        .max()
        .unwrap_or(0)
}

pub async fn user_stats_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response, ApiError> {
    let now = now_secs();
    let today = today_utc();

    let st = state.lock().await;
    let points = st.storage.get_points(user.id)?;
    let total_points = points.as_ref().map(|p| p.total_points).unwrap_or(0);
    let level = points.as_ref().map(|p| p.level).unwrap_or(1);

    let sessions = st.storage.list_sessions(user.id)?;
    let current_streak = sessions
        .iter()
        .filter(|s| s.is_active)
        .map(|s| streak_days(s.started_at, now))
        .max()
        .unwrap_or(0);
    let relapse_count = sessions.iter().filter(|s| !s.is_active).count();

    Ok(Json(json!({
        "totalPoints": total_points,
        "level": level,
        "pointsToNextLevel": points_to_next_level(total_points),
        "tasksCompleted": st.storage.count_completions(user.id)?,
        "tasksCompletedToday": st.storage.count_completions_on(user.id, &today)?,
        "checkins": st.storage.count_checkins(user.id)?,
        "currentStreakDays": current_streak,
        "bestStreakDays": best_streak(&sessions, now),
        "relapseCount": relapse_count,
    }))
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(started_at: i64, ended_at: Option<i64>) -> RecoverySessionRow {
        RecoverySessionRow {
            id: 1,
            user_id: 1,
            addiction_type: "nicotine".to_string(),
            started_at,
            ended_at,
            is_active: ended_at.is_none(),
            relapse_notes: None,
        }
    }

    #[test]
    fn best_streak_spans_active_and_ended_sessions() {
        let now = 1_700_000_000 + 10 * 86_400;
        let sessions = vec![
            session(1_700_000_000, Some(1_700_000_000 + 3 * 86_400)),
            session(1_700_000_000 + 4 * 86_400, None), // 6 days and counting
        ];
        assert_eq!(best_streak(&sessions, now), 6);
        assert_eq!(best_streak(&[], now), 0);
    }
}
