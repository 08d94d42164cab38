//! HTTP handlers, one module per route group.

pub mod achievements;
pub mod ai;
pub mod auth;
pub mod community;
pub mod health;
pub mod mood;
pub mod notifications;
pub mod recovery;
pub mod stats;
pub mod tasks;
pub mod users;

/// Current unix time in seconds.
pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Today's date in UTC as `YYYY-MM-DD`. All calendar bucketing (check-ins,
/// task completions) uses UTC days.
pub(crate) fn today_utc() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

/// Strict `YYYY-MM-DD` validation for client-supplied dates.
pub(crate) fn valid_date(s: &str) -> bool {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}
