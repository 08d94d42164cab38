//! Supportive chat. Proxies to an AI backend when one is configured and
//! falls back to canned encouragement otherwise, so the endpoint always
//! answers.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use crate::olog;
use crate::server::auth::AuthUser;
use crate::server::error::ApiError;
use crate::server::extract::JsonBody;
use crate::server::state::SharedState;

const MAX_MESSAGE_LENGTH: usize = 2000;

const CANNED_REPLIES: &[&str] = &[
    "That sounds hard. Remember why you started, and take it one day at a time.",
    "Cravings pass. Try a short walk or a glass of water and check back in.",
    "You've already made it this far. That counts for a lot.",
    "Be kind to yourself today. Progress is rarely a straight line.",
    "Reaching out is a strength, not a weakness. Keep going.",
];

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Prior conversation turns, passed through to the backend untouched.
    pub history: Option<serde_json::Value>,
}

pub async fn chat_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    JsonBody(req): JsonBody<ChatRequest>,
) -> Result<Response, ApiError> {
    let message = req.message.trim();
    if message.is_empty() || message.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(ApiError::validation(format!(
            "message must be 1-{MAX_MESSAGE_LENGTH} characters"
        )));
    }

    let base_url = {
        let st = state.lock().await;
        st.config.ai_base_url.clone()
    };

    let reply = match base_url {
        Some(base) => forward_chat(&base, message, req.history)?,
        None => canned_reply(message).to_string(),
    };

    Ok(Json(json!({ "reply": reply })).into_response())
}

fn forward_chat(
    base_url: &str,
    message: &str,
    history: Option<serde_json::Value>,
) -> Result<String, ApiError> {
    let url = format!("{}/chat", base_url.trim_end_matches('/'));
    let response = ureq::post(&url)
        .send_json(json!({ "message": message, "history": history }))
        .map_err(|e| {
            olog!("ai: backend request failed: {e}");
            ApiError::bad_gateway("chat backend unavailable")
        })?;
    let body: serde_json::Value = response
        .into_json()
        .map_err(|_| ApiError::bad_gateway("chat backend returned malformed response"))?;
    body["reply"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| ApiError::bad_gateway("chat backend returned no reply"))
}

/// Deterministic pick so the same message gets the same reply.
fn canned_reply(message: &str) -> &'static str {
    let hash: usize = message
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    CANNED_REPLIES[hash % CANNED_REPLIES.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canned_replies_are_deterministic() {
        let a = canned_reply("I'm struggling today");
        let b = canned_reply("I'm struggling today");
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }
}
