//! Community feed: public reading, authenticated posting.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::server::auth::authenticate;
use crate::server::error::ApiError;
use crate::server::extract::JsonBody;
use crate::server::handlers::now_secs;
use crate::server::state::SharedState;

const DEFAULT_POST_LIMIT: u32 = 20;
const MAX_POST_LIMIT: u32 = 100;
const MAX_POST_LENGTH: usize = 2000;

#[derive(Debug, Deserialize)]
pub struct ListPostsQuery {
    pub category: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub content: String,
    pub category: Option<String>,
}

/// Public feed, newest first. With a valid bearer token each post carries a
/// `mine` flag; anonymous callers see `mine: false` everywhere.
pub async fn list_posts_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<ListPostsQuery>,
) -> Result<Response, ApiError> {
    let caller = authenticate(&state, &headers).await.ok();
    let limit = query.limit.unwrap_or(DEFAULT_POST_LIMIT).min(MAX_POST_LIMIT);

    let st = state.lock().await;
    let posts = st.storage.list_posts(query.category.as_deref(), limit)?;
    let body: Vec<_> = posts
        .iter()
        .map(|post| {
            json!({
                "id": post.id,
                "username": post.username,
                "content": post.content,
                "category": post.category,
                "createdAt": post.created_at,
                "mine": caller.as_ref().is_some_and(|u| u.id == post.user_id),
            })
        })
        .collect();
    Ok(Json(json!(body)).into_response())
}

pub async fn create_post_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    JsonBody(req): JsonBody<CreatePostRequest>,
) -> Result<Response, ApiError> {
    let user = authenticate(&state, &headers).await?;

    let content = req.content.trim();
    if content.is_empty() || content.chars().count() > MAX_POST_LENGTH {
        return Err(ApiError::validation(format!(
            "content must be 1-{MAX_POST_LENGTH} characters"
        )));
    }
    let category = req.category.as_deref().unwrap_or("general");

    let st = state.lock().await;
    let post = st
        .storage
        .insert_post(user.id, content, category, now_secs())?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": post.id,
            "username": user.username,
            "content": post.content,
            "category": post.category,
            "createdAt": post.created_at,
            "mine": true,
        })),
    )
        .into_response())
}
