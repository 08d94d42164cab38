//! Route table and middleware layering.
//!
//! Three tiers: `/health` is open and unthrottled; open `/api` routes are
//! rate limited; protected `/api` routes additionally pass the bearer-token
//! guard. Routes where GET and POST differ in access (users, tasks,
//! community posts) authenticate in-handler instead.

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

use crate::server::auth::require_auth;
use crate::server::error::error_envelope;
use crate::server::handlers;
use crate::server::rate_limit::rate_limit_middleware;
use crate::server::state::SharedState;

pub fn build_router(state: SharedState) -> Router {
    let protected = Router::new()
        .route("/api/auth/me", get(handlers::auth::me_handler))
        .route("/api/tasks/daily", get(handlers::tasks::daily_tasks_handler))
        .route(
            "/api/tasks/complete",
            post(handlers::tasks::complete_task_handler),
        )
        .route(
            "/api/mood/checkin",
            get(handlers::mood::get_checkin_handler).post(handlers::mood::post_checkin_handler),
        )
        .route("/api/user/stats", get(handlers::stats::user_stats_handler))
        .route(
            "/api/recovery/start",
            post(handlers::recovery::start_recovery_handler),
        )
        .route(
            "/api/recovery/active",
            get(handlers::recovery::active_sessions_handler),
        )
        .route(
            "/api/recovery/relapse",
            post(handlers::recovery::relapse_handler),
        )
        .route(
            "/api/achievements",
            get(handlers::achievements::achievements_handler),
        )
        .route(
            "/api/notifications",
            get(handlers::notifications::list_handler),
        )
        .route(
            "/api/notifications/register",
            post(handlers::notifications::register_token_handler),
        )
        .route(
            "/api/notifications/send",
            post(handlers::notifications::send_handler),
        )
        .route("/api/ai/chat", post(handlers::ai::chat_handler))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let api = Router::new()
        .route("/api/auth/register", post(handlers::auth::register_handler))
        .route("/api/auth/login", post(handlers::auth::login_handler))
        .route("/api/auth/refresh", post(handlers::auth::refresh_handler))
        .route(
            "/api/users",
            get(handlers::users::list_users_handler).post(handlers::users::create_user_handler),
        )
        .route(
            "/api/tasks",
            get(handlers::tasks::list_tasks_handler).post(handlers::tasks::create_task_handler),
        )
        .route(
            "/api/community/posts",
            get(handlers::community::list_posts_handler)
                .post(handlers::community::create_post_handler),
        )
        .merge(protected)
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware));

    Router::new()
        .route("/health", get(handlers::health::health_handler))
        .merge(api)
        .layer(from_fn_with_state(state.clone(), error_envelope))
        .with_state(state)
}
