use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::server::state::SharedState;

/// Liveness probe. Outside the `/api` prefix and never rate limited.
pub async fn health_handler(State(state): State<SharedState>) -> Response {
    let st = state.lock().await;
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": st.started_at.elapsed().as_secs(),
    }))
    .into_response()
}
