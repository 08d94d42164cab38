//! API error type and the terminal error-envelope layer.
//!
//! Handlers return [`ApiError`] for every failure. Its `IntoResponse` impl
//! emits a minimal JSON body and stashes the error parts in the response
//! extensions; the outermost [`error_envelope`] layer rewrites the body into
//! the full envelope with request context:
//!
//! ```text
//! { "error": "...", "code": "...", "timestamp": "...", "path": "...", "method": "..." }
//! ```

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::olog;
use crate::server::state::SharedState;
use crate::storage::StorageError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub retry_after: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    /// 401 with a specific code: MISSING_TOKEN, INVALID_TOKEN, TOKEN_EXPIRED,
    /// USER_NOT_FOUND, ACCOUNT_DISABLED, or plain UNAUTHORIZED.
    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, code, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn too_many_requests(retry_after_secs: u64) -> Self {
        let mut err = Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "TOO_MANY_REQUESTS",
            "too many requests, slow down",
        );
        err.retry_after = Some(retry_after_secs);
        err
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "INTERNAL_ERROR", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.status.as_u16(), self.code, self.message)
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(msg) => ApiError::not_found(msg),
            StorageError::AlreadyExists(msg) => ApiError::conflict(msg),
            other => ApiError::internal(other.to_string()),
        }
    }
}

/// Error context carried through response extensions to [`error_envelope`].
#[derive(Debug, Clone)]
pub struct ErrorParts {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub retry_after: Option<u64>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let parts = ErrorParts {
            status: self.status,
            code: self.code,
            message: self.message.clone(),
            retry_after: self.retry_after,
        };
        let body = json!({ "error": self.message, "code": self.code });
        let mut response = (self.status, Json(body)).into_response();
        response.extensions_mut().insert(parts);
        response
    }
}

/// Outermost layer. Passes successful responses through untouched; rewrites
/// tagged error responses into the full envelope, logs 500-class failures,
/// and hides their internal message in production mode.
pub async fn error_envelope(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;
    let Some(parts) = response.extensions().get::<ErrorParts>().cloned() else {
        return response;
    };

    let production = {
        let st = state.lock().await;
        st.config.production
    };

    if parts.status.is_server_error() {
        olog!("{method} {path} failed: {} ({})", parts.message, parts.code);
    }

    let mut body = json!({
        "error": parts.message,
        "code": parts.code,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "path": path,
        "method": method,
    });
    if parts.status.is_server_error() {
        body["error"] = json!("internal server error");
        if !production {
            body["detail"] = json!(parts.message);
        }
    }

    let mut rewritten = (parts.status, Json(body)).into_response();
    if let Some(secs) = parts.retry_after {
        if let Ok(value) = secs.to_string().parse() {
            rewritten.headers_mut().insert("retry-after", value);
        }
    }
    rewritten
}
