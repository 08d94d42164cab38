//! API client and persistent CLI session.
//!
//! [`SessionStore`] keeps the logged-in user, token pair, cached stats, and
//! the last error in a JSON file so state survives between CLI invocations.
//! The file is read lazily on first access and written back after every
//! mutation. HTTP is behind the [`ApiTransport`] seam so tests can script
//! responses without a server.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug)]
pub enum ClientError {
    /// Transport-level failure: connection refused, timeout, bad JSON.
    Http(String),
    /// The server answered with an error envelope.
    Api {
        status: u16,
        code: String,
        message: String,
    },
    Io(std::io::Error),
    /// Operation needs a session that does not exist.
    NotLoggedIn,
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Http(error) => write!(f, "http error: {error}"),
            ClientError::Api {
                status,
                code,
                message,
            } => write!(f, "api error {status} {code}: {message}"),
            ClientError::Io(error) => write!(f, "io error: {error}"),
            ClientError::NotLoggedIn => write!(f, "not logged in"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<std::io::Error> for ClientError {
    fn from(error: std::io::Error) -> Self {
        ClientError::Io(error)
    }
}

/// HTTP seam. `token` carries the bearer access token when the call is
/// authenticated.
pub trait ApiTransport: Send {
    fn get_json(&self, path: &str, token: Option<&str>) -> Result<Value, ClientError>;
    fn post_json(
        &self,
        path: &str,
        body: &Value,
        token: Option<&str>,
    ) -> Result<Value, ClientError>;
}

/// Blocking transport over ureq.
pub struct HttpTransport {
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }

    fn build(&self, method: &str, path: &str, token: Option<&str>) -> ureq::Request {
        let url = format!("{}{}", self.base_url, path);
        let request = ureq::request(method, &url);
        match token {
            Some(token) => request.set("Authorization", &format!("Bearer {token}")),
            None => request,
        }
    }

    fn dispatch(&self, request: ureq::Request, body: Option<&Value>) -> Result<Value, ClientError> {
        let result = match body {
            Some(body) => request.send_json(body.clone()),
            None => request.call(),
        };
        match result {
            Ok(response) => response
                .into_json()
                .map_err(|e| ClientError::Http(format!("malformed response: {e}"))),
            Err(ureq::Error::Status(status, response)) => {
                let envelope: Value = response.into_json().unwrap_or_else(|_| json!({}));
                Err(ClientError::Api {
                    status,
                    code: envelope["code"].as_str().unwrap_or("UNKNOWN").to_string(),
                    message: envelope["error"]
                        .as_str()
                        .unwrap_or("unexpected server error")
                        .to_string(),
                })
            }
            Err(e) => Err(ClientError::Http(e.to_string())),
        }
    }
}

impl ApiTransport for HttpTransport {
    fn get_json(&self, path: &str, token: Option<&str>) -> Result<Value, ClientError> {
        self.dispatch(self.build("GET", path, token), None)
    }

    fn post_json(
        &self,
        path: &str,
        body: &Value,
        token: Option<&str>,
    ) -> Result<Value, ClientError> {
        self.dispatch(self.build("POST", path, token), Some(body))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionUser {
    pub id: i64,
    pub email: String,
    pub username: String,
}

/// Session state persisted between CLI invocations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionState {
    pub user: Option<SessionUser>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub authenticated: bool,
    pub cached_stats: Option<Value>,
    pub last_error: Option<String>,
}

pub struct SessionStore {
    path: PathBuf,
    transport: Box<dyn ApiTransport>,
    state: Option<SessionState>,
}

impl SessionStore {
    pub fn new(path: PathBuf, transport: Box<dyn ApiTransport>) -> Self {
        Self {
            path,
            transport,
            state: None,
        }
    }

    /// Current state, restoring from disk on first access. A missing or
    /// unreadable file yields a fresh logged-out state.
    pub fn state(&mut self) -> &SessionState {
        self.loaded()
    }

    fn loaded(&mut self) -> &mut SessionState {
        if self.state.is_none() {
            let restored = fs::read_to_string(&self.path)
                .ok()
                .and_then(|raw| serde_json::from_str(&raw).ok())
                .unwrap_or_default();
            self.state = Some(restored);
        }
        self.state.get_or_insert_with(SessionState::default)
    }

    fn persist(&self) -> Result<(), ClientError> {
        let Some(state) = &self.state else {
            return Ok(());
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let raw = serde_json::to_string_pretty(state)
            .map_err(|e| ClientError::Http(format!("serialize session: {e}")))?;
        fs::write(&self.path, raw)?;
        Ok(())
    }

    fn apply_auth_response(&mut self, response: &Value) -> Result<SessionUser, ClientError> {
        let user = SessionUser {
            id: response["user"]["id"].as_i64().unwrap_or(0),
            email: response["user"]["email"].as_str().unwrap_or("").to_string(),
            username: response["user"]["username"]
                .as_str()
                .unwrap_or("")
                .to_string(),
        };
        let state = self.loaded();
        state.user = Some(user.clone());
        state.access_token = response["accessToken"].as_str().map(|s| s.to_string());
        state.refresh_token = response["refreshToken"].as_str().map(|s| s.to_string());
        state.authenticated = state.access_token.is_some();
        state.last_error = None;
        self.persist()?;
        Ok(user)
    }

    fn record_failure(&mut self, error: &ClientError) {
        let state = self.loaded();
        state.last_error = Some(error.to_string());
        if matches!(error, ClientError::Api { status: 401, .. }) {
            state.authenticated = false;
        }
        let _ = self.persist();
    }

    pub fn register(
        &mut self,
        email: &str,
        username: &str,
        password: &str,
    ) -> Result<SessionUser, ClientError> {
        let body = json!({ "email": email, "username": username, "password": password });
        match self.transport.post_json("/api/auth/register", &body, None) {
            Ok(response) => self.apply_auth_response(&response),
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    pub fn login(&mut self, email: &str, password: &str) -> Result<SessionUser, ClientError> {
        let body = json!({ "email": email, "password": password });
        match self.transport.post_json("/api/auth/login", &body, None) {
            Ok(response) => self.apply_auth_response(&response),
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    /// Rotate the token pair using the stored refresh token.
    pub fn refresh(&mut self) -> Result<(), ClientError> {
        let refresh_token = self
            .loaded()
            .refresh_token
            .clone()
            .ok_or(ClientError::NotLoggedIn)?;
        let body = json!({ "refreshToken": refresh_token });
        match self.transport.post_json("/api/auth/refresh", &body, None) {
            Ok(response) => {
                let state = self.loaded();
                state.access_token = response["accessToken"].as_str().map(|s| s.to_string());
                state.refresh_token = response["refreshToken"].as_str().map(|s| s.to_string());
                state.authenticated = state.access_token.is_some();
                state.last_error = None;
                self.persist()
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    /// Drop the local session. Tokens are stateless, so logout is purely a
    /// client-side operation.
    pub fn logout(&mut self) -> Result<(), ClientError> {
        self.state = Some(SessionState::default());
        self.persist()
    }

    pub fn me(&mut self) -> Result<Value, ClientError> {
        self.authed_get("/api/auth/me")
    }

    /// Fetch `/api/user/stats` and cache the result in the session file.
    pub fn fetch_stats(&mut self) -> Result<Value, ClientError> {
        let stats = self.authed_get("/api/user/stats")?;
        let state = self.loaded();
        state.cached_stats = Some(stats.clone());
        self.persist()?;
        Ok(stats)
    }

    /// Authenticated GET with one transparent refresh-and-retry on an
    /// expired access token.
    pub fn authed_get(&mut self, path: &str) -> Result<Value, ClientError> {
        let token = self.access_token()?;
        match self.transport.get_json(path, Some(&token)) {
            Ok(response) => Ok(response),
            Err(e) if is_expired(&e) => {
                self.refresh()?;
                let token = self.access_token()?;
                self.transport.get_json(path, Some(&token))
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    /// Authenticated POST with the same refresh-and-retry behavior.
    pub fn authed_post(&mut self, path: &str, body: &Value) -> Result<Value, ClientError> {
        let token = self.access_token()?;
        match self.transport.post_json(path, body, Some(&token)) {
            Ok(response) => Ok(response),
            Err(e) if is_expired(&e) => {
                self.refresh()?;
                let token = self.access_token()?;
                self.transport.post_json(path, body, Some(&token))
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    /// Unauthenticated GET, for public routes.
    pub fn public_get(&mut self, path: &str) -> Result<Value, ClientError> {
        self.transport.get_json(path, None)
    }

    fn access_token(&mut self) -> Result<String, ClientError> {
        self.loaded()
            .access_token
            .clone()
            .ok_or(ClientError::NotLoggedIn)
    }
}

fn is_expired(error: &ClientError) -> bool {
    matches!(error, ClientError::Api { code, .. } if code == "TOKEN_EXPIRED")
}
