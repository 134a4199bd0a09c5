//! Security middleware for axum.
//!
//! Converts the incoming HTTP request into a pipeline `Request`, runs the
//! matching firewall and either answers directly or forwards the request
//! with the `Token` in its extensions.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{Request as HttpRequest, State},
    http::{header::SET_COOKIE, request::Parts, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response as HttpResponse},
};
use moka::sync::Cache;
use uuid::Uuid;

use crate::config::{SecurityConfig, SessionConfig};
use crate::error::{ConfigurationError, ShieldError};
use crate::request::{Request, Session};
use crate::security::Security;

/// Cookie carrying the session id.
pub const SESSION_COOKIE: &str = "SHIELDSESSID";

/// Bodies larger than this are rejected.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Process-local session storage keyed by session id.
///
/// Sessions idle for longer than the ttl are evicted, as are the least
/// recently used ones once the capacity is reached.
pub struct SessionStore {
    sessions: Cache<String, Session>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(ttl: Duration, max_sessions: u64) -> Self {
        Self {
            sessions: Cache::builder()
                .time_to_idle(ttl)
                .max_capacity(max_sessions)
                .build(),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::with_limits(Duration::from_secs(config.ttl), config.max_sessions)
    }

    pub fn load(&self, id: &str) -> Option<Session> {
        self.sessions.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn save(&self, id: &str, session: Session) {
        self.sessions.insert(id.to_string(), session);
    }

    pub fn remove(&self, id: &str) {
        self.sessions.invalidate(id);
    }

    pub fn len(&self) -> usize {
        self.sessions.run_pending_tasks();
        self.sessions.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// State of the security middleware.
#[derive(Clone)]
pub struct SecurityState {
    pub security: Arc<Security>,
    pub sessions: Arc<SessionStore>,
    /// Request headers copied into server variables.
    trusted_headers: Arc<Vec<(HeaderName, String)>>,
}

impl SecurityState {
    pub fn new(security: Arc<Security>) -> Self {
        Self {
            security,
            sessions: Arc::new(SessionStore::new()),
            trusted_headers: Arc::new(Vec::new()),
        }
    }

    /// Session limits and trusted headers from `config`.
    pub fn from_config(
        security: Arc<Security>,
        config: &SecurityConfig,
    ) -> Result<Self, ConfigurationError> {
        let mut state = Self::new(security)
            .with_sessions(Arc::new(SessionStore::from_config(&config.session)));
        for trusted in &config.trusted_headers {
            state = state.with_server_header(&trusted.header, trusted.variable.clone())?;
        }
        Ok(state)
    }

    pub fn with_sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    /// Expose request header `header` as server variable `variable`, the
    /// way a TLS terminator or SSO proxy passes `SSL_CLIENT_S_DN` or
    /// `REMOTE_USER`.
    pub fn with_server_header(
        mut self,
        header: &str,
        variable: impl Into<String>,
    ) -> Result<Self, ConfigurationError> {
        let name = HeaderName::from_bytes(header.as_bytes()).map_err(|e| {
            ConfigurationError::InvalidHeader {
                header: header.to_string(),
                reason: e.to_string(),
            }
        })?;
        Arc::make_mut(&mut self.trusted_headers).push((name, variable.into()));
        Ok(self)
    }
}

/// Run the firewall pipeline in front of the wrapped routes.
///
/// Use with `axum::middleware::from_fn_with_state`.
pub async fn firewall(
    State(state): State<SecurityState>,
    request: HttpRequest,
    next: Next,
) -> HttpResponse {
    let (mut parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to read request body");
            return ShieldError::BadRequest("Request body could not be read".to_string())
                .into_response();
        }
    };

    let mut request = pipeline_request(&parts, &bytes, &state.trusted_headers);
    let session_id = request.cookie(SESSION_COOKIE);
    request.session = Some(
        session_id
            .as_deref()
            .and_then(|id| state.sessions.load(id))
            .unwrap_or_default(),
    );

    let outcome = state
        .security
        .handle(&mut request)
        .and_then(|response| match response {
            Some(response) => Ok(Some(response)),
            // handlers get the token itself, deferred listeners run now
            None => state.security.token(&mut request).map(|_| None),
        });

    let mut cookies = std::mem::take(&mut request.response_cookies);
    if let Some(cookie) = persist_session(&state.sessions, session_id, request.session.take()) {
        cookies.push(cookie);
    }

    let response = match outcome {
        Ok(Some(response)) => response.into_response(),
        Ok(None) => {
            if let Some(token) = request.token() {
                parts.extensions.insert(token.clone());
            }
            next.run(HttpRequest::from_parts(parts, Body::from(bytes))).await
        }
        Err(e) => {
            if !matches!(e, ShieldError::LazyResponse(_)) {
                tracing::error!(error = %e, path = %request.path, "Security pipeline failed");
            }
            e.into_response()
        }
    };

    with_cookies(response, cookies)
}

fn pipeline_request(parts: &Parts, body: &Bytes, trusted: &[(HeaderName, String)]) -> Request {
    let uri = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let mut request = Request::new(parts.method.clone(), uri);
    request.headers = parts.headers.clone();
    request.body = String::from_utf8_lossy(body).into_owned();
    for (header, variable) in trusted {
        if let Some(value) = parts.headers.get(header).and_then(|v| v.to_str().ok()) {
            request.server.insert(variable.clone(), value.to_string());
        }
    }
    request
}

/// Store the session, returning a cookie when a new id was issued.
///
/// A session flagged for migration moves to a new id and the old entry is
/// dropped.
fn persist_session(store: &SessionStore, id: Option<String>, session: Option<Session>) -> Option<String> {
    let mut session = session.unwrap_or_default();
    let migrate = session.take_migration();
    match id.filter(|id| store.contains(id)) {
        Some(id) if !migrate => {
            store.save(&id, session);
            None
        }
        Some(id) => {
            store.remove(&id);
            tracing::debug!("Session migrated to a new id");
            Some(issue_session(store, session))
        }
        None if session.is_empty() => None,
        None => Some(issue_session(store, session)),
    }
}

fn issue_session(store: &SessionStore, session: Session) -> String {
    let id = Uuid::new_v4().to_string();
    store.save(&id, session);
    format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, id)
}

fn with_cookies(mut response: HttpResponse, cookies: Vec<String>) -> HttpResponse {
    for cookie in cookies {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => tracing::warn!(error = %e, "Dropped invalid cookie"),
        }
    }
    response
}
