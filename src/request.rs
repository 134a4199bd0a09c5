//! Per-request context threaded through the pipeline.
//!
//! Everything mutable during one request lives here: the current token, the
//! session bag, cached support decisions and cookies to set on the way out.
//! Authenticators, voters and firewalls stay immutable and shared.

use std::collections::HashMap;

use axum::http::{header, Extensions, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};

use crate::domain::Token;

/// Holds the token of the request being processed.
#[derive(Debug, Clone, Default)]
pub struct TokenStorage {
    token: Option<Token>,
}

impl TokenStorage {
    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    pub fn set_token(&mut self, token: Token) {
        self.token = Some(token);
    }

    pub fn clear(&mut self) -> Option<Token> {
        self.token.take()
    }
}

/// Session values loaded and persisted by the transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    values: HashMap<String, serde_json::Value>,
    /// Set when the transport must move the values to a fresh id.
    #[serde(skip)]
    migrate: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Keep the values but require a new session id.
    pub fn migrate(&mut self) {
        self.migrate = true;
    }

    pub fn needs_migration(&self) -> bool {
        self.migrate
    }

    /// Clear the migration flag, returning whether it was set.
    pub fn take_migration(&mut self) -> bool {
        std::mem::take(&mut self.migrate)
    }
}

/// A request as seen by the security layer.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub path: String,
    /// Raw query string, without the `?`.
    pub query_string: String,
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: String,
    /// Server variables set by the front server (SSL_CLIENT_S_DN, REMOTE_USER...).
    pub server: HashMap<String, String>,
    /// Typed, request-scoped cache (support decisions, derived values).
    pub attributes: Extensions,
    pub session: Option<Session>,
    pub token_storage: TokenStorage,
    /// `Set-Cookie` values to add to whatever response ends the request.
    pub response_cookies: Vec<String>,
}

impl Request {
    /// Build a request from a method and a path with optional query string.
    pub fn new(method: Method, uri: &str) -> Self {
        let (path, query_string) = match uri.split_once('?') {
            Some((path, query)) => (path.to_string(), query.to_string()),
            None => (uri.to_string(), String::new()),
        };

        Self {
            method,
            path,
            query: parse_urlencoded(&query_string),
            query_string,
            headers: HeaderMap::new(),
            body: String::new(),
            server: HashMap::new(),
            attributes: Extensions::new(),
            session: None,
            token_storage: TokenStorage::default(),
            response_cookies: Vec::new(),
        }
    }

    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: &str) -> Self {
        Self::new(Method::POST, uri)
    }

    /// Add a header; invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a urlencoded form body and matching content type.
    pub fn with_form(self, fields: &[(&str, &str)]) -> Self {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter())
            .finish();
        self.with_header("content-type", "application/x-www-form-urlencoded")
            .with_body(body)
    }

    pub fn with_server_var(mut self, name: &str, value: &str) -> Self {
        self.server.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_token(mut self, token: Token) -> Self {
        self.token_storage.set_token(token);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Path plus query string, as requested.
    pub fn path_and_query(&self) -> String {
        if self.query_string.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query_string)
        }
    }

    /// Whether the method is safe to replay (`GET`, `HEAD`).
    pub fn is_method_cacheable(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE.as_str())
    }

    /// Whether the body is declared as JSON (`application/json`, `*+json`).
    pub fn is_json(&self) -> bool {
        self.content_type()
            .map(|ct| {
                let mime = ct.split(';').next().unwrap_or("").trim();
                mime.ends_with("/json") || mime.ends_with("+json")
            })
            .unwrap_or(false)
    }

    pub fn is_form(&self) -> bool {
        self.content_type()
            .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false)
    }

    /// Urlencoded body fields; empty for other content types.
    pub fn form(&self) -> HashMap<String, String> {
        if self.is_form() {
            parse_urlencoded(&self.body)
        } else {
            HashMap::new()
        }
    }

    /// A request cookie by name.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    pub fn token(&self) -> Option<&Token> {
        self.token_storage.token()
    }
}

fn parse_urlencoded(input: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(input.as_bytes())
        .into_owned()
        .collect()
}

/// A response produced by the security layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// A `302 Found` redirect.
    pub fn redirect(location: &str) -> Self {
        Self::new(StatusCode::FOUND).with_header(header::LOCATION.as_str(), location)
    }

    pub fn json(status: StatusCode, body: &serde_json::Value) -> Self {
        Self {
            body: Some(body.to_string()),
            ..Self::new(status)
        }
        .with_header(header::CONTENT_TYPE.as_str(), "application/json")
    }

    /// Add a header; invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn is_redirect(&self) -> bool {
        self.status.is_redirection()
    }
}

impl axum::response::IntoResponse for Response {
    fn into_response(self) -> axum::response::Response {
        let mut response = (self.status, self.body.unwrap_or_default()).into_response();
        response.headers_mut().extend(self.headers);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_is_parsed() {
        let request = Request::get("/login/check?user=alice&expires=10");
        assert_eq!(request.path, "/login/check");
        assert_eq!(request.query.get("user").map(String::as_str), Some("alice"));
        assert_eq!(request.query.get("expires").map(String::as_str), Some("10"));
        assert_eq!(request.path_and_query(), "/login/check?user=alice&expires=10");
        assert_eq!(Request::get("/").path_and_query(), "/");
    }

    #[test]
    fn test_form_body() {
        let request = Request::post("/login").with_form(&[("_username", "a b"), ("_password", "p&w")]);
        let form = request.form();
        assert_eq!(form.get("_username").map(String::as_str), Some("a b"));
        assert_eq!(form.get("_password").map(String::as_str), Some("p&w"));
    }

    #[test]
    fn test_json_detection() {
        let request = Request::post("/api/login").with_header("content-type", "application/json; charset=utf-8");
        assert!(request.is_json());
        let request = Request::post("/api/login").with_header("content-type", "application/ld+json");
        assert!(request.is_json());
        let request = Request::post("/api/login").with_header("content-type", "text/html");
        assert!(!request.is_json());
    }

    #[test]
    fn test_cookie_lookup() {
        let request = Request::get("/").with_header("cookie", "a=1; REMEMBERME=abc; b=2");
        assert_eq!(request.cookie("REMEMBERME").as_deref(), Some("abc"));
        assert!(request.cookie("missing").is_none());
    }

    #[test]
    fn test_redirect_response() {
        let response = Response::redirect("/login");
        assert_eq!(response.status, StatusCode::FOUND);
        assert_eq!(response.header("location"), Some("/login"));
        assert!(response.is_redirect());
    }
}
