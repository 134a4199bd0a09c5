//! JSON credentials posted by API clients.

use axum::http::StatusCode;

use super::{failure_body, Authenticator, Supports};
use crate::config::JsonLoginConfig;
use crate::domain::{Token, TokenKind};
use crate::error::{AuthenticationError, ShieldError, ShieldResult};
use crate::passport::{Passport, PasswordCredentials, RememberMeBadge, UserBadge};
use crate::request::{Request, Response};

pub struct JsonLoginAuthenticator {
    options: JsonLoginConfig,
}

impl JsonLoginAuthenticator {
    pub fn new(options: JsonLoginConfig) -> Self {
        Self { options }
    }

    /// Walk a dotted path such as `security.credentials.login`.
    fn lookup<'a>(body: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
        path.split('.').try_fold(body, |value, segment| value.get(segment))
    }

    fn string_at(body: &serde_json::Value, path: &str) -> ShieldResult<String> {
        match Self::lookup(body, path) {
            Some(serde_json::Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(ShieldError::BadRequest(format!(
                "The key \"{}\" must be a string.",
                path
            ))),
            None => Err(ShieldError::BadRequest(format!(
                "The key \"{}\" must be provided.",
                path
            ))),
        }
    }
}

impl Authenticator for JsonLoginAuthenticator {
    fn key(&self) -> &str {
        "json_login"
    }

    fn priority(&self) -> i32 {
        -40
    }

    fn supports(&self, request: &mut Request) -> Supports {
        if !request.is_json() {
            return Supports::No;
        }
        match &self.options.check_path {
            Some(path) if *path != request.path => Supports::No,
            _ => Supports::Yes,
        }
    }

    fn authenticate(&self, request: &mut Request) -> ShieldResult<Passport> {
        let body: serde_json::Value = serde_json::from_str(&request.body)
            .map_err(|_| ShieldError::BadRequest("Invalid JSON.".to_string()))?;

        let username = Self::string_at(&body, &self.options.username_path)?;
        let password = Self::string_at(&body, &self.options.password_path)?;

        if password.is_empty() {
            return Err(AuthenticationError::BadCredentials(
                "The presented password cannot be empty.".to_string(),
            )
            .into());
        }

        Passport::new(UserBadge::new(username), PasswordCredentials::new(password))
            .with_badge(RememberMeBadge::new())
    }

    fn create_token(&self, passport: &Passport, firewall_name: &str) -> ShieldResult<Token> {
        Ok(Token::from_passport(
            passport,
            firewall_name,
            TokenKind::UsernamePassword,
        )?)
    }

    fn on_authentication_success(
        &self,
        _request: &mut Request,
        _token: &Token,
        _firewall_name: &str,
    ) -> ShieldResult<Option<Response>> {
        Ok(None)
    }

    fn on_authentication_failure(
        &self,
        _request: &mut Request,
        error: &AuthenticationError,
    ) -> ShieldResult<Option<Response>> {
        Ok(Some(Response::json(
            StatusCode::UNAUTHORIZED,
            &failure_body(error),
        )))
    }

    fn is_interactive(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Session;

    fn json_request(body: &str) -> Request {
        Request::post("/api/login")
            .with_header("content-type", "application/json")
            .with_body(body)
    }

    #[test]
    fn test_supports_json_on_check_path() {
        let any_path = JsonLoginAuthenticator::new(JsonLoginConfig::default());
        assert_eq!(any_path.supports(&mut json_request("{}")), Supports::Yes);
        assert_eq!(any_path.supports(&mut Request::post("/api/login")), Supports::No);

        let restricted = JsonLoginAuthenticator::new(JsonLoginConfig {
            check_path: Some("/other".to_string()),
            ..JsonLoginConfig::default()
        });
        assert_eq!(restricted.supports(&mut json_request("{}")), Supports::No);
    }

    #[test]
    fn test_nested_paths() {
        let authenticator = JsonLoginAuthenticator::new(JsonLoginConfig {
            check_path: None,
            username_path: "security.login".to_string(),
            password_path: "security.secret".to_string(),
        });
        let mut request = json_request(r#"{"security": {"login": "alice", "secret": "pw"}}"#);

        let passport = authenticator.authenticate(&mut request).unwrap();
        assert_eq!(passport.user_badge().identifier(), "alice");
        assert_eq!(passport.password().unwrap().password(), Some("pw"));
    }

    #[test]
    fn test_malformed_body_is_bad_request() {
        let authenticator = JsonLoginAuthenticator::new(JsonLoginConfig::default());

        let err = authenticator.authenticate(&mut json_request("{not json")).unwrap_err();
        assert!(matches!(err, ShieldError::BadRequest(_)));
        assert!(!err.is_recoverable());

        let err = authenticator
            .authenticate(&mut json_request(r#"{"username": 42, "password": "pw"}"#))
            .unwrap_err();
        assert!(matches!(err, ShieldError::BadRequest(_)));
    }

    #[test]
    fn test_failure_is_json_without_session_write() {
        let authenticator = JsonLoginAuthenticator::new(JsonLoginConfig::default());
        let mut request = json_request("{}").with_session(Session::new());

        let response = authenticator
            .on_authentication_failure(&mut request, &AuthenticationError::bad_credentials())
            .unwrap()
            .unwrap();

        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert!(response.body.unwrap().contains("BAD_CREDENTIALS"));
        assert!(request.session.unwrap().get(crate::auth::LAST_ERROR_KEY).is_none());
    }
}
