//! HTTP Basic authentication.

use axum::http::{header, StatusCode};
use base64::{engine::general_purpose::STANDARD, Engine};

use super::{AuthenticationEntryPoint, Authenticator, Supports};
use crate::domain::{Token, TokenKind};
use crate::error::{AuthenticationError, ShieldResult};
use crate::passport::{Passport, PasswordCredentials, UserBadge};
use crate::request::{Request, Response};

pub struct HttpBasicAuthenticator {
    realm: String,
}

impl HttpBasicAuthenticator {
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
        }
    }

    fn credentials(request: &Request) -> Option<&str> {
        request
            .header(header::AUTHORIZATION.as_str())
            .and_then(|v| v.strip_prefix("Basic "))
            .map(str::trim)
    }
}

impl Authenticator for HttpBasicAuthenticator {
    fn key(&self) -> &str {
        "http_basic"
    }

    fn priority(&self) -> i32 {
        -50
    }

    fn supports(&self, request: &mut Request) -> Supports {
        if Self::credentials(request).is_some() {
            Supports::Yes
        } else {
            Supports::No
        }
    }

    fn authenticate(&self, request: &mut Request) -> ShieldResult<Passport> {
        let encoded = Self::credentials(request).ok_or_else(AuthenticationError::bad_credentials)?;

        let decoded = STANDARD
            .decode(encoded)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| {
                AuthenticationError::BadCredentials("Malformed basic credentials.".to_string())
            })?;

        let (username, password) = decoded.split_once(':').ok_or_else(|| {
            AuthenticationError::BadCredentials("Malformed basic credentials.".to_string())
        })?;

        Ok(Passport::new(
            UserBadge::new(username),
            PasswordCredentials::new(password),
        ))
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
        request: &mut Request,
        error: &AuthenticationError,
    ) -> ShieldResult<Option<Response>> {
        Ok(Some(self.start(request, Some(error))))
    }

    fn entry_point(&self) -> Option<&dyn AuthenticationEntryPoint> {
        Some(self)
    }
}

impl AuthenticationEntryPoint for HttpBasicAuthenticator {
    fn start(&self, _request: &mut Request, _error: Option<&AuthenticationError>) -> Response {
        Response::new(StatusCode::UNAUTHORIZED).with_header(
            header::WWW_AUTHENTICATE.as_str(),
            &format!("Basic realm=\"{}\"", self.realm),
        )
    }
}
