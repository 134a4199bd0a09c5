//! Login form submitted to a check path.

use std::collections::HashMap;

use axum::http::Method;

use super::{
    AuthenticationEntryPoint, Authenticator, DefaultFailureHandler, DefaultSuccessHandler,
    Supports, LAST_USERNAME_KEY,
};
use crate::config::FormLoginConfig;
use crate::domain::{Token, TokenKind};
use crate::error::{AuthenticationError, ShieldResult};
use crate::passport::{CsrfTokenBadge, Passport, PasswordCredentials, RememberMeBadge, UserBadge};
use crate::request::{Request, Response};

pub struct FormLoginAuthenticator {
    options: FormLoginConfig,
    success_handler: DefaultSuccessHandler,
    failure_handler: DefaultFailureHandler,
}

impl FormLoginAuthenticator {
    pub fn new(options: FormLoginConfig) -> Self {
        let success_handler = DefaultSuccessHandler::new(
            options.default_target_path.clone(),
            options.always_use_default_target_path,
        );
        let failure_handler = DefaultFailureHandler::new(
            options
                .failure_path
                .clone()
                .unwrap_or_else(|| options.login_path.clone()),
        );
        Self {
            options,
            success_handler,
            failure_handler,
        }
    }

    fn parameters(&self, request: &Request) -> HashMap<String, String> {
        if self.options.post_only {
            request.form()
        } else {
            let mut parameters = request.query.clone();
            parameters.extend(request.form());
            parameters
        }
    }
}

impl Authenticator for FormLoginAuthenticator {
    fn key(&self) -> &str {
        "form_login"
    }

    fn priority(&self) -> i32 {
        -30
    }

    fn supports(&self, request: &mut Request) -> Supports {
        let method_ok = !self.options.post_only || request.method == Method::POST;
        if method_ok && request.path == self.options.check_path {
            Supports::Yes
        } else {
            Supports::No
        }
    }

    fn authenticate(&self, request: &mut Request) -> ShieldResult<Passport> {
        let mut parameters = self.parameters(request);

        let username = parameters
            .remove(&self.options.username_parameter)
            .map(|u| u.trim().to_string())
            .unwrap_or_default();
        let password = parameters
            .remove(&self.options.password_parameter)
            .unwrap_or_default();

        if let Some(session) = request.session_mut() {
            session.set(LAST_USERNAME_KEY, username.clone());
        }

        if username.is_empty() {
            return Err(AuthenticationError::BadCredentials(
                "The presented username cannot be empty.".to_string(),
            )
            .into());
        }
        if password.is_empty() {
            return Err(AuthenticationError::BadCredentials(
                "The presented password cannot be empty.".to_string(),
            )
            .into());
        }

        let mut passport = Passport::new(
            UserBadge::new(username),
            PasswordCredentials::new(password),
        )
        .with_badge(RememberMeBadge::new())?;

        if self.options.enable_csrf {
            let submitted = parameters
                .remove(&self.options.csrf_parameter)
                .unwrap_or_default();
            passport.add_badge(CsrfTokenBadge::new(
                self.options.csrf_token_id.clone(),
                submitted,
            ))?;
        }

        Ok(passport)
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
        request: &mut Request,
        token: &Token,
        _firewall_name: &str,
    ) -> ShieldResult<Option<Response>> {
        Ok(Some(self.success_handler.on_success(request, token)))
    }

    fn on_authentication_failure(
        &self,
        request: &mut Request,
        error: &AuthenticationError,
    ) -> ShieldResult<Option<Response>> {
        Ok(Some(self.failure_handler.on_failure(request, error)))
    }

    fn is_interactive(&self) -> bool {
        true
    }

    fn entry_point(&self) -> Option<&dyn AuthenticationEntryPoint> {
        Some(self)
    }
}

impl AuthenticationEntryPoint for FormLoginAuthenticator {
    fn start(&self, _request: &mut Request, _error: Option<&AuthenticationError>) -> Response {
        Response::redirect(&self.options.login_path)
    }
}
