//! Zero-privilege identity for visitors that did not authenticate.

use std::sync::Arc;

use super::{Authenticator, Supports};
use crate::domain::{Token, TokenKind, User};
use crate::error::{AuthenticationError, ShieldResult};
use crate::passport::{Passport, UserBadge};
use crate::request::{Request, Response};

/// Identifier of anonymous tokens.
pub const ANONYMOUS_IDENTIFIER: &str = "anon.";

#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousAuthenticator;

impl Authenticator for AnonymousAuthenticator {
    fn key(&self) -> &str {
        "anonymous"
    }

    fn priority(&self) -> i32 {
        -100
    }

    fn supports(&self, request: &mut Request) -> Supports {
        if request.token().is_some() {
            Supports::No
        } else {
            Supports::Maybe
        }
    }

    fn authenticate(&self, _request: &mut Request) -> ShieldResult<Passport> {
        Ok(Passport::self_validating(UserBadge::with_loader(
            ANONYMOUS_IDENTIFIER,
            Arc::new(|id: &str| Some(User::new(id, Vec::new()))),
        )))
    }

    fn create_token(&self, passport: &Passport, firewall_name: &str) -> ShieldResult<Token> {
        Ok(Token::from_passport(
            passport,
            firewall_name,
            TokenKind::Anonymous,
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
        _error: &AuthenticationError,
    ) -> ShieldResult<Option<Response>> {
        Ok(None)
    }
}
