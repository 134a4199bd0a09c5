//! The authenticator contract shared by every authentication method.

use crate::domain::{Token, TokenKind};
use crate::error::{AuthenticationError, ShieldResult};
use crate::passport::Passport;
use crate::request::{Request, Response};

/// Answer of `Authenticator::supports`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Supports {
    /// The authenticator applies to this request.
    Yes,
    /// The authenticator does not apply; it is never asked to authenticate.
    No,
    /// Might apply. Not run eagerly, but not excluded either.
    Maybe,
}

impl Supports {
    pub fn is_candidate(self) -> bool {
        !matches!(self, Supports::No)
    }
}

/// Produces the "please authenticate" response.
pub trait AuthenticationEntryPoint: Send + Sync {
    /// Start the authentication process, optionally after a failure.
    fn start(&self, request: &mut Request, error: Option<&AuthenticationError>) -> Response;
}

/// One authentication method.
///
/// Authenticators are shared across concurrent requests and hold no
/// per-request state. Values derived in `supports` that `authenticate`
/// needs again travel through `Request::attributes`.
pub trait Authenticator: Send + Sync {
    /// Configuration key, e.g. `form_login`.
    fn key(&self) -> &str;

    /// Firewalls try authenticators by descending priority.
    fn priority(&self) -> i32 {
        0
    }

    /// Whether this authenticator applies. Must be idempotent.
    fn supports(&self, request: &mut Request) -> Supports;

    /// Build the passport for this request.
    fn authenticate(&self, request: &mut Request) -> ShieldResult<Passport>;

    /// Create the token once the passport has been checked.
    fn create_token(&self, passport: &Passport, firewall_name: &str) -> ShieldResult<Token> {
        Ok(Token::from_passport(
            passport,
            firewall_name,
            TokenKind::PostAuthentication,
        )?)
    }

    /// `None` lets the original request continue.
    fn on_authentication_success(
        &self,
        request: &mut Request,
        token: &Token,
        firewall_name: &str,
    ) -> ShieldResult<Option<Response>>;

    /// `None` falls back to the firewall entry point.
    fn on_authentication_failure(
        &self,
        request: &mut Request,
        error: &AuthenticationError,
    ) -> ShieldResult<Option<Response>>;

    /// Interactive logins are the ones a user explicitly submitted.
    fn is_interactive(&self) -> bool {
        false
    }

    /// The entry point capability, when the authenticator has one.
    fn entry_point(&self) -> Option<&dyn AuthenticationEntryPoint> {
        None
    }
}

/// JSON body used by API authenticators on failure.
pub(crate) fn failure_body(error: &AuthenticationError) -> serde_json::Value {
    serde_json::json!({
        "error": error.to_string(),
        "code": error.code(),
    })
}
