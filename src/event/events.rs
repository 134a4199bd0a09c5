//! Security events dispatched while a firewall handles a request.

use crate::domain::Token;
use crate::error::AuthenticationError;
use crate::passport::Passport;
use crate::request::{Request, Response};

/// Event discriminant used for listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Badge checkers validate the passport.
    CheckPassport,
    /// A token was created, listeners may replace it.
    TokenCreated,
    LoginSuccess,
    LoginFailure,
    Logout,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::CheckPassport => write!(f, "check_passport"),
            EventKind::TokenCreated => write!(f, "token_created"),
            EventKind::LoginSuccess => write!(f, "login_success"),
            EventKind::LoginFailure => write!(f, "login_failure"),
            EventKind::Logout => write!(f, "logout"),
        }
    }
}

pub struct CheckPassportEvent<'a> {
    pub authenticator: &'a str,
    pub firewall_name: &'a str,
    pub passport: &'a mut Passport,
    pub request: &'a mut Request,
}

pub struct TokenCreatedEvent<'a> {
    pub authenticator: &'a str,
    pub passport: &'a Passport,
    pub token: Token,
}

pub struct LoginSuccessEvent<'a> {
    pub authenticator: &'a str,
    pub firewall_name: &'a str,
    pub passport: &'a Passport,
    pub token: &'a Token,
    pub request: &'a mut Request,
    /// Response returned by the authenticator, listeners may replace it.
    pub response: Option<Response>,
}

pub struct LoginFailureEvent<'a> {
    pub authenticator: &'a str,
    pub firewall_name: &'a str,
    pub error: &'a AuthenticationError,
    pub passport: Option<&'a Passport>,
    pub request: &'a mut Request,
    pub response: Option<Response>,
}

pub struct LogoutEvent<'a> {
    pub firewall_name: &'a str,
    pub token: Option<&'a Token>,
    pub request: &'a mut Request,
    pub response: Option<Response>,
}

/// Any event a security listener can observe.
pub enum SecurityEvent<'a> {
    CheckPassport(CheckPassportEvent<'a>),
    TokenCreated(TokenCreatedEvent<'a>),
    LoginSuccess(LoginSuccessEvent<'a>),
    LoginFailure(LoginFailureEvent<'a>),
    Logout(LogoutEvent<'a>),
}

impl SecurityEvent<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            SecurityEvent::CheckPassport(_) => EventKind::CheckPassport,
            SecurityEvent::TokenCreated(_) => EventKind::TokenCreated,
            SecurityEvent::LoginSuccess(_) => EventKind::LoginSuccess,
            SecurityEvent::LoginFailure(_) => EventKind::LoginFailure,
            SecurityEvent::Logout(_) => EventKind::Logout,
        }
    }
}
