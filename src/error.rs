//! Error types for Shield Guard.
//!
//! Authentication failures are recoverable and drive the authenticator scan;
//! configuration errors only happen while the firewalls are being built;
//! everything else is fatal for the request in flight.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::passport::BadgeKind;

/// A recoverable authentication failure.
///
/// Returned by authenticators, user loaders and badge checkers. The
/// authenticator manager reacts by moving on to the next candidate or, once
/// every candidate failed, by falling back to the entry point.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthenticationError {
    #[error("{0}")]
    BadCredentials(String),

    #[error("User \"{identifier}\" could not be found.")]
    UserNotFound { identifier: String },

    #[error("Invalid CSRF token.")]
    InvalidCsrfToken,

    #[error("Account is unavailable: {0}")]
    AccountStatus(String),

    #[error("Credentials have expired.")]
    CredentialsExpired,

    #[error("Invalid or expired login link: {0}")]
    InvalidLoginLink(String),

    #[error("Invalid access token: {0}")]
    InvalidToken(String),

    #[error("Possible remember-me cookie theft detected.")]
    CookieTheft,

    #[error("Some badges required by the firewall are not available on the passport: {}", join_kinds(.0))]
    MissingRequiredBadges(Vec<BadgeKind>),

    #[error("Security badge \"{0}\" is not resolved, is the matching checker registered?")]
    UnresolvedBadge(BadgeKind),

    #[error("{0}")]
    Custom(String),
}

impl AuthenticationError {
    /// Shorthand for the generic bad-credentials failure.
    pub fn bad_credentials() -> Self {
        AuthenticationError::BadCredentials("Bad credentials.".to_string())
    }

    /// Whether this failure belongs to the bad-credentials family.
    pub fn is_bad_credentials(&self) -> bool {
        matches!(
            self,
            AuthenticationError::BadCredentials(_)
                | AuthenticationError::MissingRequiredBadges(_)
                | AuthenticationError::UnresolvedBadge(_)
        )
    }

    /// Whether the failure reveals information about the account itself.
    pub fn reveals_account(&self) -> bool {
        matches!(
            self,
            AuthenticationError::UserNotFound { .. } | AuthenticationError::AccountStatus(_)
        )
    }

    /// Stable machine-readable code used in JSON failure bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AuthenticationError::BadCredentials(_) => "BAD_CREDENTIALS",
            AuthenticationError::UserNotFound { .. } => "USER_NOT_FOUND",
            AuthenticationError::InvalidCsrfToken => "INVALID_CSRF_TOKEN",
            AuthenticationError::AccountStatus(_) => "ACCOUNT_STATUS",
            AuthenticationError::CredentialsExpired => "CREDENTIALS_EXPIRED",
            AuthenticationError::InvalidLoginLink(_) => "INVALID_LOGIN_LINK",
            AuthenticationError::InvalidToken(_) => "INVALID_TOKEN",
            AuthenticationError::CookieTheft => "COOKIE_THEFT",
            AuthenticationError::MissingRequiredBadges(_) => "MISSING_BADGES",
            AuthenticationError::UnresolvedBadge(_) => "UNRESOLVED_BADGE",
            AuthenticationError::Custom(_) => "AUTHENTICATION_FAILED",
        }
    }
}

fn join_kinds(kinds: &[BadgeKind]) -> String {
    kinds
        .iter()
        .map(|k| format!("\"{}\"", k))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A build-time configuration problem. Never reaches an end user.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Firewall \"{firewall}\" has multiple authenticators with an entry point, set \"entry_point\" to one of them ({}) or to a service implementing an entry point", quote_all(.candidates))]
    AmbiguousEntryPoint {
        firewall: String,
        candidates: Vec<String>,
    },

    #[error("Firewall \"{firewall}\" sets entry_point \"{entry_point}\" which is neither an authenticator key nor a registered entry point service")]
    UnknownEntryPoint {
        firewall: String,
        entry_point: String,
    },

    #[error("Service \"{0}\" is not registered")]
    UnknownService(String),

    #[error("Service \"{id}\" must implement {expected}")]
    IncompatibleService { id: String, expected: &'static str },

    #[error("No security voters found, register at least one voter")]
    NoVoters,

    #[error("Invalid access decision strategy \"{0}\", expected one of affirmative, consensus, unanimous, priority")]
    InvalidStrategy(String),

    #[error("Unknown user provider \"{0}\"")]
    UnknownUserProvider(String),

    #[error("Firewall \"{firewall}\" needs a user provider for \"{authenticator}\"")]
    MissingUserProvider {
        firewall: String,
        authenticator: String,
    },

    #[error("Firewall \"{0}\" has no authenticator configured")]
    NoAuthenticator(String),

    #[error("Invalid request pattern \"{pattern}\": {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Firewall \"{0}\" is defined more than once")]
    DuplicateFirewall(String),

    #[error("Unknown badge kind \"{0}\"")]
    UnknownBadge(String),

    #[error("Invalid option for firewall \"{firewall}\": {reason}")]
    InvalidOption { firewall: String, reason: String },

    #[error("Invalid trusted header \"{header}\": {reason}")]
    InvalidHeader { header: String, reason: String },

    #[error("Invalid signing secret: {0}")]
    InvalidSecret(String),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

fn quote_all(values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("\"{}\"", v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Unified error type for Shield Guard operations.
#[derive(Debug, Error)]
pub enum ShieldError {
    #[error("Authentication failed: {0}")]
    Authentication(#[from] AuthenticationError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("A badge of kind \"{0}\" is already present on the passport")]
    BadgeAlreadyPresent(BadgeKind),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    /// A listener deferred by a lazy firewall ended the request.
    #[error("Deferred firewall listener returned a response")]
    LazyResponse(Box<crate::request::Response>),
}

impl ShieldError {
    /// Only authentication failures let the manager try the next authenticator.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ShieldError::Authentication(_))
    }
}

/// Error response body for API clients.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for ShieldError {
    fn into_response(self) -> Response {
        let error = match self {
            ShieldError::LazyResponse(response) => return (*response).into_response(),
            error => error,
        };

        let (status, code, message, details) = match &error {
            ShieldError::Authentication(e) => (
                StatusCode::UNAUTHORIZED,
                e.code(),
                e.to_string(),
                None,
            ),
            ShieldError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone(), None)
            }
            ShieldError::Serialization(e) => (
                StatusCode::BAD_REQUEST,
                "SERIALIZATION_ERROR",
                "Failed to process request".to_string(),
                Some(e.to_string()),
            ),
            ShieldError::Configuration(e) => {
                tracing::error!(error = %e, "Configuration error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    "Configuration error".to_string(),
                    None,
                )
            }
            ShieldError::BadgeAlreadyPresent(_)
            | ShieldError::Invariant(_)
            | ShieldError::Internal(_)
            | ShieldError::LazyResponse(_) => {
                tracing::error!(error = %error, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for Shield operations.
pub type ShieldResult<T> = Result<T, ShieldError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_authentication_errors_are_recoverable() {
        assert!(ShieldError::from(AuthenticationError::bad_credentials()).is_recoverable());
        assert!(!ShieldError::BadgeAlreadyPresent(BadgeKind::Csrf).is_recoverable());
        assert!(!ShieldError::Invariant("boom".to_string()).is_recoverable());
        assert!(!ShieldError::from(ConfigurationError::NoVoters).is_recoverable());
    }

    #[test]
    fn test_ambiguous_entry_point_lists_candidates() {
        let err = ConfigurationError::AmbiguousEntryPoint {
            firewall: "main".to_string(),
            candidates: vec!["form_login".to_string(), "http_basic".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("\"form_login\""));
        assert!(message.contains("\"http_basic\""));
        assert!(message.contains("main"));
    }

    #[test]
    fn test_missing_badges_message_names_kinds() {
        let err = AuthenticationError::MissingRequiredBadges(vec![BadgeKind::Csrf]);
        assert!(err.to_string().contains("\"csrf\""));
        assert!(err.is_bad_credentials());
    }
}
