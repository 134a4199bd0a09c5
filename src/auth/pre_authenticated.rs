//! Identities established upstream: client certificates and `REMOTE_USER`.
//!
//! Both variants share one authenticator parameterised by a
//! `UsernameExtractor`. Extraction distinguishes a benign skip from a
//! failure: a skip just leaves the authenticator out, a failure also drops
//! any pre-authenticated token this firewall stored earlier.

use std::sync::Arc;

use super::{Authenticator, Supports};
use crate::config::{RemoteUserConfig, X509Config};
use crate::domain::{Token, TokenKind, UserProvider};
use crate::error::{AuthenticationError, ShieldError, ShieldResult};
use crate::passport::{Passport, PreAuthenticatedUserBadge, UserBadge};
use crate::request::{Request, Response};

/// Why no username could be extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreAuthFailure {
    /// Nothing usable, try other authenticators.
    Skip,
    /// Upstream identity missing or invalid.
    Fail(AuthenticationError),
}

/// Reads the upstream identity from a request.
pub trait UsernameExtractor: Send + Sync {
    fn key(&self) -> &'static str;

    fn extract_username(&self, request: &Request) -> Result<String, PreAuthFailure>;
}

/// Username found during `supports`, consumed by `authenticate`.
#[derive(Debug, Clone)]
struct PreAuthenticatedUsername {
    authenticator: &'static str,
    username: String,
}

pub struct PreAuthenticatedAuthenticator<E> {
    extractor: E,
    firewall_name: String,
    user_provider: Option<Arc<dyn UserProvider>>,
}

impl<E: UsernameExtractor> PreAuthenticatedAuthenticator<E> {
    pub fn new(
        extractor: E,
        firewall_name: impl Into<String>,
        user_provider: Option<Arc<dyn UserProvider>>,
    ) -> Self {
        Self {
            extractor,
            firewall_name: firewall_name.into(),
            user_provider,
        }
    }

    fn clear_token(&self, request: &mut Request, error: &AuthenticationError) {
        let stale = request.token().is_some_and(|token| {
            token.kind() == TokenKind::PreAuthenticated
                && token.firewall_name() == self.firewall_name
        });
        if stale {
            request.token_storage.clear();
            tracing::info!(
                firewall = %self.firewall_name,
                authenticator = self.extractor.key(),
                error = %error,
                "Cleared pre-authenticated token"
            );
        }
    }
}

impl<E: UsernameExtractor> Authenticator for PreAuthenticatedAuthenticator<E> {
    fn key(&self) -> &str {
        self.extractor.key()
    }

    fn priority(&self) -> i32 {
        -10
    }

    fn supports(&self, request: &mut Request) -> Supports {
        let username = match self.extractor.extract_username(request) {
            Ok(username) => username,
            Err(PreAuthFailure::Skip) => return Supports::No,
            Err(PreAuthFailure::Fail(error)) => {
                self.clear_token(request, &error);
                return Supports::No;
            }
        };

        // do not overwrite the same identity restored from the session
        let already_stored = request.token().is_some_and(|token| {
            token.kind() == TokenKind::PreAuthenticated
                && token.firewall_name() == self.firewall_name
                && token.user_identifier() == username
        });
        if already_stored {
            return Supports::No;
        }

        request.attributes.insert(PreAuthenticatedUsername {
            authenticator: self.extractor.key(),
            username,
        });
        Supports::Yes
    }

    fn authenticate(&self, request: &mut Request) -> ShieldResult<Passport> {
        let username = request
            .attributes
            .get::<PreAuthenticatedUsername>()
            .filter(|cached| cached.authenticator == self.extractor.key())
            .map(|cached| cached.username.clone())
            .ok_or_else(|| {
                ShieldError::Invariant(format!(
                    "\"{}\" authenticate() called before supports()",
                    self.extractor.key()
                ))
            })?;

        let user_badge = match &self.user_provider {
            Some(provider) => UserBadge::from_provider(username, provider.clone()),
            None => UserBadge::new(username),
        };

        Passport::self_validating(user_badge).with_badge(PreAuthenticatedUserBadge)
    }

    fn create_token(&self, passport: &Passport, firewall_name: &str) -> ShieldResult<Token> {
        Ok(Token::from_passport(
            passport,
            firewall_name,
            TokenKind::PreAuthenticated,
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
        self.clear_token(request, error);
        Ok(None)
    }
}

/// Client certificate fields exposed by the TLS terminator.
pub struct X509Extractor {
    options: X509Config,
}

impl X509Extractor {
    pub fn new(options: X509Config) -> Self {
        Self { options }
    }

    /// `emailAddress=` (or the configured field) of a distinguished name.
    fn identifier_from_dn(&self, dn: &str) -> Option<String> {
        let prefix = format!("{}=", self.options.user_identifier);
        dn.split([',', '/'])
            .map(str::trim)
            .find_map(|part| part.strip_prefix(prefix.as_str()))
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

impl UsernameExtractor for X509Extractor {
    fn key(&self) -> &'static str {
        "x509"
    }

    fn extract_username(&self, request: &Request) -> Result<String, PreAuthFailure> {
        if let Some(user) = request.server.get(&self.options.user) {
            return if user.is_empty() {
                Err(PreAuthFailure::Skip)
            } else {
                Ok(user.clone())
            };
        }

        match request.server.get(&self.options.credentials) {
            Some(dn) if dn.is_empty() => Err(PreAuthFailure::Skip),
            Some(dn) => self.identifier_from_dn(dn).ok_or_else(|| {
                PreAuthFailure::Fail(AuthenticationError::BadCredentials(
                    "SSL credentials not found.".to_string(),
                ))
            }),
            None => Err(PreAuthFailure::Fail(AuthenticationError::BadCredentials(
                "SSL credentials not found.".to_string(),
            ))),
        }
    }
}

/// `REMOTE_USER` set by the front server.
pub struct RemoteUserExtractor {
    options: RemoteUserConfig,
}

impl RemoteUserExtractor {
    pub fn new(options: RemoteUserConfig) -> Self {
        Self { options }
    }
}

impl UsernameExtractor for RemoteUserExtractor {
    fn key(&self) -> &'static str {
        "remote_user"
    }

    fn extract_username(&self, request: &Request) -> Result<String, PreAuthFailure> {
        match request.server.get(&self.options.user) {
            Some(user) if user.is_empty() => Err(PreAuthFailure::Skip),
            Some(user) => Ok(user.clone()),
            None => Err(PreAuthFailure::Fail(AuthenticationError::BadCredentials(
                format!("User key was not found: {}", self.options.user),
            ))),
        }
    }
}

pub type X509Authenticator = PreAuthenticatedAuthenticator<X509Extractor>;
pub type RemoteUserAuthenticator = PreAuthenticatedAuthenticator<RemoteUserExtractor>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InMemoryUserProvider, User};

    fn provider() -> Arc<dyn UserProvider> {
        Arc::new(InMemoryUserProvider::from_users(vec![User::new(
            "alice@example.com",
            vec!["ROLE_USER".to_string()],
        )]))
    }

    fn x509() -> X509Authenticator {
        PreAuthenticatedAuthenticator::new(
            X509Extractor::new(X509Config::default()),
            "main",
            Some(provider()),
        )
    }

    fn stored(identifier: &str, firewall: &str) -> Token {
        Token::new(User::new(identifier, vec![]), firewall, TokenKind::PreAuthenticated)
    }

    #[test]
    fn test_email_variable_wins() {
        let authenticator = x509();
        let mut request = Request::get("/")
            .with_server_var("SSL_CLIENT_S_DN_Email", "alice@example.com")
            .with_server_var("SSL_CLIENT_S_DN", "CN=Bob,emailAddress=bob@example.com");

        assert_eq!(authenticator.supports(&mut request), Supports::Yes);
        let passport = authenticator.authenticate(&mut request).unwrap();
        assert!(passport.is_pre_authenticated());
        assert_eq!(passport.user().unwrap().identifier, "alice@example.com");
    }

    #[test]
    fn test_email_parsed_from_dn() {
        let extractor = X509Extractor::new(X509Config::default());
        let request = Request::get("/").with_server_var(
            "SSL_CLIENT_S_DN",
            "/C=FR/O=Example/CN=Alice/emailAddress=alice@example.com",
        );
        assert_eq!(
            extractor.extract_username(&request),
            Ok("alice@example.com".to_string())
        );
    }

    #[test]
    fn test_empty_material_is_skip_and_keeps_token() {
        let authenticator = x509();
        let mut request = Request::get("/")
            .with_server_var("SSL_CLIENT_S_DN_Email", "")
            .with_token(stored("carol@example.com", "main"));

        assert_eq!(authenticator.supports(&mut request), Supports::No);
        assert!(request.token().is_some());
    }

    #[test]
    fn test_missing_material_clears_stored_token_of_same_firewall() {
        let authenticator = x509();

        let mut request = Request::get("/").with_token(stored("carol@example.com", "main"));
        assert_eq!(authenticator.supports(&mut request), Supports::No);
        assert!(request.token().is_none());

        let mut request = Request::get("/").with_token(stored("carol@example.com", "other"));
        assert_eq!(authenticator.supports(&mut request), Supports::No);
        assert!(request.token().is_some());
    }

    #[test]
    fn test_same_stored_identity_is_not_reauthenticated() {
        let authenticator = x509();
        let mut request = Request::get("/")
            .with_server_var("SSL_CLIENT_S_DN_Email", "alice@example.com")
            .with_token(stored("alice@example.com", "main"));

        assert_eq!(authenticator.supports(&mut request), Supports::No);
        assert!(request.token().is_some());
    }

    #[test]
    fn test_remote_user() {
        let authenticator = PreAuthenticatedAuthenticator::new(
            RemoteUserExtractor::new(RemoteUserConfig::default()),
            "main",
            Some(provider()),
        );
        let mut request = Request::get("/").with_server_var("REMOTE_USER", "alice@example.com");

        assert_eq!(authenticator.key(), "remote_user");
        assert_eq!(authenticator.supports(&mut request), Supports::Yes);
        let passport = authenticator.authenticate(&mut request).unwrap();
        let token = authenticator.create_token(&passport, "main").unwrap();
        assert_eq!(token.kind(), TokenKind::PreAuthenticated);
        assert!(token.has_role("ROLE_USER"));
    }

    #[test]
    fn test_authenticate_without_supports_is_invariant_violation() {
        let authenticator = x509();
        let err = authenticator.authenticate(&mut Request::get("/")).unwrap_err();
        assert!(matches!(err, ShieldError::Invariant(_)));
    }
}
