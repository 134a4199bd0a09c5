//! Remember-me cookies.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::{Authenticator, SignatureHasher, Supports};
use crate::config::RememberMeConfig;
use crate::domain::{Token, TokenKind, User, UserProvider};
use crate::error::{AuthenticationError, ConfigurationError, ShieldError, ShieldResult};
use crate::passport::{Passport, UserBadge};
use crate::request::{Request, Response};

/// Issues, reads and cancels remember-me cookies.
pub trait RememberMeService: Send + Sync {
    /// Token restored from the request cookie, if any and valid.
    fn auto_login(&self, request: &mut Request, firewall_name: &str) -> Option<Token>;

    /// Schedule removal of the cookie.
    fn login_fail(&self, request: &mut Request, error: Option<&AuthenticationError>);

    /// Schedule a fresh cookie for the logged in user.
    fn login_success(&self, request: &mut Request, token: &Token);
}

/// Cookie value `base64(identifier):expires:signature`.
pub struct SignatureRememberMeService {
    provider: Arc<dyn UserProvider>,
    signer: SignatureHasher,
    cookie_name: String,
    lifetime: i64,
}

impl SignatureRememberMeService {
    pub fn new(
        options: &RememberMeConfig,
        provider: Arc<dyn UserProvider>,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            provider,
            signer: SignatureHasher::new(&options.secret)?,
            cookie_name: options.name.clone(),
            lifetime: options.lifetime,
        })
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Cookie value for `user`, valid for the configured lifetime.
    pub fn cookie_value(&self, user: &User) -> String {
        let expires = Utc::now().timestamp() + self.lifetime;
        format!(
            "{}:{}:{}",
            URL_SAFE_NO_PAD.encode(user.identifier.as_bytes()),
            expires,
            self.signer.compute(user, expires)
        )
    }

    fn consume_cookie(&self, value: &str) -> Result<User, AuthenticationError> {
        let malformed = || AuthenticationError::InvalidToken("Malformed remember-me cookie.".to_string());

        let mut parts = value.splitn(3, ':');
        let (Some(identifier), Some(expires), Some(hash)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(malformed());
        };

        let identifier = URL_SAFE_NO_PAD
            .decode(identifier)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(malformed)?;
        let expires: i64 = expires.parse().map_err(|_| malformed())?;

        let user = self
            .provider
            .load_user_by_identifier(&identifier)
            .ok_or(AuthenticationError::UserNotFound { identifier })?;

        self.signer.verify(&user, expires, hash)?;
        Ok(user)
    }
}

impl RememberMeService for SignatureRememberMeService {
    fn auto_login(&self, request: &mut Request, firewall_name: &str) -> Option<Token> {
        let value = request.cookie(&self.cookie_name)?;

        match self.consume_cookie(&value) {
            Ok(user) => Some(Token::new(user, firewall_name, TokenKind::RememberMe)),
            Err(error) => {
                tracing::debug!(error = %error, "Remember-me cookie rejected");
                self.login_fail(request, Some(&error));
                None
            }
        }
    }

    fn login_fail(&self, request: &mut Request, _error: Option<&AuthenticationError>) {
        clear_cookie(request, &self.cookie_name);
    }

    fn login_success(&self, request: &mut Request, token: &Token) {
        let user = self
            .provider
            .load_user_by_identifier(token.user_identifier())
            .unwrap_or_else(|| token.user().clone());

        let value = self.cookie_value(&user);
        set_cookie(request, &self.cookie_name, &value, self.lifetime);
    }
}

fn set_cookie(request: &mut Request, name: &str, value: &str, lifetime: i64) {
    request.response_cookies.push(format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        name, value, lifetime
    ));
}

fn clear_cookie(request: &mut Request, name: &str) {
    request
        .response_cookies
        .push(format!("{}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax", name));
}

/// A remember-me series as stored by a [`RememberMeTokenProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentToken {
    pub identifier: String,
    pub series: String,
    pub token_value: String,
    pub last_used: DateTime<Utc>,
}

/// Storage for persistent remember-me series.
pub trait RememberMeTokenProvider: Send + Sync {
    fn load_token(&self, series: &str) -> Option<PersistentToken>;

    fn create_token(&self, token: PersistentToken);

    fn update_token(&self, series: &str, token_value: &str, last_used: DateTime<Utc>);

    fn delete_token(&self, series: &str);
}

#[derive(Default)]
pub struct InMemoryRememberMeTokenProvider {
    tokens: RwLock<HashMap<String, PersistentToken>>,
}

impl InMemoryRememberMeTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RememberMeTokenProvider for InMemoryRememberMeTokenProvider {
    fn load_token(&self, series: &str) -> Option<PersistentToken> {
        self.tokens.read().ok()?.get(series).cloned()
    }

    fn create_token(&self, token: PersistentToken) {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.insert(token.series.clone(), token);
        }
    }

    fn update_token(&self, series: &str, token_value: &str, last_used: DateTime<Utc>) {
        if let Ok(mut tokens) = self.tokens.write() {
            if let Some(token) = tokens.get_mut(series) {
                token.token_value = token_value.to_string();
                token.last_used = last_used;
            }
        }
    }

    fn delete_token(&self, series: &str) {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.remove(series);
        }
    }
}

/// Cookie value `series:token`, with the token rotated on every auto-login.
///
/// Presenting a known series with a stale token means the cookie was
/// copied: the series is dropped and the login fails with
/// [`AuthenticationError::CookieTheft`].
pub struct PersistentRememberMeService {
    provider: Arc<dyn UserProvider>,
    tokens: Arc<dyn RememberMeTokenProvider>,
    cookie_name: String,
    lifetime: i64,
}

impl PersistentRememberMeService {
    pub fn new(
        options: &RememberMeConfig,
        provider: Arc<dyn UserProvider>,
        tokens: Arc<dyn RememberMeTokenProvider>,
    ) -> Self {
        Self {
            provider,
            tokens,
            cookie_name: options.name.clone(),
            lifetime: options.lifetime,
        }
    }

    fn generate() -> String {
        Uuid::new_v4().simple().to_string()
    }

    fn series_of(value: &str) -> Option<&str> {
        value.split_once(':').map(|(series, _)| series)
    }

    /// Validate a cookie value and rotate its token.
    ///
    /// Returns the user and the replacement cookie value.
    pub fn consume_cookie(&self, value: &str) -> Result<(User, String), AuthenticationError> {
        let (series, token_value) = value.split_once(':').ok_or_else(|| {
            AuthenticationError::InvalidToken("Malformed remember-me cookie.".to_string())
        })?;

        let stored = self.tokens.load_token(series).ok_or_else(|| {
            AuthenticationError::InvalidToken("No remember-me token found for series.".to_string())
        })?;

        if !bool::from(stored.token_value.as_bytes().ct_eq(token_value.as_bytes())) {
            self.tokens.delete_token(series);
            tracing::warn!(user = %stored.identifier, "Remember-me token replayed, series revoked");
            return Err(AuthenticationError::CookieTheft);
        }

        if stored.last_used + Duration::seconds(self.lifetime) < Utc::now() {
            self.tokens.delete_token(series);
            return Err(AuthenticationError::InvalidToken(
                "The remember-me cookie has expired.".to_string(),
            ));
        }

        let user = self
            .provider
            .load_user_by_identifier(&stored.identifier)
            .ok_or(AuthenticationError::UserNotFound {
                identifier: stored.identifier.clone(),
            })?;

        let next = Self::generate();
        self.tokens.update_token(series, &next, Utc::now());
        Ok((user, format!("{}:{}", series, next)))
    }
}

impl RememberMeService for PersistentRememberMeService {
    fn auto_login(&self, request: &mut Request, firewall_name: &str) -> Option<Token> {
        let value = request.cookie(&self.cookie_name)?;

        match self.consume_cookie(&value) {
            Ok((user, next)) => {
                set_cookie(request, &self.cookie_name, &next, self.lifetime);
                Some(Token::new(user, firewall_name, TokenKind::RememberMe))
            }
            Err(error) => {
                tracing::debug!(error = %error, "Remember-me cookie rejected");
                self.login_fail(request, Some(&error));
                None
            }
        }
    }

    fn login_fail(&self, request: &mut Request, _error: Option<&AuthenticationError>) {
        if let Some(value) = request.cookie(&self.cookie_name) {
            if let Some(series) = Self::series_of(&value) {
                self.tokens.delete_token(series);
            }
        }
        clear_cookie(request, &self.cookie_name);
    }

    fn login_success(&self, request: &mut Request, token: &Token) {
        let series = Self::generate();
        let token_value = Self::generate();
        self.tokens.create_token(PersistentToken {
            identifier: token.user_identifier().to_string(),
            series: series.clone(),
            token_value: token_value.clone(),
            last_used: Utc::now(),
        });
        set_cookie(
            request,
            &self.cookie_name,
            &format!("{}:{}", series, token_value),
            self.lifetime,
        );
    }
}

/// Token restored in `supports`, consumed by `authenticate`.
#[derive(Debug, Clone)]
struct RememberMeCachedToken(Token);

pub struct RememberMeAuthenticator {
    service: Arc<dyn RememberMeService>,
    firewall_name: String,
}

impl RememberMeAuthenticator {
    pub fn new(service: Arc<dyn RememberMeService>, firewall_name: impl Into<String>) -> Self {
        Self {
            service,
            firewall_name: firewall_name.into(),
        }
    }
}

impl Authenticator for RememberMeAuthenticator {
    fn key(&self) -> &str {
        "remember_me"
    }

    fn priority(&self) -> i32 {
        -50
    }

    fn supports(&self, request: &mut Request) -> Supports {
        // never overwrite an active session
        if request.token().is_some() {
            return Supports::No;
        }
        if request.attributes.get::<RememberMeCachedToken>().is_some() {
            return Supports::Maybe;
        }

        match self.service.auto_login(request, &self.firewall_name) {
            Some(token) => {
                request.attributes.insert(RememberMeCachedToken(token));
                Supports::Maybe
            }
            None => Supports::No,
        }
    }

    fn authenticate(&self, request: &mut Request) -> ShieldResult<Passport> {
        let RememberMeCachedToken(token) = request
            .attributes
            .remove::<RememberMeCachedToken>()
            .ok_or_else(|| {
                ShieldError::Invariant(
                    "remember_me authenticate() called without a token restored by supports()"
                        .to_string(),
                )
            })?;

        let user = token.user().clone();
        Ok(Passport::self_validating(UserBadge::with_loader(
            token.user_identifier(),
            Arc::new(move |_: &str| Some(user.clone())),
        )))
    }

    fn create_token(&self, passport: &Passport, firewall_name: &str) -> ShieldResult<Token> {
        Ok(Token::from_passport(
            passport,
            firewall_name,
            TokenKind::RememberMe,
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
        self.service.login_fail(request, Some(error));
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::InMemoryUserProvider;

    fn options() -> RememberMeConfig {
        RememberMeConfig {
            secret: "s3cret".to_string(),
            lifetime: 3600,
            name: "REMEMBERME".to_string(),
            remember_me_parameter: "_remember_me".to_string(),
            always_remember_me: false,
            token_provider: None,
        }
    }

    fn users() -> Arc<InMemoryUserProvider> {
        Arc::new(InMemoryUserProvider::from_users(vec![User::with_password(
            "alice",
            "$sha256$abc",
            vec!["ROLE_USER".to_string()],
        )]))
    }

    fn service() -> Arc<SignatureRememberMeService> {
        Arc::new(SignatureRememberMeService::new(&options(), users()).unwrap())
    }

    fn persistent() -> (PersistentRememberMeService, Arc<InMemoryRememberMeTokenProvider>) {
        let tokens = Arc::new(InMemoryRememberMeTokenProvider::new());
        let service = PersistentRememberMeService::new(&options(), users(), tokens.clone());
        (service, tokens)
    }

    fn issued_cookie(request: &Request) -> String {
        let cookie = request.response_cookies.last().unwrap();
        let pair = cookie.split(';').next().unwrap();
        pair.trim_start_matches("REMEMBERME=").to_string()
    }

    fn alice() -> User {
        User::with_password("alice", "$sha256$abc", vec!["ROLE_USER".to_string()])
    }

    fn with_cookie(value: &str) -> Request {
        Request::get("/").with_header("cookie", &format!("REMEMBERME={}", value))
    }

    #[test]
    fn test_valid_cookie_logs_in_lazily() {
        let service = service();
        let authenticator = RememberMeAuthenticator::new(service.clone(), "main");
        let mut request = with_cookie(&service.cookie_value(&alice()));

        assert_eq!(authenticator.supports(&mut request), Supports::Maybe);
        // supports is idempotent
        assert_eq!(authenticator.supports(&mut request), Supports::Maybe);

        let passport = authenticator.authenticate(&mut request).unwrap();
        let token = authenticator.create_token(&passport, "main").unwrap();
        assert_eq!(token.kind(), TokenKind::RememberMe);
        assert_eq!(token.user_identifier(), "alice");
    }

    #[test]
    fn test_existing_token_is_never_overwritten() {
        let service = service();
        let authenticator = RememberMeAuthenticator::new(service.clone(), "main");
        let mut request = with_cookie(&service.cookie_value(&alice())).with_token(Token::new(
            User::new("bob", vec![]),
            "main",
            TokenKind::UsernamePassword,
        ));

        assert_eq!(authenticator.supports(&mut request), Supports::No);
        assert_eq!(request.token().unwrap().user_identifier(), "bob");
    }

    #[test]
    fn test_tampered_cookie_is_cancelled() {
        let service = service();
        let authenticator = RememberMeAuthenticator::new(service.clone(), "main");
        let value = service.cookie_value(&alice());
        let tampered = format!("{}x", value);
        let mut request = with_cookie(&tampered);

        assert_eq!(authenticator.supports(&mut request), Supports::No);
        assert_eq!(request.response_cookies.len(), 1);
        assert!(request.response_cookies[0].starts_with("REMEMBERME=;"));
        assert!(request.response_cookies[0].contains("Max-Age=0"));
    }

    #[test]
    fn test_authenticate_without_cached_token_is_invariant_violation() {
        let authenticator = RememberMeAuthenticator::new(service(), "main");
        let err = authenticator.authenticate(&mut Request::get("/")).unwrap_err();
        assert!(matches!(err, ShieldError::Invariant(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_login_success_sets_cookie() {
        let service = service();
        let mut request = Request::post("/login_check");
        let token = Token::new(alice(), "main", TokenKind::UsernamePassword);

        service.login_success(&mut request, &token);

        let cookie = &request.response_cookies[0];
        assert!(cookie.starts_with("REMEMBERME="));
        assert!(cookie.contains("Max-Age=3600"));
        assert!(cookie.contains("HttpOnly"));
    }

    #[test]
    fn test_persistent_cookie_rotates_token() {
        let (service, tokens) = persistent();
        let mut login = Request::post("/login_check");
        service.login_success(&mut login, &Token::new(alice(), "main", TokenKind::UsernamePassword));
        let first = issued_cookie(&login);
        let series = first.split_once(':').unwrap().0.to_string();

        let mut request = with_cookie(&first);
        let token = service.auto_login(&mut request, "main").unwrap();
        assert_eq!(token.kind(), TokenKind::RememberMe);
        assert_eq!(token.user_identifier(), "alice");

        let second = issued_cookie(&request);
        assert_ne!(first, second);
        assert!(second.starts_with(&format!("{}:", series)));
        assert_eq!(
            tokens.load_token(&series).unwrap().token_value,
            second.split_once(':').unwrap().1
        );
    }

    #[test]
    fn test_replayed_persistent_cookie_is_theft() {
        let (service, tokens) = persistent();
        let mut login = Request::post("/login_check");
        service.login_success(&mut login, &Token::new(alice(), "main", TokenKind::UsernamePassword));
        let stolen = issued_cookie(&login);
        let series = stolen.split_once(':').unwrap().0.to_string();

        let (_, rotated) = service.consume_cookie(&stolen).unwrap();

        let err = service.consume_cookie(&stolen).unwrap_err();
        assert_eq!(err, AuthenticationError::CookieTheft);
        assert!(tokens.load_token(&series).is_none());
        // the legitimate holder is logged out too
        assert!(service.consume_cookie(&rotated).is_err());
    }

    #[test]
    fn test_expired_persistent_cookie_rejected() {
        let (service, tokens) = persistent();
        tokens.create_token(PersistentToken {
            identifier: "alice".to_string(),
            series: "s1".to_string(),
            token_value: "t1".to_string(),
            last_used: Utc::now() - Duration::seconds(3601),
        });

        let err = service.consume_cookie("s1:t1").unwrap_err();
        assert!(matches!(err, AuthenticationError::InvalidToken(_)));
        assert!(tokens.load_token("s1").is_none());
    }

    #[test]
    fn test_logout_deletes_persistent_series() {
        let (service, tokens) = persistent();
        tokens.create_token(PersistentToken {
            identifier: "alice".to_string(),
            series: "s1".to_string(),
            token_value: "t1".to_string(),
            last_used: Utc::now(),
        });

        let mut request = with_cookie("s1:t1");
        service.login_fail(&mut request, None);

        assert!(tokens.load_token("s1").is_none());
        assert!(request.response_cookies[0].contains("Max-Age=0"));
    }

    #[test]
    fn test_unknown_series_clears_cookie() {
        let (service, _) = persistent();
        let mut request = with_cookie("nope:nope");

        assert!(service.auto_login(&mut request, "main").is_none());
        assert!(request.response_cookies[0].starts_with("REMEMBERME=;"));
    }
}
