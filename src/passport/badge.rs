//! Badges carried by a passport.
//!
//! Each badge is a typed unit of credential or state validated on its own.
//! Checkers flip `resolved` to true or fail with an `AuthenticationError`.

use std::cell::OnceCell;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::domain::{User, UserProvider};
use crate::error::AuthenticationError;

/// Longest identifier accepted by a user badge.
pub const MAX_IDENTIFIER_LENGTH: usize = 4096;

/// Loads the user behind a user badge.
pub type UserLoader = Arc<dyn Fn(&str) -> Option<User> + Send + Sync>;

/// Badge discriminant, at most one badge per kind on a passport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeKind {
    User,
    Password,
    Csrf,
    RememberMe,
    PreAuthenticated,
    Token,
    SignedToken,
    PasswordUpgrade,
}

impl std::fmt::Display for BadgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BadgeKind::User => write!(f, "user"),
            BadgeKind::Password => write!(f, "password"),
            BadgeKind::Csrf => write!(f, "csrf"),
            BadgeKind::RememberMe => write!(f, "remember_me"),
            BadgeKind::PreAuthenticated => write!(f, "pre_authenticated"),
            BadgeKind::Token => write!(f, "token"),
            BadgeKind::SignedToken => write!(f, "signed_token"),
            BadgeKind::PasswordUpgrade => write!(f, "password_upgrade"),
        }
    }
}

impl std::str::FromStr for BadgeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(BadgeKind::User),
            "password" => Ok(BadgeKind::Password),
            "csrf" => Ok(BadgeKind::Csrf),
            "remember_me" => Ok(BadgeKind::RememberMe),
            "pre_authenticated" => Ok(BadgeKind::PreAuthenticated),
            "token" => Ok(BadgeKind::Token),
            "signed_token" => Ok(BadgeKind::SignedToken),
            "password_upgrade" => Ok(BadgeKind::PasswordUpgrade),
            _ => Err(format!("Unknown badge kind: {}", s)),
        }
    }
}

/// Resolves the user of a passport.
///
/// The loader runs at most once; its result, including "not found", is
/// memoized for the lifetime of the badge.
pub struct UserBadge {
    identifier: String,
    loader: Option<UserLoader>,
    fallback: bool,
    user: OnceCell<Option<User>>,
}

impl UserBadge {
    /// A badge whose loader is supplied later by the firewall's user provider.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            loader: None,
            fallback: false,
            user: OnceCell::new(),
        }
    }

    /// A badge with an explicit loader.
    pub fn with_loader(identifier: impl Into<String>, loader: UserLoader) -> Self {
        Self {
            loader: Some(loader),
            ..Self::new(identifier)
        }
    }

    /// A badge whose loader yields to an explicitly configured user provider.
    pub fn with_fallback_loader(identifier: impl Into<String>, loader: UserLoader) -> Self {
        Self {
            loader: Some(loader),
            fallback: true,
            ..Self::new(identifier)
        }
    }

    /// A badge loading through a user provider.
    pub fn from_provider(identifier: impl Into<String>, provider: Arc<dyn UserProvider>) -> Self {
        Self::with_loader(identifier, provider_loader(provider))
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn has_loader(&self) -> bool {
        self.loader.is_some()
    }

    pub fn has_fallback_loader(&self) -> bool {
        self.loader.is_some() && self.fallback
    }

    /// Replace the loader. Has no effect once the user was loaded.
    pub fn set_loader(&mut self, loader: UserLoader) {
        self.loader = Some(loader);
        self.fallback = false;
    }

    /// Load (once) and return the user.
    pub fn user(&self) -> Result<&User, AuthenticationError> {
        if self.identifier.len() > MAX_IDENTIFIER_LENGTH {
            return Err(AuthenticationError::BadCredentials(
                "Username too long.".to_string(),
            ));
        }

        let loaded = self.user.get_or_init(|| match &self.loader {
            Some(loader) => loader(&self.identifier),
            None => {
                tracing::warn!(identifier = %self.identifier, "User badge has no loader");
                None
            }
        });

        loaded
            .as_ref()
            .ok_or_else(|| AuthenticationError::UserNotFound {
                identifier: self.identifier.clone(),
            })
    }

    /// Whether the user has been loaded successfully.
    pub fn is_resolved(&self) -> bool {
        matches!(self.user.get(), Some(Some(_)))
    }
}

impl std::fmt::Debug for UserBadge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserBadge")
            .field("identifier", &self.identifier)
            .field("has_loader", &self.loader.is_some())
            .field("fallback", &self.fallback)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Adapt a user provider into a badge loader.
pub fn provider_loader(provider: Arc<dyn UserProvider>) -> UserLoader {
    Arc::new(move |identifier: &str| provider.load_user_by_identifier(identifier))
}

/// Plaintext password to verify against the user's stored hash.
#[derive(Debug)]
pub struct PasswordCredentials {
    password: Option<SecretString>,
    resolved: bool,
}

impl PasswordCredentials {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: Some(SecretString::from(password.into())),
            resolved: false,
        }
    }

    /// The plaintext, `None` once erased.
    pub fn password(&self) -> Option<&str> {
        self.password.as_ref().map(|p| p.expose_secret())
    }

    /// Mark verified and drop the plaintext.
    pub fn mark_resolved(&mut self) {
        self.password = None;
        self.resolved = true;
    }

    pub fn erase(&mut self) {
        self.password = None;
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }
}

/// CSRF token submitted with an interactive login.
#[derive(Debug, Clone)]
pub struct CsrfTokenBadge {
    token_id: String,
    token_value: String,
    resolved: bool,
}

impl CsrfTokenBadge {
    pub fn new(token_id: impl Into<String>, token_value: impl Into<String>) -> Self {
        Self {
            token_id: token_id.into(),
            token_value: token_value.into(),
            resolved: false,
        }
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    pub fn token_value(&self) -> &str {
        &self.token_value
    }

    pub fn mark_resolved(&mut self) {
        self.resolved = true;
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }
}

/// Whether the user asked to be remembered.
#[derive(Debug, Clone, Default)]
pub struct RememberMeBadge {
    requested: bool,
}

impl RememberMeBadge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&mut self) {
        self.requested = true;
    }

    pub fn disable(&mut self) {
        self.requested = false;
    }

    pub fn is_requested(&self) -> bool {
        self.requested
    }
}

/// Marks identities established upstream; disables credential checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreAuthenticatedUserBadge;

/// Raw access token and the claim identifying the user.
#[derive(Debug)]
pub struct TokenBadge {
    raw_token: SecretString,
    claim_key: String,
    resolved: bool,
}

impl TokenBadge {
    pub fn new(raw_token: impl Into<String>, claim_key: impl Into<String>) -> Self {
        Self {
            raw_token: SecretString::from(raw_token.into()),
            claim_key: claim_key.into(),
            resolved: false,
        }
    }

    pub fn raw_token(&self) -> &str {
        self.raw_token.expose_secret()
    }

    pub fn claim_key(&self) -> &str {
        &self.claim_key
    }

    pub fn mark_resolved(&mut self) {
        self.resolved = true;
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }
}

/// Claims of a token whose signature has already been verified.
#[derive(Debug, Clone)]
pub struct SignedTokenBadge {
    claims: serde_json::Value,
}

impl SignedTokenBadge {
    pub fn new(claims: serde_json::Value) -> Self {
        Self { claims }
    }

    pub fn claims(&self) -> &serde_json::Value {
        &self.claims
    }
}

/// Requests a rehash of the plaintext after a successful login.
pub struct PasswordUpgradeBadge {
    plaintext: Option<SecretString>,
    upgrader: Option<Arc<dyn UserProvider>>,
}

impl PasswordUpgradeBadge {
    pub fn new(plaintext: impl Into<String>, upgrader: Option<Arc<dyn UserProvider>>) -> Self {
        Self {
            plaintext: Some(SecretString::from(plaintext.into())),
            upgrader,
        }
    }

    pub fn plaintext(&self) -> Option<&str> {
        self.plaintext.as_ref().map(|p| p.expose_secret())
    }

    pub fn upgrader(&self) -> Option<&Arc<dyn UserProvider>> {
        self.upgrader.as_ref()
    }

    pub fn erase(&mut self) {
        self.plaintext = None;
    }
}

impl std::fmt::Debug for PasswordUpgradeBadge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordUpgradeBadge")
            .field("has_plaintext", &self.plaintext.is_some())
            .field("has_upgrader", &self.upgrader.is_some())
            .finish()
    }
}

/// Any badge a passport can carry.
#[derive(Debug)]
pub enum Badge {
    User(UserBadge),
    Password(PasswordCredentials),
    Csrf(CsrfTokenBadge),
    RememberMe(RememberMeBadge),
    PreAuthenticated(PreAuthenticatedUserBadge),
    Token(TokenBadge),
    SignedToken(SignedTokenBadge),
    PasswordUpgrade(PasswordUpgradeBadge),
}

impl Badge {
    pub fn kind(&self) -> BadgeKind {
        match self {
            Badge::User(_) => BadgeKind::User,
            Badge::Password(_) => BadgeKind::Password,
            Badge::Csrf(_) => BadgeKind::Csrf,
            Badge::RememberMe(_) => BadgeKind::RememberMe,
            Badge::PreAuthenticated(_) => BadgeKind::PreAuthenticated,
            Badge::Token(_) => BadgeKind::Token,
            Badge::SignedToken(_) => BadgeKind::SignedToken,
            Badge::PasswordUpgrade(_) => BadgeKind::PasswordUpgrade,
        }
    }

    /// Marker and state badges count as resolved from the start.
    pub fn is_resolved(&self) -> bool {
        match self {
            Badge::User(b) => b.is_resolved(),
            Badge::Password(b) => b.is_resolved(),
            Badge::Csrf(b) => b.is_resolved(),
            Badge::Token(b) => b.is_resolved(),
            Badge::RememberMe(_)
            | Badge::PreAuthenticated(_)
            | Badge::SignedToken(_)
            | Badge::PasswordUpgrade(_) => true,
        }
    }
}

impl From<PasswordCredentials> for Badge {
    fn from(b: PasswordCredentials) -> Self {
        Badge::Password(b)
    }
}

impl From<CsrfTokenBadge> for Badge {
    fn from(b: CsrfTokenBadge) -> Self {
        Badge::Csrf(b)
    }
}

impl From<RememberMeBadge> for Badge {
    fn from(b: RememberMeBadge) -> Self {
        Badge::RememberMe(b)
    }
}

impl From<PreAuthenticatedUserBadge> for Badge {
    fn from(b: PreAuthenticatedUserBadge) -> Self {
        Badge::PreAuthenticated(b)
    }
}

impl From<TokenBadge> for Badge {
    fn from(b: TokenBadge) -> Self {
        Badge::Token(b)
    }
}

impl From<SignedTokenBadge> for Badge {
    fn from(b: SignedTokenBadge) -> Self {
        Badge::SignedToken(b)
    }
}

impl From<PasswordUpgradeBadge> for Badge {
    fn from(b: PasswordUpgradeBadge) -> Self {
        Badge::PasswordUpgrade(b)
    }
}

impl From<UserBadge> for Badge {
    fn from(b: UserBadge) -> Self {
        Badge::User(b)
    }
}
