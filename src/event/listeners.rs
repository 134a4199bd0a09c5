//! Listeners validating passports and reacting to logins.
//!
//! Badge checkers run on the passport-checked event in a fixed order:
//!
//! | priority | listener |
//! |---|---|
//! | 2048 | `UserProviderListener` |
//! | 512 | `CsrfProtectionListener` |
//! | 256 | `UserCheckerListener` |
//! | 0 | `CheckCredentialsListener` |
//! | -32 | `CheckRememberMeConditionsListener` |

use std::sync::Arc;

use super::{EventDispatcher, EventKind, EventListener, SecurityEvent};
use crate::auth::{CsrfTokenManager, PasswordHasher, RememberMeService};
use crate::domain::{UserChecker, UserProvider};
use crate::error::{AuthenticationError, ShieldResult};
use crate::passport::{provider_loader, BadgeKind, PasswordUpgradeBadge};
use crate::request::Request;

pub const USER_PROVIDER_PRIORITY: i32 = 2048;
pub const CSRF_PRIORITY: i32 = 512;
pub const USER_CHECKER_PRIORITY: i32 = 256;
pub const CHECK_CREDENTIALS_PRIORITY: i32 = 0;
pub const REMEMBER_ME_CONDITIONS_PRIORITY: i32 = -32;

/// Gives user badges without an explicit loader the firewall's provider.
pub struct UserProviderListener {
    provider: Arc<dyn UserProvider>,
}

impl UserProviderListener {
    pub fn new(provider: Arc<dyn UserProvider>) -> Self {
        Self { provider }
    }
}

impl EventListener for UserProviderListener {
    fn on_event(&self, event: &mut SecurityEvent<'_>) -> ShieldResult<()> {
        let SecurityEvent::CheckPassport(event) = event else {
            return Ok(());
        };
        let badge = event.passport.user_badge_mut();
        if !badge.has_loader() || badge.has_fallback_loader() {
            badge.set_loader(provider_loader(self.provider.clone()));
        }
        Ok(())
    }
}

/// Validates CSRF badges.
pub struct CsrfProtectionListener {
    manager: Arc<dyn CsrfTokenManager>,
}

impl CsrfProtectionListener {
    pub fn new(manager: Arc<dyn CsrfTokenManager>) -> Self {
        Self { manager }
    }
}

impl EventListener for CsrfProtectionListener {
    fn on_event(&self, event: &mut SecurityEvent<'_>) -> ShieldResult<()> {
        let SecurityEvent::CheckPassport(event) = event else {
            return Ok(());
        };
        let Some(badge) = event.passport.csrf_mut() else {
            return Ok(());
        };
        if badge.is_resolved() {
            return Ok(());
        }

        if !self
            .manager
            .is_token_valid(event.request, badge.token_id(), badge.token_value())
        {
            return Err(AuthenticationError::InvalidCsrfToken.into());
        }
        badge.mark_resolved();
        Ok(())
    }
}

/// Account checks: before credentials on the passport, after on the token.
pub struct UserCheckerListener {
    checker: Arc<dyn UserChecker>,
}

impl UserCheckerListener {
    pub fn new(checker: Arc<dyn UserChecker>) -> Self {
        Self { checker }
    }
}

impl EventListener for UserCheckerListener {
    fn on_event(&self, event: &mut SecurityEvent<'_>) -> ShieldResult<()> {
        match event {
            SecurityEvent::CheckPassport(event) => {
                if event.passport.is_pre_authenticated() {
                    return Ok(());
                }
                let user = event.passport.user()?;
                self.checker.check_pre_auth(user)?;
            }
            SecurityEvent::TokenCreated(event) => {
                self.checker.check_post_auth(event.token.user())?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Verifies the submitted password against the stored hash.
pub struct CheckCredentialsListener {
    hasher: Arc<dyn PasswordHasher>,
}

impl CheckCredentialsListener {
    pub fn new(hasher: Arc<dyn PasswordHasher>) -> Self {
        Self { hasher }
    }
}

impl EventListener for CheckCredentialsListener {
    fn on_event(&self, event: &mut SecurityEvent<'_>) -> ShieldResult<()> {
        let SecurityEvent::CheckPassport(event) = event else {
            return Ok(());
        };
        let passport = &mut *event.passport;

        let Some(credentials) = passport.password() else {
            return Ok(());
        };
        if credentials.is_resolved() {
            return Ok(());
        }
        let plaintext = credentials
            .password()
            .ok_or_else(|| {
                AuthenticationError::BadCredentials("The presented password is empty.".to_string())
            })?
            .to_string();

        let user = passport.user()?;
        let Some(hash) = user.password_hash.as_deref() else {
            return Err(AuthenticationError::BadCredentials(
                "The user has no password to check against.".to_string(),
            )
            .into());
        };
        if !self.hasher.verify(hash, &plaintext) {
            return Err(AuthenticationError::BadCredentials(
                "The presented password is invalid.".to_string(),
            )
            .into());
        }

        if !passport.has_badge(BadgeKind::PasswordUpgrade) {
            passport.add_badge(PasswordUpgradeBadge::new(plaintext, None))?;
        }
        if let Some(credentials) = passport.password_mut() {
            credentials.mark_resolved();
        }
        Ok(())
    }
}

/// Rehashes passwords stored with an outdated scheme after login.
pub struct PasswordMigratingListener {
    hasher: Arc<dyn PasswordHasher>,
    provider: Arc<dyn UserProvider>,
}

impl PasswordMigratingListener {
    pub fn new(hasher: Arc<dyn PasswordHasher>, provider: Arc<dyn UserProvider>) -> Self {
        Self { hasher, provider }
    }
}

impl EventListener for PasswordMigratingListener {
    fn on_event(&self, event: &mut SecurityEvent<'_>) -> ShieldResult<()> {
        let SecurityEvent::LoginSuccess(event) = event else {
            return Ok(());
        };
        let Some(badge) = event.passport.password_upgrade() else {
            return Ok(());
        };
        let Some(plaintext) = badge.plaintext() else {
            return Ok(());
        };
        let user = event.passport.user()?;
        let Some(hash) = user.password_hash.as_deref() else {
            return Ok(());
        };
        if !self.hasher.needs_rehash(hash) {
            return Ok(());
        }

        let upgrader = match badge.upgrader() {
            Some(upgrader) => upgrader,
            None if self.provider.supports_password_upgrade() => &self.provider,
            None => return Ok(()),
        };
        upgrader.upgrade_password(user, &self.hasher.hash(plaintext)?);
        tracing::info!(user = %user.identifier, "Password hash migrated");
        Ok(())
    }
}

/// Turns on the remember-me badge when the user asked for it.
pub struct CheckRememberMeConditionsListener {
    parameter: String,
    always_remember_me: bool,
}

impl CheckRememberMeConditionsListener {
    pub fn new(parameter: impl Into<String>, always_remember_me: bool) -> Self {
        Self {
            parameter: parameter.into(),
            always_remember_me,
        }
    }

    fn is_requested(&self, request: &Request) -> bool {
        let form = request.form();
        if let Some(value) = form
            .get(&self.parameter)
            .or_else(|| request.query.get(&self.parameter))
        {
            return Self::is_truthy(value);
        }
        if !request.is_json() {
            return false;
        }

        match serde_json::from_str::<serde_json::Value>(&request.body) {
            Ok(body) => match body.get(&self.parameter) {
                Some(serde_json::Value::Bool(b)) => *b,
                Some(serde_json::Value::String(s)) => Self::is_truthy(s),
                _ => false,
            },
            Err(_) => false,
        }
    }

    fn is_truthy(value: &str) -> bool {
        matches!(
            value.to_ascii_lowercase().as_str(),
            "true" | "on" | "1" | "yes"
        )
    }
}

impl EventListener for CheckRememberMeConditionsListener {
    fn on_event(&self, event: &mut SecurityEvent<'_>) -> ShieldResult<()> {
        let SecurityEvent::CheckPassport(event) = event else {
            return Ok(());
        };
        if event.passport.remember_me().is_none() {
            return Ok(());
        }

        let requested = self.always_remember_me || self.is_requested(event.request);
        if let Some(badge) = event.passport.remember_me_mut() {
            if requested {
                badge.enable();
            }
        }
        Ok(())
    }
}

/// Issues the remember-me cookie on login, cancels it on failure and logout.
pub struct RememberMeListener {
    service: Arc<dyn RememberMeService>,
}

impl RememberMeListener {
    pub fn new(service: Arc<dyn RememberMeService>) -> Self {
        Self { service }
    }
}

impl EventListener for RememberMeListener {
    fn on_event(&self, event: &mut SecurityEvent<'_>) -> ShieldResult<()> {
        match event {
            SecurityEvent::LoginSuccess(event) => {
                let requested = event
                    .passport
                    .remember_me()
                    .is_some_and(|badge| badge.is_requested());
                if requested {
                    self.service.login_success(event.request, event.token);
                }
            }
            SecurityEvent::LoginFailure(event) => {
                self.service.login_fail(event.request, Some(event.error));
            }
            SecurityEvent::Logout(event) => {
                self.service.login_fail(event.request, None);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Register the badge checkers every firewall needs.
pub fn register_badge_checkers(
    dispatcher: &mut EventDispatcher,
    provider: Arc<dyn UserProvider>,
    hasher: Arc<dyn PasswordHasher>,
    checker: Arc<dyn UserChecker>,
    csrf: Arc<dyn CsrfTokenManager>,
) {
    dispatcher.add_listener(
        EventKind::CheckPassport,
        Arc::new(UserProviderListener::new(provider.clone())),
        USER_PROVIDER_PRIORITY,
    );
    dispatcher.add_listener(
        EventKind::CheckPassport,
        Arc::new(CsrfProtectionListener::new(csrf)),
        CSRF_PRIORITY,
    );

    let user_checker: Arc<dyn EventListener> = Arc::new(UserCheckerListener::new(checker));
    dispatcher.add_listener(EventKind::CheckPassport, user_checker.clone(), USER_CHECKER_PRIORITY);
    dispatcher.add_listener(EventKind::TokenCreated, user_checker, 0);

    dispatcher.add_listener(
        EventKind::CheckPassport,
        Arc::new(CheckCredentialsListener::new(hasher.clone())),
        CHECK_CREDENTIALS_PRIORITY,
    );
    dispatcher.add_listener(
        EventKind::LoginSuccess,
        Arc::new(PasswordMigratingListener::new(hasher, provider)),
        0,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Argon2PasswordHasher, SessionCsrfTokenManager};
    use crate::domain::{EnabledUserChecker, InMemoryUserProvider, Token, TokenKind, User};
    use crate::error::ShieldError;
    use crate::event::{CheckPassportEvent, LoginSuccessEvent};
    use crate::passport::{
        CsrfTokenBadge, Passport, PasswordCredentials, PreAuthenticatedUserBadge, RememberMeBadge,
        UserBadge,
    };
    use crate::request::Session;

    fn provider(users: Vec<User>) -> Arc<InMemoryUserProvider> {
        Arc::new(InMemoryUserProvider::from_users(users))
    }

    fn dispatcher(provider: Arc<InMemoryUserProvider>) -> EventDispatcher {
        let mut dispatcher = EventDispatcher::new();
        register_badge_checkers(
            &mut dispatcher,
            provider,
            Arc::new(Argon2PasswordHasher::fast()),
            Arc::new(EnabledUserChecker),
            Arc::new(SessionCsrfTokenManager),
        );
        dispatcher
    }

    fn check(
        dispatcher: &EventDispatcher,
        passport: &mut Passport,
        request: &mut Request,
    ) -> ShieldResult<()> {
        dispatcher.dispatch(&mut SecurityEvent::CheckPassport(CheckPassportEvent {
            authenticator: "test",
            firewall_name: "main",
            passport,
            request,
        }))
    }

    fn alice(hash: &str) -> User {
        User::with_password("alice", hash, vec!["ROLE_USER".to_string()])
    }

    #[test]
    fn test_valid_password_resolves_and_erases_plaintext() {
        let hash = Argon2PasswordHasher::fast().hash("pw").unwrap();
        let dispatcher = dispatcher(provider(vec![alice(&hash)]));
        let mut passport = Passport::new(UserBadge::new("alice"), PasswordCredentials::new("pw"));

        check(&dispatcher, &mut passport, &mut Request::post("/login")).unwrap();

        assert!(passport.unresolved_badges().is_empty());
        assert!(passport.password().unwrap().password().is_none());
        assert!(passport.password_upgrade().is_some());
    }

    #[test]
    fn test_wrong_password_fails() {
        let hash = Argon2PasswordHasher::fast().hash("pw").unwrap();
        let dispatcher = dispatcher(provider(vec![alice(&hash)]));
        let mut passport = Passport::new(UserBadge::new("alice"), PasswordCredentials::new("nope"));

        let err = check(&dispatcher, &mut passport, &mut Request::post("/login")).unwrap_err();
        assert!(matches!(
            err,
            ShieldError::Authentication(AuthenticationError::BadCredentials(_))
        ));
    }

    #[test]
    fn test_user_without_hash_fails() {
        let dispatcher = dispatcher(provider(vec![User::new("alice", vec![])]));
        let mut passport = Passport::new(UserBadge::new("alice"), PasswordCredentials::new("pw"));

        let err = check(&dispatcher, &mut passport, &mut Request::post("/login")).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_disabled_user_fails_before_credentials() {
        let mut user = alice(&Argon2PasswordHasher::fast().hash("pw").unwrap());
        user.enabled = false;
        let dispatcher = dispatcher(provider(vec![user]));
        let mut passport = Passport::new(UserBadge::new("alice"), PasswordCredentials::new("pw"));

        let err = check(&dispatcher, &mut passport, &mut Request::post("/login")).unwrap_err();
        assert!(matches!(
            err,
            ShieldError::Authentication(AuthenticationError::AccountStatus(_))
        ));
        // the password was never verified
        assert_eq!(passport.password().unwrap().password(), Some("pw"));
    }

    #[test]
    fn test_pre_authenticated_skips_user_checker() {
        let mut user = User::new("alice", vec![]);
        user.enabled = false;
        let dispatcher = dispatcher(provider(vec![user]));
        let mut passport = Passport::self_validating(UserBadge::new("alice"))
            .with_badge(PreAuthenticatedUserBadge)
            .unwrap();

        check(&dispatcher, &mut passport, &mut Request::get("/")).unwrap();
    }

    #[test]
    fn test_fallback_loader_replaced_by_provider() {
        let dispatcher = dispatcher(provider(vec![User::new("alice", vec!["ROLE_DB".to_string()])]));
        let mut passport = Passport::self_validating(UserBadge::with_fallback_loader(
            "alice",
            Arc::new(|id: &str| Some(User::new(id, vec!["ROLE_CLAIM".to_string()]))),
        ));

        check(&dispatcher, &mut passport, &mut Request::get("/")).unwrap();
        assert!(passport.user().unwrap().has_role("ROLE_DB"));
    }

    #[test]
    fn test_csrf_checked_against_session() {
        let dispatcher = dispatcher(provider(vec![User::new("alice", vec![])]));
        let mut request = Request::post("/login").with_session(Session::new());
        let token = SessionCsrfTokenManager
            .get_token(&mut request, "authenticate")
            .unwrap();

        let mut passport = Passport::self_validating(UserBadge::new("alice"))
            .with_badge(CsrfTokenBadge::new("authenticate", token))
            .unwrap();
        check(&dispatcher, &mut passport, &mut request).unwrap();
        assert!(passport.unresolved_badges().is_empty());

        let mut passport = Passport::self_validating(UserBadge::new("alice"))
            .with_badge(CsrfTokenBadge::new("authenticate", "forged"))
            .unwrap();
        let err = check(&dispatcher, &mut passport, &mut request).unwrap_err();
        assert!(matches!(
            err,
            ShieldError::Authentication(AuthenticationError::InvalidCsrfToken)
        ));
    }

    #[test]
    fn test_remember_me_enabled_by_parameter() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_listener(
            EventKind::CheckPassport,
            Arc::new(CheckRememberMeConditionsListener::new("_remember_me", false)),
            REMEMBER_ME_CONDITIONS_PRIORITY,
        );

        let mut passport = Passport::self_validating(UserBadge::new("alice"))
            .with_badge(RememberMeBadge::new())
            .unwrap();
        let mut request = Request::post("/login").with_form(&[("_remember_me", "on")]);
        check(&dispatcher, &mut passport, &mut request).unwrap();
        assert!(passport.remember_me().unwrap().is_requested());

        let mut passport = Passport::self_validating(UserBadge::new("alice"))
            .with_badge(RememberMeBadge::new())
            .unwrap();
        check(&dispatcher, &mut passport, &mut Request::post("/login")).unwrap();
        assert!(!passport.remember_me().unwrap().is_requested());
    }

    #[test]
    fn test_legacy_hash_migrated_on_login_success() {
        let legacy = Argon2PasswordHasher::legacy_sha256("pw");
        let provider = provider(vec![alice(&legacy)]);
        let dispatcher = dispatcher(provider.clone());

        let mut passport = Passport::new(UserBadge::new("alice"), PasswordCredentials::new("pw"));
        let mut request = Request::post("/login");
        check(&dispatcher, &mut passport, &mut request).unwrap();

        let token = Token::from_passport(&passport, "main", TokenKind::UsernamePassword).unwrap();
        dispatcher
            .dispatch(&mut SecurityEvent::LoginSuccess(LoginSuccessEvent {
                authenticator: "test",
                firewall_name: "main",
                passport: &passport,
                token: &token,
                request: &mut request,
                response: None,
            }))
            .unwrap();

        let stored = provider.load_user_by_identifier("alice").unwrap();
        let migrated = stored.password_hash.unwrap();
        assert!(migrated.starts_with("$argon2id$"));
        assert!(Argon2PasswordHasher::fast().verify(&migrated, "pw"));
    }
}
