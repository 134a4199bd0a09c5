//! Request listeners executed by a firewall, by descending priority.
//!
//! | priority | listener |
//! |---|---|
//! | 256 | `ContextListener` |
//! | 0 | `AuthenticatorManagerListener` |
//! | -127 | `LogoutListener` |
//! | -200 | `SwitchUserListener` |
//! | -255 | `AccessListener` |

use std::any::Any;
use std::sync::Arc;

use axum::http::Method;
use regex::Regex;

use super::{AuthenticationOutcome, AuthenticatorManager, Denial};
use crate::access::{AccessDecider, PUBLIC_ACCESS};
use crate::auth::Supports;
use crate::config::{AccessControlRule, SwitchUserConfig};
use crate::domain::{Token, TokenKind, User, UserChecker, UserProvider};
use crate::error::{AuthenticationError, ConfigurationError, ShieldResult};
use crate::event::{EventDispatcher, EventListener, LogoutEvent, SecurityEvent};
use crate::request::{Request, Response};

/// What a listener decided for the request.
#[derive(Debug)]
pub enum ListenerOutcome {
    /// Let the next listener run.
    Continue,
    /// End the request with this response.
    Response(Response),
    /// End the request through the entry point or the responder.
    Deny(Denial),
}

/// One step of a firewall's request handling.
pub trait FirewallListener: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> i32 {
        0
    }

    /// `Maybe` lets a lazy firewall defer the listener.
    fn supports(&self, _request: &mut Request) -> Supports {
        Supports::Yes
    }

    fn handle(&self, request: &mut Request) -> ShieldResult<ListenerOutcome>;
}

/// Session key of the token of `firewall_name`.
pub fn context_key(firewall_name: &str) -> String {
    format!("_security_{}", firewall_name)
}

/// Restores the token from the session and writes it back after login.
pub struct ContextListener {
    firewall_name: String,
    provider: Arc<dyn UserProvider>,
}

impl ContextListener {
    pub fn new(firewall_name: impl Into<String>, provider: Arc<dyn UserProvider>) -> Self {
        Self {
            firewall_name: firewall_name.into(),
            provider,
        }
    }

    fn refresh(&self, token: Token) -> Option<Token> {
        if token.kind() == TokenKind::Anonymous {
            return Some(token);
        }
        self.provider
            .refresh_user(token.user())
            .map(|user| token.with_user(user))
    }
}

impl FirewallListener for ContextListener {
    fn name(&self) -> &str {
        "context"
    }

    fn priority(&self) -> i32 {
        256
    }

    fn supports(&self, _request: &mut Request) -> Supports {
        // restoring the session is cheap enough to never block laziness
        Supports::Maybe
    }

    fn handle(&self, request: &mut Request) -> ShieldResult<ListenerOutcome> {
        if request.token().is_some() {
            return Ok(ListenerOutcome::Continue);
        }
        let key = context_key(&self.firewall_name);
        let Some(session) = request.session.as_mut() else {
            return Ok(ListenerOutcome::Continue);
        };
        let Some(stored) = session.get(&key).cloned() else {
            return Ok(ListenerOutcome::Continue);
        };

        let token = match serde_json::from_value::<Token>(stored) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(firewall = %self.firewall_name, error = %e, "Discarded unreadable session token");
                session.remove(&key);
                return Ok(ListenerOutcome::Continue);
            }
        };

        match self.refresh(token) {
            Some(token) => {
                tracing::debug!(
                    firewall = %self.firewall_name,
                    user = %token.user_identifier(),
                    "Restored token from session"
                );
                request.token_storage.set_token(token);
            }
            None => {
                tracing::info!(firewall = %self.firewall_name, "Stored user no longer exists, deauthenticated");
                session.remove(&key);
            }
        }
        Ok(ListenerOutcome::Continue)
    }
}

impl EventListener for ContextListener {
    fn on_event(&self, event: &mut SecurityEvent<'_>) -> ShieldResult<()> {
        let SecurityEvent::LoginSuccess(event) = event else {
            return Ok(());
        };
        if event.token.kind() == TokenKind::Anonymous {
            return Ok(());
        }
        let value = serde_json::to_value(event.token)?;
        if let Some(session) = event.request.session_mut() {
            session.set(context_key(&self.firewall_name), value);
        }
        Ok(())
    }
}

/// Moves the session to a new id after login so an id planted before
/// authentication cannot be reused.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionStrategyListener;

impl EventListener for SessionStrategyListener {
    fn on_event(&self, event: &mut SecurityEvent<'_>) -> ShieldResult<()> {
        let SecurityEvent::LoginSuccess(event) = event else {
            return Ok(());
        };
        if event.token.kind() == TokenKind::Anonymous {
            return Ok(());
        }
        if let Some(session) = event.request.session_mut() {
            session.migrate();
        }
        Ok(())
    }
}

/// Runs the authenticator manager.
pub struct AuthenticatorManagerListener {
    manager: Arc<AuthenticatorManager>,
}

impl AuthenticatorManagerListener {
    pub fn new(manager: Arc<AuthenticatorManager>) -> Self {
        Self { manager }
    }
}

impl FirewallListener for AuthenticatorManagerListener {
    fn name(&self) -> &str {
        "authenticators"
    }

    fn supports(&self, request: &mut Request) -> Supports {
        self.manager.supports(request)
    }

    fn handle(&self, request: &mut Request) -> ShieldResult<ListenerOutcome> {
        let outcome = match self.manager.authenticate_request(request)? {
            AuthenticationOutcome::NotAttempted
            | AuthenticationOutcome::Authenticated { response: None } => ListenerOutcome::Continue,
            AuthenticationOutcome::Authenticated {
                response: Some(response),
            }
            | AuthenticationOutcome::Failed {
                response: Some(response),
                ..
            } => ListenerOutcome::Response(response),
            AuthenticationOutcome::Failed {
                error,
                response: None,
            } => ListenerOutcome::Deny(Denial::Unauthenticated(Some(error))),
        };
        Ok(outcome)
    }
}

/// Logs the user out on the logout path.
pub struct LogoutListener {
    firewall_name: String,
    path: String,
    target: String,
    dispatcher: Arc<EventDispatcher>,
}

impl LogoutListener {
    pub fn new(
        firewall_name: impl Into<String>,
        path: impl Into<String>,
        target: impl Into<String>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            firewall_name: firewall_name.into(),
            path: path.into(),
            target: target.into(),
            dispatcher,
        }
    }
}

impl FirewallListener for LogoutListener {
    fn name(&self) -> &str {
        "logout"
    }

    fn priority(&self) -> i32 {
        -127
    }

    fn supports(&self, request: &mut Request) -> Supports {
        if request.path == self.path {
            Supports::Yes
        } else {
            Supports::No
        }
    }

    fn handle(&self, request: &mut Request) -> ShieldResult<ListenerOutcome> {
        let token = request.token_storage.clear();
        if let Some(session) = request.session_mut() {
            session.remove(&context_key(&self.firewall_name));
        }

        let mut event = SecurityEvent::Logout(LogoutEvent {
            firewall_name: &self.firewall_name,
            token: token.as_ref(),
            request,
            response: None,
        });
        self.dispatcher.dispatch(&mut event)?;
        let response = match event {
            SecurityEvent::Logout(event) => event.response,
            _ => None,
        };

        tracing::info!(
            firewall = %self.firewall_name,
            user = token.as_ref().map(|t| t.user_identifier()).unwrap_or("-"),
            "Logged out"
        );
        Ok(ListenerOutcome::Response(
            response.unwrap_or_else(|| Response::redirect(&self.target)),
        ))
    }
}

/// Parameter value leaving an impersonation.
pub const SWITCH_USER_EXIT: &str = "_exit";

/// Lets users granted the switch role act as another user.
///
/// `?_switch_user=bob` replaces the token with a `SwitchUser` token for
/// `bob` that keeps the impersonator's token; `?_switch_user=_exit`
/// restores it. Stateful firewalls store the new token and redirect to the
/// same URL without the parameter.
pub struct SwitchUserListener {
    firewall_name: String,
    parameter: String,
    role: String,
    provider: Arc<dyn UserProvider>,
    checker: Arc<dyn UserChecker>,
    decider: Arc<dyn AccessDecider>,
    stateless: bool,
}

impl SwitchUserListener {
    pub fn new(
        firewall_name: impl Into<String>,
        options: &SwitchUserConfig,
        provider: Arc<dyn UserProvider>,
        checker: Arc<dyn UserChecker>,
        decider: Arc<dyn AccessDecider>,
    ) -> Self {
        Self {
            firewall_name: firewall_name.into(),
            parameter: options.parameter.clone(),
            role: options.role.clone(),
            provider,
            checker,
            decider,
            stateless: false,
        }
    }

    pub fn stateless(mut self, stateless: bool) -> Self {
        self.stateless = stateless;
        self
    }

    fn attempt_switch(&self, token: &Token, identifier: &str) -> Result<Token, Denial> {
        if token.kind() == TokenKind::SwitchUser && token.user_identifier() == identifier {
            return Ok(token.clone());
        }
        // switching again starts from the impersonator
        let current = token.original_token().unwrap_or(token);

        let target = self.provider.load_user_by_identifier(identifier);
        let subject = target.as_ref().map(|user| user as &dyn Any);
        if !self.decider.decide(current, &[self.role.as_str()], subject) {
            tracing::info!(
                user = %current.user_identifier(),
                target = %identifier,
                "Switch user denied"
            );
            return Err(Denial::AccessDenied);
        }

        let target: User = target.ok_or_else(|| {
            Denial::Unauthenticated(Some(AuthenticationError::UserNotFound {
                identifier: identifier.to_string(),
            }))
        })?;
        self.checker
            .check_pre_auth(&target)
            .and_then(|_| self.checker.check_post_auth(&target))
            .map_err(|e| Denial::Unauthenticated(Some(e)))?;

        tracing::info!(
            firewall = %self.firewall_name,
            user = %current.user_identifier(),
            target = %identifier,
            "Switched user"
        );
        Ok(Token::switched(target, self.firewall_name.clone(), current.clone()))
    }

    fn attempt_exit(&self, token: &Token) -> Result<Token, Denial> {
        let original = token.original_token().ok_or_else(|| {
            Denial::Unauthenticated(Some(AuthenticationError::Custom(
                "Could not find original token.".to_string(),
            )))
        })?;
        let user = self
            .provider
            .refresh_user(original.user())
            .ok_or(Denial::Unauthenticated(None))?;

        tracing::info!(
            firewall = %self.firewall_name,
            user = %user.identifier,
            "Exited switch user"
        );
        Ok(original.with_user(user))
    }

    /// Current URL without the switch parameter.
    fn target_url(&self, request: &Request) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(request.query.iter().filter(|(key, _)| **key != self.parameter))
            .finish();
        if query.is_empty() {
            request.path.clone()
        } else {
            format!("{}?{}", request.path, query)
        }
    }
}

impl FirewallListener for SwitchUserListener {
    fn name(&self) -> &str {
        "switch_user"
    }

    fn priority(&self) -> i32 {
        -200
    }

    fn supports(&self, request: &mut Request) -> Supports {
        if request.query.contains_key(&self.parameter) {
            Supports::Yes
        } else {
            Supports::No
        }
    }

    fn handle(&self, request: &mut Request) -> ShieldResult<ListenerOutcome> {
        let Some(identifier) = request.query.get(&self.parameter).cloned() else {
            return Ok(ListenerOutcome::Continue);
        };
        let Some(token) = request.token() else {
            return Ok(ListenerOutcome::Deny(Denial::Unauthenticated(None)));
        };

        let result = if identifier == SWITCH_USER_EXIT {
            self.attempt_exit(token)
        } else {
            self.attempt_switch(token, &identifier)
        };
        let token = match result {
            Ok(token) => token,
            Err(denial) => return Ok(ListenerOutcome::Deny(denial)),
        };

        if !self.stateless {
            let value = serde_json::to_value(&token)?;
            if let Some(session) = request.session_mut() {
                session.set(context_key(&self.firewall_name), value);
            }
        }
        request.token_storage.set_token(token);

        if self.stateless {
            Ok(ListenerOutcome::Continue)
        } else {
            Ok(ListenerOutcome::Response(Response::redirect(&self.target_url(request))))
        }
    }
}

struct AccessRule {
    path: Regex,
    methods: Vec<Method>,
    attributes: Vec<String>,
}

/// Ordered access control rules, the first matching rule applies.
#[derive(Default)]
pub struct AccessMap {
    rules: Vec<AccessRule>,
}

impl AccessMap {
    pub fn from_rules(rules: &[AccessControlRule]) -> Result<Self, ConfigurationError> {
        let rules = rules
            .iter()
            .map(|rule| {
                let path = Regex::new(&rule.path).map_err(|e| ConfigurationError::InvalidPattern {
                    pattern: rule.path.clone(),
                    reason: e.to_string(),
                })?;
                Ok(AccessRule {
                    path,
                    methods: parse_methods(&rule.methods)?,
                    attributes: rule.roles.clone(),
                })
            })
            .collect::<Result<Vec<_>, ConfigurationError>>()?;
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Attributes required for `request`, `None` when no rule matches.
    pub fn attributes(&self, request: &Request) -> Option<&[String]> {
        self.rules
            .iter()
            .find(|rule| {
                rule.path.is_match(&request.path)
                    && (rule.methods.is_empty() || rule.methods.contains(&request.method))
            })
            .map(|rule| rule.attributes.as_slice())
    }
}

pub(crate) fn parse_methods(methods: &[String]) -> Result<Vec<Method>, ConfigurationError> {
    methods
        .iter()
        .map(|m| {
            Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(|e| {
                ConfigurationError::InvalidPattern {
                    pattern: m.clone(),
                    reason: e.to_string(),
                }
            })
        })
        .collect()
}

/// Attributes of the matching access rule, cached by `supports`.
#[derive(Debug, Clone)]
struct AccessControlAttributes(Vec<String>);

/// Enforces access control rules; last listener of the chain.
pub struct AccessListener {
    map: Arc<AccessMap>,
    decider: Arc<dyn AccessDecider>,
}

impl AccessListener {
    pub fn new(map: Arc<AccessMap>, decider: Arc<dyn AccessDecider>) -> Self {
        Self { map, decider }
    }

    fn is_public(attributes: &[String]) -> bool {
        attributes.is_empty() || (attributes.len() == 1 && attributes[0] == PUBLIC_ACCESS)
    }
}

impl FirewallListener for AccessListener {
    fn name(&self) -> &str {
        "access_control"
    }

    fn priority(&self) -> i32 {
        -255
    }

    fn supports(&self, request: &mut Request) -> Supports {
        let attributes = self.map.attributes(request).map(<[String]>::to_vec).unwrap_or_default();
        let public = Self::is_public(&attributes);
        request.attributes.insert(AccessControlAttributes(attributes));
        if public {
            Supports::Maybe
        } else {
            Supports::Yes
        }
    }

    fn handle(&self, request: &mut Request) -> ShieldResult<ListenerOutcome> {
        let attributes = match request.attributes.remove::<AccessControlAttributes>() {
            Some(AccessControlAttributes(attributes)) => attributes,
            None => self.map.attributes(request).map(<[String]>::to_vec).unwrap_or_default(),
        };
        if Self::is_public(&attributes) {
            return Ok(ListenerOutcome::Continue);
        }

        let Some(token) = request.token() else {
            tracing::debug!(path = %request.path, "Access requires authentication");
            return Ok(ListenerOutcome::Deny(Denial::Unauthenticated(None)));
        };

        let attributes: Vec<&str> = attributes.iter().map(String::as_str).collect();
        if self.decider.decide(token, &attributes, None) {
            return Ok(ListenerOutcome::Continue);
        }

        tracing::info!(
            path = %request.path,
            user = %token.user_identifier(),
            attributes = ?attributes,
            "Access denied"
        );
        let denial = match token.kind() {
            TokenKind::Anonymous | TokenKind::RememberMe => Denial::Unauthenticated(Some(
                AuthenticationError::Custom(
                    "Full authentication is required to access this resource.".to_string(),
                ),
            )),
            _ => Denial::AccessDenied,
        };
        Ok(ListenerOutcome::Deny(denial))
    }
}
