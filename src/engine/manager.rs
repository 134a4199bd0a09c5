//! Authenticator manager: runs the authenticators of one firewall.

use std::sync::Arc;

use crate::auth::{Authenticator, Supports};
use crate::domain::{Token, User};
use crate::error::{AuthenticationError, ShieldError, ShieldResult};
use crate::event::{
    CheckPassportEvent, EventDispatcher, LoginFailureEvent, LoginSuccessEvent, SecurityEvent,
    TokenCreatedEvent,
};
use crate::passport::{Badge, BadgeKind, Passport, UserBadge};
use crate::request::{Request, Response};

/// Result of `AuthenticatorManager::authenticate_request`.
#[derive(Debug)]
pub enum AuthenticationOutcome {
    /// No authenticator supported the request.
    NotAttempted,
    /// A token is stored; `response` short-circuits the request when set.
    Authenticated { response: Option<Response> },
    /// Every candidate failed.
    Failed {
        error: AuthenticationError,
        response: Option<Response>,
    },
}

/// Support decisions computed by `supports`, reused by `authenticate_request`.
#[derive(Debug, Clone)]
struct SupportPartition {
    firewall: String,
    yes: Vec<usize>,
    maybe: Vec<usize>,
}

impl SupportPartition {
    fn candidates(&self) -> impl Iterator<Item = usize> + '_ {
        self.yes.iter().chain(&self.maybe).copied()
    }

    fn is_empty(&self) -> bool {
        self.yes.is_empty() && self.maybe.is_empty()
    }
}

enum Attempt {
    Success(Option<Response>),
    Failure {
        error: AuthenticationError,
        passport: Option<Passport>,
    },
}

/// Runs the authenticators of one firewall, first success wins.
pub struct AuthenticatorManager {
    firewall_name: String,
    authenticators: Vec<Arc<dyn Authenticator>>,
    dispatcher: Arc<EventDispatcher>,
    erase_credentials: bool,
    hide_user_not_found: bool,
    required_badges: Vec<BadgeKind>,
}

impl AuthenticatorManager {
    /// `authenticators` are tried in the given order.
    pub fn new(
        firewall_name: impl Into<String>,
        authenticators: Vec<Arc<dyn Authenticator>>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            firewall_name: firewall_name.into(),
            authenticators,
            dispatcher,
            erase_credentials: true,
            hide_user_not_found: true,
            required_badges: Vec::new(),
        }
    }

    pub fn with_erase_credentials(mut self, erase: bool) -> Self {
        self.erase_credentials = erase;
        self
    }

    pub fn with_hide_user_not_found(mut self, hide: bool) -> Self {
        self.hide_user_not_found = hide;
        self
    }

    pub fn with_required_badges(mut self, badges: Vec<BadgeKind>) -> Self {
        self.required_badges = badges;
        self
    }

    pub fn firewall_name(&self) -> &str {
        &self.firewall_name
    }

    pub fn authenticators(&self) -> &[Arc<dyn Authenticator>] {
        &self.authenticators
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// `Yes` if any authenticator said yes, `Maybe` if only lazy ones apply.
    pub fn supports(&self, request: &mut Request) -> Supports {
        let partition = self.partition(request);
        let supports = if !partition.yes.is_empty() {
            Supports::Yes
        } else if !partition.maybe.is_empty() {
            Supports::Maybe
        } else {
            Supports::No
        };
        request.attributes.insert(partition);
        supports
    }

    fn partition(&self, request: &mut Request) -> SupportPartition {
        let mut partition = SupportPartition {
            firewall: self.firewall_name.clone(),
            yes: Vec::new(),
            maybe: Vec::new(),
        };

        for (index, authenticator) in self.authenticators.iter().enumerate() {
            let supports = authenticator.supports(request);
            tracing::debug!(
                firewall = %self.firewall_name,
                authenticator = authenticator.key(),
                supports = ?supports,
                "Checked authenticator support"
            );
            match supports {
                Supports::Yes => partition.yes.push(index),
                Supports::Maybe => partition.maybe.push(index),
                Supports::No => {}
            }
        }
        partition
    }

    /// Authenticate the request with the supporting authenticators.
    ///
    /// Recoverable failures move on to the next candidate; anything else
    /// aborts the request. Once every candidate failed, only the last one
    /// handles the failure.
    pub fn authenticate_request(&self, request: &mut Request) -> ShieldResult<AuthenticationOutcome> {
        let partition = match request.attributes.remove::<SupportPartition>() {
            Some(partition) if partition.firewall == self.firewall_name => partition,
            _ => self.partition(request),
        };
        if partition.is_empty() {
            return Ok(AuthenticationOutcome::NotAttempted);
        }

        let mut last_failure = None;
        for index in partition.candidates() {
            let authenticator = &self.authenticators[index];
            match self.attempt(authenticator.as_ref(), request)? {
                Attempt::Success(response) => {
                    return Ok(AuthenticationOutcome::Authenticated { response });
                }
                Attempt::Failure { error, passport } => {
                    tracing::info!(
                        firewall = %self.firewall_name,
                        authenticator = authenticator.key(),
                        error = %error,
                        "Authentication failed"
                    );
                    last_failure = Some((index, error, passport));
                }
            }
        }

        let Some((index, error, passport)) = last_failure else {
            return Ok(AuthenticationOutcome::NotAttempted);
        };
        let authenticator = &self.authenticators[index];
        let (error, response) =
            self.handle_failure(authenticator.as_ref(), error, passport.as_ref(), request)?;
        Ok(AuthenticationOutcome::Failed { error, response })
    }

    /// Log `user` in through `authenticator` without checking credentials.
    pub fn authenticate_user(
        &self,
        user: User,
        authenticator: &dyn Authenticator,
        request: &mut Request,
        badges: Vec<Badge>,
    ) -> ShieldResult<Option<Response>> {
        let identifier = user.identifier.clone();
        let mut passport = Passport::self_validating(UserBadge::with_loader(
            identifier,
            Arc::new(move |_: &str| Some(user.clone())),
        ));
        for badge in badges {
            passport.add_badge(badge)?;
        }

        let token = self.create_token(authenticator, &passport)?;
        self.handle_success(authenticator, &mut passport, token, request)
    }

    fn attempt(&self, authenticator: &dyn Authenticator, request: &mut Request) -> ShieldResult<Attempt> {
        let mut passport = match authenticator.authenticate(request) {
            Ok(passport) => passport,
            Err(ShieldError::Authentication(error)) => {
                return Ok(Attempt::Failure {
                    error,
                    passport: None,
                })
            }
            Err(e) => return Err(e),
        };

        let token = match self
            .check_passport(authenticator, &mut passport, request)
            .and_then(|()| self.create_token(authenticator, &passport))
        {
            Ok(token) => token,
            Err(ShieldError::Authentication(error)) => {
                return Ok(Attempt::Failure {
                    error,
                    passport: Some(passport),
                })
            }
            Err(e) => return Err(e),
        };

        let response = self.handle_success(authenticator, &mut passport, token, request)?;
        Ok(Attempt::Success(response))
    }

    fn check_passport(
        &self,
        authenticator: &dyn Authenticator,
        passport: &mut Passport,
        request: &mut Request,
    ) -> ShieldResult<()> {
        self.dispatcher
            .dispatch(&mut SecurityEvent::CheckPassport(CheckPassportEvent {
                authenticator: authenticator.key(),
                firewall_name: &self.firewall_name,
                passport: &mut *passport,
                request,
            }))?;

        passport.user()?;

        if let Some(kind) = passport.unresolved_badges().into_iter().next() {
            tracing::warn!(
                firewall = %self.firewall_name,
                authenticator = authenticator.key(),
                badge = %kind,
                "Badge left unresolved after passport check"
            );
            return Err(AuthenticationError::UnresolvedBadge(kind).into());
        }

        let missing: Vec<BadgeKind> = self
            .required_badges
            .iter()
            .filter(|kind| !passport.has_badge(**kind))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(AuthenticationError::MissingRequiredBadges(missing).into());
        }
        Ok(())
    }

    fn create_token(&self, authenticator: &dyn Authenticator, passport: &Passport) -> ShieldResult<Token> {
        let token = authenticator.create_token(passport, &self.firewall_name)?;

        let mut event = SecurityEvent::TokenCreated(TokenCreatedEvent {
            authenticator: authenticator.key(),
            passport,
            token,
        });
        self.dispatcher.dispatch(&mut event)?;
        match event {
            SecurityEvent::TokenCreated(event) => Ok(event.token),
            _ => Err(ShieldError::Invariant(
                "token created event changed kind during dispatch".to_string(),
            )),
        }
    }

    fn handle_success(
        &self,
        authenticator: &dyn Authenticator,
        passport: &mut Passport,
        token: Token,
        request: &mut Request,
    ) -> ShieldResult<Option<Response>> {
        request.token_storage.set_token(token.clone());
        tracing::info!(
            firewall = %self.firewall_name,
            authenticator = authenticator.key(),
            user = %token.user_identifier(),
            "Authentication succeeded"
        );

        let response = authenticator.on_authentication_success(request, &token, &self.firewall_name)?;
        let mut event = SecurityEvent::LoginSuccess(LoginSuccessEvent {
            authenticator: authenticator.key(),
            firewall_name: &self.firewall_name,
            passport,
            token: &token,
            request,
            response,
        });
        self.dispatcher.dispatch(&mut event)?;
        let response = match event {
            SecurityEvent::LoginSuccess(event) => event.response,
            _ => None,
        };

        if self.erase_credentials {
            passport.erase_credentials();
        }
        Ok(response)
    }

    fn handle_failure(
        &self,
        authenticator: &dyn Authenticator,
        error: AuthenticationError,
        passport: Option<&Passport>,
        request: &mut Request,
    ) -> ShieldResult<(AuthenticationError, Option<Response>)> {
        let error = if self.hide_user_not_found && error.reveals_account() {
            AuthenticationError::bad_credentials()
        } else {
            error
        };

        let response = authenticator.on_authentication_failure(request, &error)?;
        let mut event = SecurityEvent::LoginFailure(LoginFailureEvent {
            authenticator: authenticator.key(),
            firewall_name: &self.firewall_name,
            error: &error,
            passport,
            request,
            response,
        });
        self.dispatcher.dispatch(&mut event)?;
        let response = match event {
            SecurityEvent::LoginFailure(event) => event.response,
            _ => None,
        };
        Ok((error, response))
    }
}
