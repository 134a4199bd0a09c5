//! Firewalls: a request matcher plus the listener chain protecting it.
//!
//! A firewall runs its listeners by descending priority until one ends the
//! request. Lazy firewalls defer the listeners that only say `Maybe` on
//! safe requests; they run once the token is actually needed.

use std::sync::Arc;

use axum::http::Method;
use regex::Regex;

use super::listeners::parse_methods;
use super::{
    resolve_entry_point, AccessListener, AccessMap, AuthenticatorManager,
    AuthenticatorManagerListener, ContextListener, DefaultResponder, Denial, EntryPoint,
    FirewallListener, ListenerOutcome, LogoutListener, Responder, SessionStrategyListener,
};
use crate::access::AccessDecider;
use crate::auth::{target_path_key, Authenticator, Supports};
use crate::config::LogoutConfig;
use crate::domain::UserProvider;
use crate::error::{ConfigurationError, ShieldError, ShieldResult};
use crate::event::{EventDispatcher, EventKind, EventListener};
use crate::passport::BadgeKind;
use crate::request::{Request, Response};
use crate::services::ServiceRegistry;

/// Matches requests by path regex and method.
#[derive(Debug, Clone, Default)]
pub struct RequestMatcher {
    path: Option<Regex>,
    methods: Vec<Method>,
}

impl RequestMatcher {
    pub fn new(pattern: Option<&str>, methods: &[String]) -> Result<Self, ConfigurationError> {
        let path = pattern
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigurationError::InvalidPattern {
                    pattern: p.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;
        Ok(Self {
            path,
            methods: parse_methods(methods)?,
        })
    }

    /// Matches every request.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn matches(&self, request: &Request) -> bool {
        let path_ok = self.path.as_ref().map_or(true, |re| re.is_match(&request.path));
        path_ok && (self.methods.is_empty() || self.methods.contains(&request.method))
    }
}

/// Listeners a lazy firewall deferred for this request.
#[derive(Debug, Clone)]
struct PendingListeners {
    firewall: String,
    indices: Vec<usize>,
}

/// One configured firewall.
pub struct Firewall {
    name: String,
    matcher: RequestMatcher,
    listeners: Vec<Arc<dyn FirewallListener>>,
    manager: Arc<AuthenticatorManager>,
    entry_point: Option<EntryPoint>,
    responder: Arc<dyn Responder>,
    stateless: bool,
    lazy: bool,
}

impl Firewall {
    pub fn builder(name: impl Into<String>) -> FirewallBuilder {
        FirewallBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matches(&self, request: &Request) -> bool {
        self.matcher.matches(request)
    }

    pub fn is_stateless(&self) -> bool {
        self.stateless
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub fn entry_point(&self) -> Option<&EntryPoint> {
        self.entry_point.as_ref()
    }

    pub fn manager(&self) -> &Arc<AuthenticatorManager> {
        &self.manager
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        self.manager.dispatcher()
    }

    /// Authenticator of this firewall by key.
    pub fn authenticator(&self, key: &str) -> Option<&Arc<dyn Authenticator>> {
        self.manager.authenticators().iter().find(|a| a.key() == key)
    }

    /// Listener names in execution order.
    pub fn listener_names(&self) -> Vec<&str> {
        self.listeners.iter().map(|l| l.name()).collect()
    }

    /// Run the listener chain.
    ///
    /// `Some` ends the request with that response; `None` lets it through.
    pub fn handle(&self, request: &mut Request) -> ShieldResult<Option<Response>> {
        if self.lazy && request.is_method_cacheable() {
            let mut deferred = Vec::new();
            let mut eager = false;
            for (index, listener) in self.listeners.iter().enumerate() {
                match listener.supports(request) {
                    Supports::Yes => {
                        eager = true;
                        break;
                    }
                    Supports::Maybe => deferred.push(index),
                    Supports::No => {}
                }
            }
            if !eager {
                tracing::debug!(firewall = %self.name, deferred = deferred.len(), "Deferred firewall listeners");
                request.attributes.insert(PendingListeners {
                    firewall: self.name.clone(),
                    indices: deferred,
                });
                return Ok(None);
            }
        }

        for index in 0..self.listeners.len() {
            if let Some(response) = self.run_listener(index, request)? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    /// Run the listeners a lazy `handle` deferred, once.
    ///
    /// A listener ending the request surfaces as `ShieldError::LazyResponse`.
    pub fn run_pending(&self, request: &mut Request) -> ShieldResult<()> {
        let pending = match request.attributes.remove::<PendingListeners>() {
            Some(pending) if pending.firewall == self.name => pending,
            Some(other) => {
                request.attributes.insert(other);
                return Ok(());
            }
            None => return Ok(()),
        };

        for index in pending.indices {
            if let Some(response) = self.run_listener(index, request)? {
                return Err(ShieldError::LazyResponse(Box::new(response)));
            }
        }
        Ok(())
    }

    pub fn has_pending(&self, request: &Request) -> bool {
        request
            .attributes
            .get::<PendingListeners>()
            .is_some_and(|p| p.firewall == self.name)
    }

    fn run_listener(&self, index: usize, request: &mut Request) -> ShieldResult<Option<Response>> {
        let listener = &self.listeners[index];
        if !listener.supports(request).is_candidate() {
            return Ok(None);
        }
        match listener.handle(request)? {
            ListenerOutcome::Continue => Ok(None),
            ListenerOutcome::Response(response) => {
                tracing::debug!(firewall = %self.name, listener = listener.name(), "Listener ended the request");
                Ok(Some(response))
            }
            ListenerOutcome::Deny(denial) => Ok(Some(self.deny(request, denial))),
        }
    }

    /// Turn a denial into the response ending the request.
    pub fn deny(&self, request: &mut Request, denial: Denial) -> Response {
        let Denial::Unauthenticated(error) = &denial else {
            return self.responder.respond(request, &denial);
        };

        if !self.stateless && request.method == Method::GET && !request.is_json() {
            let target = request.path_and_query();
            if let Some(session) = request.session_mut() {
                session.set(target_path_key(&self.name), target);
            }
        }

        let started = self
            .entry_point
            .as_ref()
            .and_then(|entry_point| entry_point.start(request, error.as_ref()));
        match started {
            Some(response) => response,
            None => self.responder.respond(request, &denial),
        }
    }
}

impl std::fmt::Debug for Firewall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Firewall")
            .field("name", &self.name)
            .field("listeners", &self.listener_names())
            .field("entry_point", &self.entry_point)
            .field("stateless", &self.stateless)
            .field("lazy", &self.lazy)
            .finish_non_exhaustive()
    }
}

/// Assembles a `Firewall`.
pub struct FirewallBuilder {
    name: String,
    matcher: RequestMatcher,
    authenticators: Vec<Arc<dyn Authenticator>>,
    listeners: Vec<Arc<dyn FirewallListener>>,
    dispatcher: EventDispatcher,
    entry_point: Option<String>,
    stateless: bool,
    lazy: bool,
    erase_credentials: bool,
    hide_user_not_found: bool,
    required_badges: Vec<BadgeKind>,
    context_provider: Option<Arc<dyn UserProvider>>,
    logout: Option<LogoutConfig>,
    responder: Arc<dyn Responder>,
    access: Option<(Arc<AccessMap>, Arc<dyn AccessDecider>)>,
}

impl FirewallBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            matcher: RequestMatcher::any(),
            authenticators: Vec::new(),
            listeners: Vec::new(),
            dispatcher: EventDispatcher::new(),
            entry_point: None,
            stateless: false,
            lazy: false,
            erase_credentials: true,
            hide_user_not_found: true,
            required_badges: Vec::new(),
            context_provider: None,
            logout: None,
            responder: Arc::new(DefaultResponder),
            access: None,
        }
    }

    pub fn matcher(mut self, matcher: RequestMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticators.push(authenticator);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn FirewallListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// The firewall's own dispatcher, for registering listeners before build.
    pub fn dispatcher_mut(&mut self) -> &mut EventDispatcher {
        &mut self.dispatcher
    }

    /// Authenticator key or entry point service id.
    pub fn entry_point(mut self, id: impl Into<String>) -> Self {
        self.entry_point = Some(id.into());
        self
    }

    pub fn stateless(mut self, stateless: bool) -> Self {
        self.stateless = stateless;
        self
    }

    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn erase_credentials(mut self, erase: bool) -> Self {
        self.erase_credentials = erase;
        self
    }

    pub fn hide_user_not_found(mut self, hide: bool) -> Self {
        self.hide_user_not_found = hide;
        self
    }

    pub fn required_badges(mut self, badges: Vec<BadgeKind>) -> Self {
        self.required_badges = badges;
        self
    }

    /// Keep the token in the session, refreshing users through `provider`.
    pub fn context(mut self, provider: Arc<dyn UserProvider>) -> Self {
        self.context_provider = Some(provider);
        self
    }

    pub fn logout(mut self, logout: LogoutConfig) -> Self {
        self.logout = Some(logout);
        self
    }

    pub fn responder(mut self, responder: Arc<dyn Responder>) -> Self {
        self.responder = responder;
        self
    }

    pub fn access_control(mut self, map: Arc<AccessMap>, decider: Arc<dyn AccessDecider>) -> Self {
        self.access = Some((map, decider));
        self
    }

    /// Build the firewall.
    ///
    /// Firewall listeners are registered first; bubbled listeners of
    /// `global` are added afterwards.
    pub fn build(
        self,
        global: &EventDispatcher,
        registry: &ServiceRegistry,
    ) -> Result<Firewall, ConfigurationError> {
        let FirewallBuilder {
            name,
            matcher,
            mut authenticators,
            mut listeners,
            mut dispatcher,
            entry_point,
            stateless,
            lazy,
            erase_credentials,
            hide_user_not_found,
            required_badges,
            context_provider,
            logout,
            responder,
            access,
        } = self;

        authenticators.sort_by_key(|a| std::cmp::Reverse(a.priority()));
        let entry_point =
            resolve_entry_point(&name, &authenticators, entry_point.as_deref(), registry)?;

        if let (false, Some(provider)) = (stateless, context_provider) {
            let context = Arc::new(ContextListener::new(name.clone(), provider));
            let on_login: Arc<dyn EventListener> = context.clone();
            dispatcher.add_listener(EventKind::LoginSuccess, on_login, 0);
            dispatcher.add_listener(EventKind::LoginSuccess, Arc::new(SessionStrategyListener), 0);
            listeners.push(context);
        }

        let inherited = dispatcher.inherit_from(global);
        let dispatcher = Arc::new(dispatcher);

        let manager = Arc::new(
            AuthenticatorManager::new(name.clone(), authenticators, dispatcher.clone())
                .with_erase_credentials(erase_credentials)
                .with_hide_user_not_found(hide_user_not_found)
                .with_required_badges(required_badges),
        );
        listeners.push(Arc::new(AuthenticatorManagerListener::new(manager.clone())));

        if let Some(logout) = logout {
            listeners.push(Arc::new(LogoutListener::new(
                name.clone(),
                logout.path,
                logout.target,
                dispatcher.clone(),
            )));
        }
        if let Some((map, decider)) = access {
            listeners.push(Arc::new(AccessListener::new(map, decider)));
        }
        listeners.sort_by_key(|l| std::cmp::Reverse(l.priority()));

        tracing::debug!(
            firewall = %name,
            authenticators = manager.authenticators().len(),
            listeners = listeners.len(),
            inherited,
            entry_point = ?entry_point,
            "Built firewall"
        );

        Ok(Firewall {
            name,
            matcher,
            listeners,
            manager,
            entry_point,
            responder,
            stateless,
            lazy,
        })
    }
}

/// Firewalls in matching order.
#[derive(Default)]
pub struct FirewallMap {
    firewalls: Vec<Firewall>,
}

impl FirewallMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, firewall: Firewall) -> Result<(), ConfigurationError> {
        if self.by_name(firewall.name()).is_some() {
            return Err(ConfigurationError::DuplicateFirewall(firewall.name().to_string()));
        }
        self.firewalls.push(firewall);
        Ok(())
    }

    /// First firewall matching `request`.
    pub fn get(&self, request: &Request) -> Option<&Firewall> {
        self.firewalls.iter().find(|f| f.matches(request))
    }

    pub fn by_name(&self, name: &str) -> Option<&Firewall> {
        self.firewalls.iter().find(|f| f.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Firewall> {
        self.firewalls.iter()
    }

    pub fn len(&self) -> usize {
        self.firewalls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.firewalls.is_empty()
    }
}
