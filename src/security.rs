//! The security facade built from configuration.
//!
//! `Security` owns the firewall map, the access decision manager and the
//! process-wide event dispatcher. It is built once at startup and shared
//! read-only between requests.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::access::{AccessDecider, AccessDecisionManager, RoleHierarchy};
use crate::auth::{
    extractor_from_names, AccessTokenAuthenticator, AccessTokenHandler, AnonymousAuthenticator,
    ApiKeyTokenHandler, Argon2PasswordHasher, Authenticator, CsrfTokenManager,
    FormLoginAuthenticator, HttpBasicAuthenticator, InMemoryRememberMeTokenProvider,
    JsonLoginAuthenticator, JwtTokenHandler, LoginLinkAuthenticator, LoginLinkHandler,
    PasswordHasher, PersistentRememberMeService, PreAuthenticatedAuthenticator,
    RememberMeAuthenticator, RememberMeService, RememberMeTokenProvider, RemoteUserExtractor,
    SessionCsrfTokenManager, SignatureRememberMeService, X509Extractor,
};
use crate::config::{AccessTokenConfig, FirewallConfig, SecurityConfig};
use crate::domain::{EnabledUserChecker, InMemoryUserProvider, Token, User, UserChecker, UserProvider};
use crate::engine::{AccessMap, Firewall, FirewallMap, RequestMatcher, SwitchUserListener};
use crate::error::{ConfigurationError, ShieldError, ShieldResult};
use crate::event::{
    register_badge_checkers, CheckRememberMeConditionsListener, EventDispatcher, EventKind,
    RememberMeListener, REMEMBER_ME_CONDITIONS_PRIORITY,
};
use crate::passport::{Badge, BadgeKind};
use crate::request::{Request, Response};
use crate::services::ServiceRegistry;

/// Id of the provider built from the `users` section.
pub const IN_MEMORY_PROVIDER: &str = "in_memory";

const REMEMBER_ME_LISTENER_PRIORITY: i32 = -64;

/// Shared collaborators used while building firewalls.
struct BuildContext<'a> {
    config: &'a SecurityConfig,
    registry: &'a ServiceRegistry,
    /// Absent when no users are configured.
    in_memory: Option<Arc<dyn UserProvider>>,
    hasher: Arc<dyn PasswordHasher>,
    global: &'a EventDispatcher,
    decider: Arc<dyn AccessDecider>,
    access: Option<(Arc<AccessMap>, Arc<dyn AccessDecider>)>,
}

impl BuildContext<'_> {
    fn provider(&self, id: Option<&str>) -> Result<Option<Arc<dyn UserProvider>>, ConfigurationError> {
        match id {
            None | Some(IN_MEMORY_PROVIDER) => Ok(self.in_memory.clone()),
            Some(id) => self
                .registry
                .user_provider(id)
                .map(Some)
                .map_err(|e| match e {
                    ConfigurationError::UnknownService(id) => ConfigurationError::UnknownUserProvider(id),
                    other => other,
                }),
        }
    }

    fn token_handler(
        &self,
        firewall: &str,
        options: &AccessTokenConfig,
    ) -> Result<Arc<dyn AccessTokenHandler>, ConfigurationError> {
        match options.token_handler.as_str() {
            "jwt" => {
                let jwt = self.config.jwt.as_ref().ok_or_else(|| ConfigurationError::InvalidOption {
                    firewall: firewall.to_string(),
                    reason: "the jwt token handler needs a jwt section".to_string(),
                })?;
                Ok(Arc::new(
                    JwtTokenHandler::new(&jwt.secret, jwt.issuer.clone())
                        .with_identifier_claim(jwt.identifier_claim.clone()),
                ))
            }
            "api_key" => Ok(Arc::new(ApiKeyTokenHandler::new(self.config.api_keys.clone()))),
            id => self.registry.token_handler(id),
        }
    }
}

/// Entry point of the security layer.
pub struct Security {
    firewalls: FirewallMap,
    decider: Arc<dyn AccessDecider>,
    global: Arc<EventDispatcher>,
    login_links: HashMap<String, Arc<LoginLinkHandler>>,
}

impl Security {
    /// Build every firewall described by `config`.
    ///
    /// Ids in the configuration refer to services of `registry`. Any problem
    /// is reported here, never while handling requests.
    pub fn from_config(
        config: &SecurityConfig,
        registry: &ServiceRegistry,
    ) -> Result<Self, ConfigurationError> {
        let in_memory = (!config.users.is_empty()).then(|| {
            Arc::new(InMemoryUserProvider::new(config.users.clone())) as Arc<dyn UserProvider>
        });

        let mut global = EventDispatcher::new();
        for (kind, listener, priority) in registry.listeners() {
            global.add_listener(kind, listener, priority);
        }

        // keys arrive lowercased from the config crate
        let hierarchy = RoleHierarchy::new(
            config
                .role_hierarchy
                .iter()
                .map(|(role, implied)| (role.to_ascii_uppercase(), implied.clone()))
                .collect(),
        );
        let decider = AccessDecisionManager::from_config(
            &config.access_decision_manager,
            hierarchy,
            registry.voters(),
            registry,
        )?;

        let access_map = AccessMap::from_rules(&config.access_control)?;
        let access = (!access_map.is_empty()).then(|| (Arc::new(access_map), decider.clone()));

        let context = BuildContext {
            config,
            registry,
            in_memory,
            hasher: Arc::new(Argon2PasswordHasher::default()),
            global: &global,
            decider: decider.clone(),
            access,
        };

        let mut firewalls = FirewallMap::new();
        let mut login_links = HashMap::new();
        for firewall_config in &config.firewalls {
            let (firewall, login_link) = build_firewall(firewall_config, &context)?;
            if let Some(handler) = login_link {
                login_links.insert(firewall.name().to_string(), handler);
            }
            firewalls.add(firewall)?;
        }

        tracing::info!(
            firewalls = firewalls.len(),
            access_rules = config.access_control.len(),
            "Security initialized"
        );

        Ok(Self {
            firewalls,
            decider,
            global: Arc::new(global),
            login_links,
        })
    }

    pub fn firewalls(&self) -> &FirewallMap {
        &self.firewalls
    }

    pub fn access_decider(&self) -> &Arc<dyn AccessDecider> {
        &self.decider
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.global
    }

    /// Handler creating login links for users of `firewall`.
    pub fn login_link_handler(&self, firewall: &str) -> Option<&Arc<LoginLinkHandler>> {
        self.login_links.get(firewall)
    }

    /// Run the firewall matching `request`.
    ///
    /// `Some` ends the request with that response. Requests matching no
    /// firewall pass through untouched.
    pub fn handle(&self, request: &mut Request) -> ShieldResult<Option<Response>> {
        match self.firewalls.get(request) {
            Some(firewall) => firewall.handle(request),
            None => Ok(None),
        }
    }

    /// The token of `request`, running deferred listeners first.
    pub fn token<'r>(&self, request: &'r mut Request) -> ShieldResult<Option<&'r Token>> {
        if let Some(firewall) = self.firewalls.get(request) {
            firewall.run_pending(request)?;
        }
        Ok(request.token())
    }

    /// Whether the current user is granted `attributes` on `subject`.
    pub fn is_granted(
        &self,
        request: &mut Request,
        attributes: &[&str],
        subject: Option<&dyn Any>,
    ) -> ShieldResult<bool> {
        Ok(match self.token(request)? {
            Some(token) => self.decider.decide(token, attributes, subject),
            None => false,
        })
    }

    /// Log `user` in on the firewall of `request` without credentials.
    ///
    /// Uses the authenticator with `authenticator_key`, or the first one of
    /// the firewall.
    pub fn login(
        &self,
        request: &mut Request,
        user: User,
        authenticator_key: Option<&str>,
        badges: Vec<Badge>,
    ) -> ShieldResult<Option<Response>> {
        let firewall = self
            .firewalls
            .get(request)
            .ok_or_else(|| ShieldError::Internal("No firewall matches the request".to_string()))?;

        let authenticator = match authenticator_key {
            Some(key) => firewall.authenticator(key),
            None => firewall.manager().authenticators().first(),
        }
        .cloned()
        .ok_or_else(|| {
            ShieldError::Internal(format!(
                "Firewall \"{}\" has no authenticator \"{}\"",
                firewall.name(),
                authenticator_key.unwrap_or_default()
            ))
        })?;

        firewall
            .manager()
            .authenticate_user(user, authenticator.as_ref(), request, badges)
    }
}

fn build_firewall(
    options: &FirewallConfig,
    context: &BuildContext<'_>,
) -> Result<(Firewall, Option<Arc<LoginLinkHandler>>), ConfigurationError> {
    let name = options.name.as_str();
    let registry = context.registry;
    let provider = context.provider(options.provider.as_deref())?;
    let require_provider = |authenticator: &str| {
        provider
            .clone()
            .ok_or_else(|| ConfigurationError::MissingUserProvider {
                firewall: name.to_string(),
                authenticator: authenticator.to_string(),
            })
    };
    // listeners still need a provider when only token handlers load users
    let listener_provider: Arc<dyn UserProvider> = provider
        .clone()
        .unwrap_or_else(|| Arc::new(InMemoryUserProvider::from_users(Vec::new())));

    let checker: Arc<dyn UserChecker> = match &options.user_checker {
        Some(id) => registry.user_checker(id)?,
        None => Arc::new(EnabledUserChecker),
    };
    let csrf: Arc<dyn CsrfTokenManager> = match &options.csrf_token_manager {
        Some(id) => registry.csrf_manager(id)?,
        None => Arc::new(SessionCsrfTokenManager),
    };
    let required_badges = options
        .required_badges
        .iter()
        .map(|kind| {
            kind.parse::<BadgeKind>()
                .map_err(|_| ConfigurationError::UnknownBadge(kind.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut builder = Firewall::builder(name)
        .matcher(RequestMatcher::new(options.pattern.as_deref(), &options.methods)?)
        .stateless(options.stateless)
        .lazy(options.lazy)
        .erase_credentials(options.erase_credentials)
        .hide_user_not_found(options.hide_user_not_found)
        .required_badges(required_badges)
        .context(listener_provider.clone());
    if let Some(entry_point) = &options.entry_point {
        builder = builder.entry_point(entry_point.clone());
    }
    if let Some(logout) = &options.logout {
        builder = builder.logout(logout.clone());
    }
    if let Some((map, decider)) = &context.access {
        builder = builder.access_control(map.clone(), decider.clone());
    }

    if let Some(switch_user) = &options.switch_user {
        let listener = SwitchUserListener::new(
            name,
            switch_user,
            require_provider("switch_user")?,
            checker.clone(),
            context.decider.clone(),
        )
        .stateless(options.stateless);
        builder = builder.listener(Arc::new(listener));
    }

    register_badge_checkers(
        builder.dispatcher_mut(),
        listener_provider,
        context.hasher.clone(),
        checker,
        csrf,
    );

    let mut authenticators: Vec<Arc<dyn Authenticator>> = Vec::new();
    if let Some(basic) = &options.http_basic {
        require_provider("http_basic")?;
        authenticators.push(Arc::new(HttpBasicAuthenticator::new(basic.realm.clone())));
    }
    if let Some(form) = &options.form_login {
        require_provider("form_login")?;
        authenticators.push(Arc::new(FormLoginAuthenticator::new(form.clone())));
    }
    if let Some(json) = &options.json_login {
        require_provider("json_login")?;
        authenticators.push(Arc::new(JsonLoginAuthenticator::new(json.clone())));
    }
    if let Some(access_token) = &options.access_token {
        let extractor = extractor_from_names(&access_token.extractors).map_err(|reason| {
            ConfigurationError::InvalidOption {
                firewall: name.to_string(),
                reason,
            }
        })?;
        let handler = context.token_handler(name, access_token)?;
        let token_provider = access_token
            .user_provider
            .as_deref()
            .map(|id| context.provider(Some(id)))
            .transpose()?
            .flatten();
        authenticators.push(Arc::new(AccessTokenAuthenticator::new(
            extractor,
            handler,
            token_provider,
            access_token.realm.clone(),
        )));
    }
    if let Some(x509) = &options.x509 {
        authenticators.push(Arc::new(PreAuthenticatedAuthenticator::new(
            X509Extractor::new(x509.clone()),
            name,
            Some(require_provider("x509")?),
        )));
    }
    if let Some(remote_user) = &options.remote_user {
        authenticators.push(Arc::new(PreAuthenticatedAuthenticator::new(
            RemoteUserExtractor::new(remote_user.clone()),
            name,
            Some(require_provider("remote_user")?),
        )));
    }
    if let Some(remember_me) = &options.remember_me {
        let users = require_provider("remember_me")?;
        let service: Arc<dyn RememberMeService> = match remember_me.token_provider.as_deref() {
            None => Arc::new(SignatureRememberMeService::new(remember_me, users)?),
            Some(id) => {
                let tokens: Arc<dyn RememberMeTokenProvider> = if id == "in_memory" {
                    Arc::new(InMemoryRememberMeTokenProvider::new())
                } else {
                    registry.remember_me_token_provider(id)?
                };
                Arc::new(PersistentRememberMeService::new(remember_me, users, tokens))
            }
        };
        let dispatcher = builder.dispatcher_mut();
        dispatcher.add_listener(
            EventKind::CheckPassport,
            Arc::new(CheckRememberMeConditionsListener::new(
                remember_me.remember_me_parameter.clone(),
                remember_me.always_remember_me,
            )),
            REMEMBER_ME_CONDITIONS_PRIORITY,
        );
        let listener = Arc::new(RememberMeListener::new(service.clone()));
        for kind in [EventKind::LoginSuccess, EventKind::LoginFailure, EventKind::Logout] {
            dispatcher.add_listener(kind, listener.clone(), REMEMBER_ME_LISTENER_PRIORITY);
        }
        authenticators.push(Arc::new(RememberMeAuthenticator::new(service, name)));
    }
    let mut login_link = None;
    if let Some(link) = &options.login_link {
        let handler = Arc::new(LoginLinkHandler::new(link, require_provider("login_link")?)?);
        authenticators.push(Arc::new(LoginLinkAuthenticator::new(link, handler.clone())));
        login_link = Some(handler);
    }
    if options.anonymous {
        authenticators.push(Arc::new(AnonymousAuthenticator));
    }
    for id in &options.custom_authenticators {
        authenticators.push(registry.authenticator(id)?);
    }

    if authenticators.is_empty() {
        return Err(ConfigurationError::NoAuthenticator(name.to_string()));
    }
    for authenticator in authenticators {
        builder = builder.authenticator(authenticator);
    }

    let firewall = builder.build(context.global, registry)?;
    Ok((firewall, login_link))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{CallbackVoter, Vote};
    use crate::domain::TokenKind;
    use crate::event::SecurityEvent;
    use crate::request::Session;
    use crate::services::Service;
    use axum::http::StatusCode;
    use base64::Engine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(firewalls: &str) -> SecurityConfig {
        let hash = Argon2PasswordHasher::fast().hash("secret").unwrap();
        let yaml = format!(
            r#"
users:
  - identifier: alice
    password_hash: "{hash}"
    roles: [ROLE_USER]
  - identifier: root
    password_hash: "{hash}"
    roles: [ROLE_ADMIN]
role_hierarchy:
  ROLE_ADMIN: [ROLE_USER]
access_control:
  - path: "^/admin"
    roles: [ROLE_ADMIN]
  - path: "^/account"
    roles: [ROLE_USER]
firewalls:
{firewalls}
"#
        );
        SecurityConfig::from_yaml(&yaml).unwrap()
    }

    fn basic(user: &str, password: &str) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, password));
        format!("Basic {}", encoded)
    }

    const BASIC_FIREWALL: &str = r#"
  - name: main
    http_basic: { realm: Secured }
    anonymous: true
"#;

    #[test]
    fn test_basic_firewall_end_to_end() {
        let security = Security::from_config(&config(BASIC_FIREWALL), &ServiceRegistry::new()).unwrap();

        let mut request = Request::get("/account").with_header("authorization", &basic("alice", "secret"));
        assert!(security.handle(&mut request).unwrap().is_none());
        assert!(security.is_granted(&mut request, &["ROLE_USER"], None).unwrap());
        assert!(!security.is_granted(&mut request, &["ROLE_ADMIN"], None).unwrap());

        let mut request = Request::get("/account");
        let response = security.handle(&mut request).unwrap().unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);

        let mut request = Request::get("/admin").with_header("authorization", &basic("alice", "secret"));
        let response = security.handle(&mut request).unwrap().unwrap();
        assert_eq!(response.status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_role_hierarchy_from_config() {
        let security = Security::from_config(&config(BASIC_FIREWALL), &ServiceRegistry::new()).unwrap();

        let mut request = Request::get("/account").with_header("authorization", &basic("root", "secret"));
        assert!(security.handle(&mut request).unwrap().is_none());
        assert!(security.is_granted(&mut request, &["ROLE_USER"], None).unwrap());
    }

    #[test]
    fn test_lazy_firewall_authenticates_on_demand() {
        let config = config(
            r#"
  - name: main
    lazy: true
    anonymous: true
"#,
        );
        let security = Security::from_config(&config, &ServiceRegistry::new()).unwrap();
        let mut request = Request::get("/home");

        assert!(security.handle(&mut request).unwrap().is_none());
        assert!(request.token().is_none());

        let token = security.token(&mut request).unwrap().unwrap();
        assert_eq!(token.kind(), TokenKind::Anonymous);
    }

    #[test]
    fn test_form_login_keeps_user_in_session() {
        let config = config(
            r#"
  - name: main
    form_login:
      login_path: /login
      check_path: /login_check
    logout:
      path: /logout
      target: /
"#,
        );
        let security = Security::from_config(&config, &ServiceRegistry::new()).unwrap();

        let mut login = Request::post("/login_check")
            .with_form(&[("_username", "alice"), ("_password", "secret")])
            .with_session(Session::new());
        let response = security.handle(&mut login).unwrap().unwrap();
        assert!(response.is_redirect());

        let session = login.session.unwrap();
        let mut next = Request::get("/account").with_session(session);
        assert!(security.handle(&mut next).unwrap().is_none());
        assert_eq!(next.token().unwrap().user_identifier(), "alice");

        let mut logout = Request::get("/logout").with_session(next.session.unwrap());
        let response = security.handle(&mut logout).unwrap().unwrap();
        assert_eq!(response.header("location"), Some("/"));
        assert!(!logout.session.unwrap().contains("_security_main"));
    }

    #[test]
    fn test_unauthenticated_form_user_is_redirected_to_login() {
        let config = config(
            r#"
  - name: main
    form_login:
      login_path: /login
      check_path: /login_check
"#,
        );
        let security = Security::from_config(&config, &ServiceRegistry::new()).unwrap();

        let mut request = Request::get("/account").with_session(Session::new());
        let response = security.handle(&mut request).unwrap().unwrap();
        assert_eq!(response.header("location"), Some("/login"));
    }

    #[test]
    fn test_registry_services_are_used() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let registry = ServiceRegistry::new()
            .with(
                "weekday",
                Service::Voter {
                    voter: Arc::new(CallbackVoter::new("weekday", |_, _, attributes| {
                        if attributes.contains(&"WEEKDAY") {
                            Vote::Grant
                        } else {
                            Vote::Abstain
                        }
                    })),
                    priority: 0,
                },
            )
            .with(
                "audit",
                Service::Listener {
                    kind: EventKind::LoginSuccess,
                    listener: Arc::new(move |_: &mut SecurityEvent<'_>| -> ShieldResult<()> {
                        seen.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }),
                    priority: 0,
                },
            );
        let security = Security::from_config(&config(BASIC_FIREWALL), &registry).unwrap();

        let mut request = Request::get("/home");
        assert!(!security.is_granted(&mut request, &["WEEKDAY"], None).unwrap());
        security.handle(&mut request).unwrap();
        assert!(security.is_granted(&mut request, &["WEEKDAY"], None).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_programmatic_login() {
        let security = Security::from_config(&config(BASIC_FIREWALL), &ServiceRegistry::new()).unwrap();
        let mut request = Request::get("/");

        security
            .login(&mut request, User::new("carol", vec!["ROLE_USER".to_string()]), Some("http_basic"), Vec::new())
            .unwrap();
        assert_eq!(request.token().unwrap().user_identifier(), "carol");

        let err = security
            .login(&mut request, User::new("carol", vec![]), Some("form_login"), Vec::new())
            .unwrap_err();
        assert!(matches!(err, ShieldError::Internal(_)));
    }

    #[test]
    fn test_configuration_errors() {
        let build = |firewalls: &str| Security::from_config(&config(firewalls), &ServiceRegistry::new());

        assert!(matches!(
            build("  - name: main\n"),
            Err(ConfigurationError::NoAuthenticator(_))
        ));
        assert!(matches!(
            build("  - name: main\n    anonymous: true\n    provider: ldap\n"),
            Err(ConfigurationError::UnknownUserProvider(_))
        ));
        assert!(matches!(
            build("  - name: main\n    anonymous: true\n    required_badges: [bogus]\n"),
            Err(ConfigurationError::UnknownBadge(_))
        ));
        assert!(matches!(
            build("  - name: main\n    http_basic: { realm: Secured }\n    form_login: { login_path: /login }\n"),
            Err(ConfigurationError::AmbiguousEntryPoint { .. })
        ));
        assert!(matches!(
            build("  - name: main\n    access_token:\n      token_handler: jwt\n"),
            Err(ConfigurationError::InvalidOption { .. })
        ));
        assert!(matches!(
            build("  - name: main\n    anonymous: true\n  - name: main\n    anonymous: true\n"),
            Err(ConfigurationError::DuplicateFirewall(_))
        ));
    }

    #[test]
    fn test_password_login_needs_a_provider() {
        let config =
            SecurityConfig::from_yaml("firewalls:\n  - name: main\n    http_basic: { realm: Secured }\n")
                .unwrap();
        assert!(matches!(
            Security::from_config(&config, &ServiceRegistry::new()),
            Err(ConfigurationError::MissingUserProvider { ref authenticator, .. }) if authenticator == "http_basic"
        ));

        let config = SecurityConfig::from_yaml("firewalls:\n  - name: main\n    anonymous: true\n").unwrap();
        assert!(Security::from_config(&config, &ServiceRegistry::new()).is_ok());
    }

    #[test]
    fn test_login_link_handler_is_exposed() {
        let config = config(
            r#"
  - name: main
    login_link:
      secret: s3cret
"#,
        );
        let security = Security::from_config(&config, &ServiceRegistry::new()).unwrap();
        assert!(security.login_link_handler("main").is_some());
        assert!(security.login_link_handler("other").is_none());
    }

    fn form_login(security: &Security, user: &str) -> Request {
        let mut login = Request::post("/login_check")
            .with_form(&[("_username", user), ("_password", "secret")])
            .with_session(Session::new());
        let response = security.handle(&mut login).unwrap().unwrap();
        assert!(response.is_redirect());
        login
    }

    #[test]
    fn test_switch_user_round_trip() {
        let config = config(
            r#"
  - name: main
    form_login:
      login_path: /login
      check_path: /login_check
    switch_user:
      role: ROLE_ADMIN
"#,
        );
        let security = Security::from_config(&config, &ServiceRegistry::new()).unwrap();
        let login = form_login(&security, "root");

        let mut switch = Request::get("/account?_switch_user=alice").with_session(login.session.unwrap());
        let response = security.handle(&mut switch).unwrap().unwrap();
        assert_eq!(response.header("location"), Some("/account"));

        let mut next = Request::get("/account").with_session(switch.session.unwrap());
        assert!(security.handle(&mut next).unwrap().is_none());
        assert_eq!(next.token().unwrap().user_identifier(), "alice");
        assert!(security.is_granted(&mut next, &[crate::access::IS_IMPERSONATOR], None).unwrap());
        assert!(!security.is_granted(&mut next, &["ROLE_ADMIN"], None).unwrap());

        let mut exit = Request::get("/account?_switch_user=_exit").with_session(next.session.unwrap());
        security.handle(&mut exit).unwrap();
        let mut back = Request::get("/admin").with_session(exit.session.unwrap());
        assert!(security.handle(&mut back).unwrap().is_none());
        assert_eq!(back.token().unwrap().user_identifier(), "root");

        // alice cannot impersonate
        let login = form_login(&security, "alice");
        let mut switch = Request::get("/account?_switch_user=root").with_session(login.session.unwrap());
        let response = security.handle(&mut switch).unwrap().unwrap();
        assert_eq!(response.status, StatusCode::FORBIDDEN);
    }

    fn remember_me_cookie(request: &Request) -> Option<String> {
        request
            .response_cookies
            .iter()
            .filter_map(|c| c.split(';').next())
            .filter_map(|pair| pair.strip_prefix("REMEMBERME="))
            .find(|value| !value.is_empty())
            .map(str::to_string)
    }

    #[test]
    fn test_persistent_remember_me_detects_replay() {
        let config = config(
            r#"
  - name: main
    form_login:
      login_path: /login
      check_path: /login_check
    remember_me:
      secret: s3cret
      always_remember_me: true
      token_provider: in_memory
"#,
        );
        let security = Security::from_config(&config, &ServiceRegistry::new()).unwrap();
        let login = form_login(&security, "alice");
        let issued = remember_me_cookie(&login).unwrap();

        let mut first = Request::get("/account")
            .with_header("cookie", &format!("REMEMBERME={}", issued))
            .with_session(Session::new());
        assert!(security.handle(&mut first).unwrap().is_none());
        assert_eq!(first.token().unwrap().kind(), TokenKind::RememberMe);
        let rotated = remember_me_cookie(&first).unwrap();
        assert_ne!(rotated, issued);

        let mut replay = Request::get("/account")
            .with_header("cookie", &format!("REMEMBERME={}", issued))
            .with_session(Session::new());
        let response = security.handle(&mut replay).unwrap().unwrap();
        assert_eq!(response.header("location"), Some("/login"));
        assert!(replay.response_cookies.iter().any(|c| c.starts_with("REMEMBERME=;")));

        // the whole series is revoked
        let mut rotated_use = Request::get("/account")
            .with_header("cookie", &format!("REMEMBERME={}", rotated))
            .with_session(Session::new());
        assert!(security.handle(&mut rotated_use).unwrap().is_some());
    }

    #[test]
    fn test_unknown_remember_me_token_provider() {
        let config = config(
            r#"
  - name: main
    anonymous: true
    remember_me:
      secret: s3cret
      token_provider: redis
"#,
        );
        assert!(matches!(
            Security::from_config(&config, &ServiceRegistry::new()),
            Err(ConfigurationError::UnknownService(_))
        ));
    }

    #[test]
    fn test_empty_signing_secret_rejected() {
        let config = config(
            r#"
  - name: main
    login_link:
      secret: ""
"#,
        );
        assert!(matches!(
            Security::from_config(&config, &ServiceRegistry::new()),
            Err(ConfigurationError::InvalidSecret(_))
        ));
    }
}
