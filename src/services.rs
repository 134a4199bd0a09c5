//! Named collaborators referenced from the security configuration.
//!
//! Configuration refers to custom voters, strategies, entry points and so
//! on by id. The application registers them here before building
//! `Security`; a reference to a missing id, or to a service of the wrong
//! kind, is a configuration error.

use std::sync::Arc;

use crate::access::{AccessDecider, AccessDecisionStrategy, StrategyResolver, Voter};
use crate::auth::{
    AccessTokenHandler, AuthenticationEntryPoint, Authenticator, CsrfTokenManager,
    RememberMeTokenProvider,
};
use crate::domain::{UserChecker, UserProvider};
use crate::error::ConfigurationError;
use crate::event::{EventKind, EventListener};

/// A registered collaborator.
#[derive(Clone)]
pub enum Service {
    /// Added to every access decision manager built from configuration.
    Voter { voter: Arc<dyn Voter>, priority: i32 },
    Strategy(Arc<dyn AccessDecisionStrategy>),
    StrategyResolver(Arc<dyn StrategyResolver>),
    /// Replaces the built-in access decision manager.
    DecisionManager(Arc<dyn AccessDecider>),
    EntryPoint(Arc<dyn AuthenticationEntryPoint>),
    UserProvider(Arc<dyn UserProvider>),
    TokenHandler(Arc<dyn AccessTokenHandler>),
    CsrfManager(Arc<dyn CsrfTokenManager>),
    UserChecker(Arc<dyn UserChecker>),
    Authenticator(Arc<dyn Authenticator>),
    RememberMeTokenProvider(Arc<dyn RememberMeTokenProvider>),
    /// Registered on the process-wide event dispatcher.
    Listener {
        kind: EventKind,
        listener: Arc<dyn EventListener>,
        priority: i32,
    },
}

impl Service {
    fn kind_name(&self) -> &'static str {
        match self {
            Service::Voter { .. } => "Voter",
            Service::Strategy(_) => "AccessDecisionStrategy",
            Service::StrategyResolver(_) => "StrategyResolver",
            Service::DecisionManager(_) => "AccessDecider",
            Service::EntryPoint(_) => "AuthenticationEntryPoint",
            Service::UserProvider(_) => "UserProvider",
            Service::TokenHandler(_) => "AccessTokenHandler",
            Service::CsrfManager(_) => "CsrfTokenManager",
            Service::UserChecker(_) => "UserChecker",
            Service::Authenticator(_) => "Authenticator",
            Service::RememberMeTokenProvider(_) => "RememberMeTokenProvider",
            Service::Listener { .. } => "EventListener",
        }
    }
}

/// Services by id, in registration order.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: Vec<(String, Service)>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `service` under `id`, replacing any previous one.
    pub fn register(&mut self, id: impl Into<String>, service: Service) -> &mut Self {
        let id = id.into();
        self.services.retain(|(existing, _)| *existing != id);
        tracing::debug!(service = %id, kind = service.kind_name(), "Registered security service");
        self.services.push((id, service));
        self
    }

    pub fn with(mut self, id: impl Into<String>, service: Service) -> Self {
        self.register(id, service);
        self
    }

    pub fn get(&self, id: &str) -> Option<&Service> {
        self.services
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, service)| service)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    fn lookup<T>(
        &self,
        id: &str,
        expected: &'static str,
        pick: impl Fn(&Service) -> Option<T>,
    ) -> Result<T, ConfigurationError> {
        let service = self
            .get(id)
            .ok_or_else(|| ConfigurationError::UnknownService(id.to_string()))?;
        pick(service).ok_or_else(|| ConfigurationError::IncompatibleService {
            id: id.to_string(),
            expected,
        })
    }

    pub fn strategy(&self, id: &str) -> Result<Arc<dyn AccessDecisionStrategy>, ConfigurationError> {
        self.lookup(id, "AccessDecisionStrategy", |s| match s {
            Service::Strategy(strategy) => Some(strategy.clone()),
            _ => None,
        })
    }

    pub fn strategy_resolver(&self, id: &str) -> Result<Arc<dyn StrategyResolver>, ConfigurationError> {
        self.lookup(id, "StrategyResolver", |s| match s {
            Service::StrategyResolver(resolver) => Some(resolver.clone()),
            _ => None,
        })
    }

    pub fn decision_manager(&self, id: &str) -> Result<Arc<dyn AccessDecider>, ConfigurationError> {
        self.lookup(id, "AccessDecider", |s| match s {
            Service::DecisionManager(manager) => Some(manager.clone()),
            _ => None,
        })
    }

    pub fn entry_point(&self, id: &str) -> Result<Arc<dyn AuthenticationEntryPoint>, ConfigurationError> {
        self.lookup(id, "AuthenticationEntryPoint", |s| match s {
            Service::EntryPoint(entry_point) => Some(entry_point.clone()),
            _ => None,
        })
    }

    pub fn user_provider(&self, id: &str) -> Result<Arc<dyn UserProvider>, ConfigurationError> {
        self.lookup(id, "UserProvider", |s| match s {
            Service::UserProvider(provider) => Some(provider.clone()),
            _ => None,
        })
    }

    pub fn token_handler(&self, id: &str) -> Result<Arc<dyn AccessTokenHandler>, ConfigurationError> {
        self.lookup(id, "AccessTokenHandler", |s| match s {
            Service::TokenHandler(handler) => Some(handler.clone()),
            _ => None,
        })
    }

    pub fn csrf_manager(&self, id: &str) -> Result<Arc<dyn CsrfTokenManager>, ConfigurationError> {
        self.lookup(id, "CsrfTokenManager", |s| match s {
            Service::CsrfManager(manager) => Some(manager.clone()),
            _ => None,
        })
    }

    pub fn user_checker(&self, id: &str) -> Result<Arc<dyn UserChecker>, ConfigurationError> {
        self.lookup(id, "UserChecker", |s| match s {
            Service::UserChecker(checker) => Some(checker.clone()),
            _ => None,
        })
    }

    pub fn remember_me_token_provider(
        &self,
        id: &str,
    ) -> Result<Arc<dyn RememberMeTokenProvider>, ConfigurationError> {
        self.lookup(id, "RememberMeTokenProvider", |s| match s {
            Service::RememberMeTokenProvider(tokens) => Some(tokens.clone()),
            _ => None,
        })
    }

    pub fn authenticator(&self, id: &str) -> Result<Arc<dyn Authenticator>, ConfigurationError> {
        self.lookup(id, "Authenticator", |s| match s {
            Service::Authenticator(authenticator) => Some(authenticator.clone()),
            _ => None,
        })
    }

    /// Every registered voter with its priority, in registration order.
    pub fn voters(&self) -> Vec<(Arc<dyn Voter>, i32)> {
        self.services
            .iter()
            .filter_map(|(_, service)| match service {
                Service::Voter { voter, priority } => Some((voter.clone(), *priority)),
                _ => None,
            })
            .collect()
    }

    /// Every registered event listener, in registration order.
    pub fn listeners(&self) -> Vec<(EventKind, Arc<dyn EventListener>, i32)> {
        self.services
            .iter()
            .filter_map(|(_, service)| match service {
                Service::Listener {
                    kind,
                    listener,
                    priority,
                } => Some((*kind, listener.clone(), *priority)),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{RoleVoter, UnanimousStrategy};
    use crate::domain::EnabledUserChecker;

    #[test]
    fn test_typed_lookup() {
        let registry = ServiceRegistry::new()
            .with("strict", Service::Strategy(Arc::new(UnanimousStrategy::default())))
            .with("checker", Service::UserChecker(Arc::new(EnabledUserChecker)));

        assert!(registry.strategy("strict").is_ok());
        assert!(registry.user_checker("checker").is_ok());
    }

    #[test]
    fn test_unknown_and_incompatible_services() {
        let registry =
            ServiceRegistry::new().with("checker", Service::UserChecker(Arc::new(EnabledUserChecker)));

        assert!(matches!(
            registry.strategy("missing"),
            Err(ConfigurationError::UnknownService(id)) if id == "missing"
        ));
        let err = registry.strategy_resolver("checker").err().unwrap();
        assert!(matches!(
            err,
            ConfigurationError::IncompatibleService { ref id, expected: "StrategyResolver" } if id == "checker"
        ));
        assert!(err.to_string().contains("checker"));
    }

    #[test]
    fn test_voters_keep_registration_order() {
        let registry = ServiceRegistry::new()
            .with("a", Service::Voter { voter: Arc::new(RoleVoter::new()), priority: 1 })
            .with("b", Service::Voter { voter: Arc::new(RoleVoter::new()), priority: 9 });

        let priorities: Vec<i32> = registry.voters().into_iter().map(|(_, p)| p).collect();
        assert_eq!(priorities, vec![1, 9]);
    }

    #[test]
    fn test_registering_same_id_replaces() {
        let mut registry = ServiceRegistry::new();
        registry.register("x", Service::Strategy(Arc::new(UnanimousStrategy::default())));
        registry.register("x", Service::UserChecker(Arc::new(EnabledUserChecker)));

        assert!(registry.user_checker("x").is_ok());
        assert!(registry.strategy("x").is_err());
    }
}
