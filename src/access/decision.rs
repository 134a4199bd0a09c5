//! The access decision manager.

use std::any::Any;
use std::sync::Arc;

use super::{
    strategy_from_name, AccessDecisionStrategy, AuthenticatedVoter, RoleHierarchy,
    RoleHierarchyVoter, RoleVoter, StrategyResolver, Voter,
};
use crate::config::AccessDecisionManagerConfig;
use crate::domain::Token;
use crate::error::ConfigurationError;
use crate::services::ServiceRegistry;

pub const AUTHENTICATED_VOTER_PRIORITY: i32 = 250;
pub const ROLE_VOTER_PRIORITY: i32 = 245;

/// Answers "may this token do `attributes` on `subject`".
///
/// Custom implementations can replace `AccessDecisionManager` entirely.
pub trait AccessDecider: Send + Sync {
    fn decide(&self, token: &Token, attributes: &[&str], subject: Option<&dyn Any>) -> bool;
}

/// Consults voters by descending priority under a strategy.
pub struct AccessDecisionManager {
    voters: Vec<(Arc<dyn Voter>, i32)>,
    strategy: Arc<dyn AccessDecisionStrategy>,
    resolvers: Vec<Arc<dyn StrategyResolver>>,
}

impl AccessDecisionManager {
    /// Voters sharing a priority keep their registration order.
    pub fn new(
        mut voters: Vec<(Arc<dyn Voter>, i32)>,
        strategy: Arc<dyn AccessDecisionStrategy>,
    ) -> Result<Self, ConfigurationError> {
        if voters.is_empty() {
            return Err(ConfigurationError::NoVoters);
        }
        voters.sort_by_key(|(_, priority)| std::cmp::Reverse(*priority));

        Ok(Self {
            voters,
            strategy,
            resolvers: Vec::new(),
        })
    }

    /// Resolvers are asked in order; the first answer overrides the strategy.
    pub fn with_resolvers(mut self, resolvers: Vec<Arc<dyn StrategyResolver>>) -> Self {
        self.resolvers = resolvers;
        self
    }

    /// Build the decider described by `config`.
    ///
    /// `service` replaces the built-in manager. Otherwise the built-in
    /// voters are combined with `extra_voters` under the configured
    /// strategy and resolvers.
    pub fn from_config(
        config: &AccessDecisionManagerConfig,
        hierarchy: RoleHierarchy,
        extra_voters: Vec<(Arc<dyn Voter>, i32)>,
        registry: &ServiceRegistry,
    ) -> Result<Arc<dyn AccessDecider>, ConfigurationError> {
        if let Some(id) = &config.service {
            return registry.decision_manager(id);
        }

        let strategy = match &config.strategy_service {
            Some(id) => registry.strategy(id)?,
            None => strategy_from_name(
                &config.strategy,
                config.allow_if_all_abstain,
                config.allow_if_equal_granted_denied,
            )?,
        };

        let resolvers = config
            .strategy_resolvers
            .iter()
            .map(|id| registry.strategy_resolver(id))
            .collect::<Result<Vec<_>, _>>()?;

        let role_voter: Arc<dyn Voter> = if hierarchy.is_empty() {
            Arc::new(RoleVoter::new())
        } else {
            Arc::new(RoleHierarchyVoter::new(hierarchy))
        };
        let mut voters: Vec<(Arc<dyn Voter>, i32)> = vec![
            (Arc::new(AuthenticatedVoter), AUTHENTICATED_VOTER_PRIORITY),
            (role_voter, ROLE_VOTER_PRIORITY),
        ];
        voters.extend(extra_voters);

        Ok(Arc::new(Self::new(voters, strategy)?.with_resolvers(resolvers)))
    }

    /// Voters in consultation order.
    pub fn voters(&self) -> impl Iterator<Item = &Arc<dyn Voter>> {
        self.voters.iter().map(|(voter, _)| voter)
    }
}

impl AccessDecider for AccessDecisionManager {
    fn decide(&self, token: &Token, attributes: &[&str], subject: Option<&dyn Any>) -> bool {
        let strategy = self
            .resolvers
            .iter()
            .find_map(|resolver| resolver.resolve(attributes, subject))
            .unwrap_or_else(|| self.strategy.clone());

        let mut votes = self.voters.iter().map(|(voter, _)| {
            let vote = voter.vote(token, subject, attributes);
            tracing::debug!(voter = voter.name(), vote = ?vote, attributes = ?attributes, "Voter decided");
            vote
        });
        let granted = strategy.decide(&mut votes);

        tracing::debug!(
            user = %token.user_identifier(),
            attributes = ?attributes,
            granted,
            "Access decision"
        );
        granted
    }
}
