//! Strategies turning a sequence of votes into a verdict.

use std::any::Any;
use std::sync::Arc;

use super::Vote;
use crate::error::ConfigurationError;

/// Aggregates votes into a decision.
///
/// Votes are pulled lazily so a strategy can stop consulting voters once
/// the outcome is known.
pub trait AccessDecisionStrategy: Send + Sync {
    fn decide(&self, votes: &mut dyn Iterator<Item = Vote>) -> bool;
}

/// Grants as soon as one voter grants.
#[derive(Debug, Clone, Copy, Default)]
pub struct AffirmativeStrategy {
    pub allow_if_all_abstain: bool,
}

impl AccessDecisionStrategy for AffirmativeStrategy {
    fn decide(&self, votes: &mut dyn Iterator<Item = Vote>) -> bool {
        let mut denied = 0;
        for vote in votes {
            match vote {
                Vote::Grant => return true,
                Vote::Deny => denied += 1,
                Vote::Abstain => {}
            }
        }
        if denied > 0 {
            return false;
        }
        self.allow_if_all_abstain
    }
}

/// Grants when grants outnumber denials.
#[derive(Debug, Clone, Copy)]
pub struct ConsensusStrategy {
    pub allow_if_all_abstain: bool,
    pub allow_if_equal_granted_denied: bool,
}

impl Default for ConsensusStrategy {
    fn default() -> Self {
        Self {
            allow_if_all_abstain: false,
            allow_if_equal_granted_denied: true,
        }
    }
}

impl AccessDecisionStrategy for ConsensusStrategy {
    fn decide(&self, votes: &mut dyn Iterator<Item = Vote>) -> bool {
        let (mut granted, mut denied) = (0usize, 0usize);
        for vote in votes {
            match vote {
                Vote::Grant => granted += 1,
                Vote::Deny => denied += 1,
                Vote::Abstain => {}
            }
        }

        if granted > denied {
            true
        } else if denied > granted {
            false
        } else if granted > 0 {
            self.allow_if_equal_granted_denied
        } else {
            self.allow_if_all_abstain
        }
    }
}

/// Grants only if no voter denies and at least one grants.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnanimousStrategy {
    pub allow_if_all_abstain: bool,
}

impl AccessDecisionStrategy for UnanimousStrategy {
    fn decide(&self, votes: &mut dyn Iterator<Item = Vote>) -> bool {
        let mut granted = 0;
        for vote in votes {
            match vote {
                Vote::Deny => return false,
                Vote::Grant => granted += 1,
                Vote::Abstain => {}
            }
        }
        if granted > 0 {
            return true;
        }
        self.allow_if_all_abstain
    }
}

/// The first voter that does not abstain decides.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityStrategy {
    pub allow_if_all_abstain: bool,
}

impl AccessDecisionStrategy for PriorityStrategy {
    fn decide(&self, votes: &mut dyn Iterator<Item = Vote>) -> bool {
        for vote in votes {
            match vote {
                Vote::Grant => return true,
                Vote::Deny => return false,
                Vote::Abstain => {}
            }
        }
        self.allow_if_all_abstain
    }
}

/// Build a strategy from its configuration name.
pub fn strategy_from_name(
    name: &str,
    allow_if_all_abstain: bool,
    allow_if_equal_granted_denied: bool,
) -> Result<Arc<dyn AccessDecisionStrategy>, ConfigurationError> {
    let strategy: Arc<dyn AccessDecisionStrategy> = match name {
        "affirmative" => Arc::new(AffirmativeStrategy {
            allow_if_all_abstain,
        }),
        "consensus" => Arc::new(ConsensusStrategy {
            allow_if_all_abstain,
            allow_if_equal_granted_denied,
        }),
        "unanimous" => Arc::new(UnanimousStrategy {
            allow_if_all_abstain,
        }),
        "priority" => Arc::new(PriorityStrategy {
            allow_if_all_abstain,
        }),
        other => return Err(ConfigurationError::InvalidStrategy(other.to_string())),
    };
    Ok(strategy)
}

/// Picks a strategy for a particular question.
pub trait StrategyResolver: Send + Sync {
    /// `None` defers to the next resolver, then to the default strategy.
    fn resolve(
        &self,
        attributes: &[&str],
        subject: Option<&dyn Any>,
    ) -> Option<Arc<dyn AccessDecisionStrategy>>;
}

/// Uses `strategy` whenever one of `attributes` is asked for.
pub struct AttributeStrategyResolver {
    attributes: Vec<String>,
    strategy: Arc<dyn AccessDecisionStrategy>,
}

impl AttributeStrategyResolver {
    pub fn new(attributes: Vec<String>, strategy: Arc<dyn AccessDecisionStrategy>) -> Self {
        Self {
            attributes,
            strategy,
        }
    }
}

impl StrategyResolver for AttributeStrategyResolver {
    fn resolve(
        &self,
        attributes: &[&str],
        _subject: Option<&dyn Any>,
    ) -> Option<Arc<dyn AccessDecisionStrategy>> {
        attributes
            .iter()
            .any(|a| self.attributes.iter().any(|own| own == *a))
            .then(|| self.strategy.clone())
    }
}
