//! Voters and the built-in voter implementations.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::domain::{Token, TokenKind};

/// A voter's answer to one access question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Grant,
    Deny,
    /// The voter has no opinion on these attributes.
    Abstain,
}

/// Pluggable unit deciding on a token, a subject and a set of attributes.
///
/// A voter that does not understand the question abstains; it never fails.
///
/// `attributes` is the whole list of one decision, not one attribute at a
/// time: an access rule `roles: [ROLE_ADMIN, IS_AUTHENTICATED_FULLY]` reaches
/// every voter as a single call with both entries. Voters must skip the
/// attributes they do not support and answer for the ones they do. The
/// built-in voters grant when any supported attribute is satisfied and deny
/// when none is.
pub trait Voter: Send + Sync {
    fn vote(&self, token: &Token, subject: Option<&dyn Any>, attributes: &[&str]) -> Vote;

    /// Name used in decision logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

pub const IS_AUTHENTICATED_FULLY: &str = "IS_AUTHENTICATED_FULLY";
pub const IS_AUTHENTICATED_REMEMBERED: &str = "IS_AUTHENTICATED_REMEMBERED";
pub const IS_AUTHENTICATED: &str = "IS_AUTHENTICATED";
pub const IS_REMEMBERED: &str = "IS_REMEMBERED";
pub const PUBLIC_ACCESS: &str = "PUBLIC_ACCESS";
/// Granted while a user is impersonated through switch user.
pub const IS_IMPERSONATOR: &str = "IS_IMPERSONATOR";

/// Votes on `ROLE_*` attributes using the token's roles.
#[derive(Debug, Clone)]
pub struct RoleVoter {
    prefix: String,
}

impl RoleVoter {
    pub fn new() -> Self {
        Self::with_prefix("ROLE_")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn vote_on_roles(&self, roles: &[String], attributes: &[&str]) -> Vote {
        let mut vote = Vote::Abstain;
        for attribute in attributes.iter().filter(|a| a.starts_with(&self.prefix)) {
            vote = Vote::Deny;
            if roles.iter().any(|role| role == *attribute) {
                return Vote::Grant;
            }
        }
        vote
    }
}

impl Default for RoleVoter {
    fn default() -> Self {
        Self::new()
    }
}

impl Voter for RoleVoter {
    fn vote(&self, token: &Token, _subject: Option<&dyn Any>, attributes: &[&str]) -> Vote {
        self.vote_on_roles(token.roles(), attributes)
    }

    fn name(&self) -> &str {
        "role"
    }
}

/// Roles implied by other roles, e.g. `ROLE_ADMIN: [ROLE_USER]`.
#[derive(Debug, Clone, Default)]
pub struct RoleHierarchy {
    map: HashMap<String, Vec<String>>,
}

impl RoleHierarchy {
    pub fn new(map: HashMap<String, Vec<String>>) -> Self {
        Self { map }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// `roles` plus every role they imply, transitively. Cycles are ignored.
    pub fn reachable_roles(&self, roles: &[String]) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut reachable = Vec::new();
        let mut pending: Vec<&str> = roles.iter().map(String::as_str).collect();

        while let Some(role) = pending.pop() {
            if !seen.insert(role) {
                continue;
            }
            reachable.push(role.to_string());
            if let Some(children) = self.map.get(role) {
                pending.extend(children.iter().map(String::as_str));
            }
        }
        reachable
    }
}

/// `RoleVoter` that also accepts roles reachable through a hierarchy.
#[derive(Debug, Clone)]
pub struct RoleHierarchyVoter {
    hierarchy: RoleHierarchy,
    inner: RoleVoter,
}

impl RoleHierarchyVoter {
    pub fn new(hierarchy: RoleHierarchy) -> Self {
        Self {
            hierarchy,
            inner: RoleVoter::new(),
        }
    }
}

impl Voter for RoleHierarchyVoter {
    fn vote(&self, token: &Token, _subject: Option<&dyn Any>, attributes: &[&str]) -> Vote {
        let roles = self.hierarchy.reachable_roles(token.roles());
        self.inner.vote_on_roles(&roles, attributes)
    }

    fn name(&self) -> &str {
        "role_hierarchy"
    }
}

/// Votes on how the token was authenticated.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthenticatedVoter;

impl AuthenticatedVoter {
    fn supports(attribute: &str) -> bool {
        matches!(
            attribute,
            IS_AUTHENTICATED_FULLY
                | IS_AUTHENTICATED_REMEMBERED
                | IS_AUTHENTICATED
                | IS_REMEMBERED
                | IS_IMPERSONATOR
                | PUBLIC_ACCESS
        )
    }
}

impl Voter for AuthenticatedVoter {
    fn vote(&self, token: &Token, _subject: Option<&dyn Any>, attributes: &[&str]) -> Vote {
        let kind = token.kind();
        let authenticated = kind != TokenKind::Anonymous;
        let remembered = kind == TokenKind::RememberMe;
        let fully = authenticated && !remembered;

        let mut vote = Vote::Abstain;
        for attribute in attributes.iter().filter(|a| Self::supports(a)) {
            vote = Vote::Deny;
            let granted = match *attribute {
                PUBLIC_ACCESS => true,
                IS_AUTHENTICATED_FULLY => fully,
                IS_AUTHENTICATED_REMEMBERED | IS_AUTHENTICATED => authenticated,
                IS_REMEMBERED => remembered,
                IS_IMPERSONATOR => kind == TokenKind::SwitchUser,
                _ => false,
            };
            if granted {
                return Vote::Grant;
            }
        }
        vote
    }

    fn name(&self) -> &str {
        "authenticated"
    }
}

type VoteFn = dyn Fn(&Token, Option<&dyn Any>, &[&str]) -> Vote + Send + Sync;

/// Voter backed by a closure.
#[derive(Clone)]
pub struct CallbackVoter {
    name: String,
    callback: Arc<VoteFn>,
}

impl CallbackVoter {
    pub fn new<F>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&Token, Option<&dyn Any>, &[&str]) -> Vote + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            callback: Arc::new(callback),
        }
    }
}

impl Voter for CallbackVoter {
    fn vote(&self, token: &Token, subject: Option<&dyn Any>, attributes: &[&str]) -> Vote {
        (self.callback)(token, subject, attributes)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::User;

    fn token(roles: &[&str], kind: TokenKind) -> Token {
        Token::new(
            User::new("alice", roles.iter().map(|r| r.to_string()).collect()),
            "main",
            kind,
        )
    }

    #[test]
    fn test_role_voter() {
        let voter = RoleVoter::new();
        let token = token(&["ROLE_USER"], TokenKind::UsernamePassword);

        assert_eq!(voter.vote(&token, None, &["ROLE_USER"]), Vote::Grant);
        assert_eq!(voter.vote(&token, None, &["ROLE_ADMIN", "ROLE_USER"]), Vote::Grant);
        assert_eq!(voter.vote(&token, None, &["ROLE_ADMIN"]), Vote::Deny);
        assert_eq!(voter.vote(&token, None, &["EDIT"]), Vote::Abstain);
    }

    #[test]
    fn test_hierarchy_is_transitive_and_tolerates_cycles() {
        let hierarchy = RoleHierarchy::new(HashMap::from([
            ("ROLE_SUPER".to_string(), vec!["ROLE_ADMIN".to_string()]),
            ("ROLE_ADMIN".to_string(), vec!["ROLE_USER".to_string(), "ROLE_SUPER".to_string()]),
        ]));

        let mut reachable = hierarchy.reachable_roles(&["ROLE_SUPER".to_string()]);
        reachable.sort();
        assert_eq!(reachable, vec!["ROLE_ADMIN", "ROLE_SUPER", "ROLE_USER"]);

        let voter = RoleHierarchyVoter::new(hierarchy);
        let token = token(&["ROLE_SUPER"], TokenKind::UsernamePassword);
        assert_eq!(voter.vote(&token, None, &["ROLE_USER"]), Vote::Grant);
        assert_eq!(voter.vote(&token, None, &["ROLE_OTHER"]), Vote::Deny);
    }

    #[test]
    fn test_authenticated_voter() {
        let voter = AuthenticatedVoter;
        let full = token(&[], TokenKind::UsernamePassword);
        let remembered = token(&[], TokenKind::RememberMe);
        let anonymous = token(&[], TokenKind::Anonymous);

        assert_eq!(voter.vote(&full, None, &[IS_AUTHENTICATED_FULLY]), Vote::Grant);
        assert_eq!(voter.vote(&remembered, None, &[IS_AUTHENTICATED_FULLY]), Vote::Deny);
        assert_eq!(voter.vote(&remembered, None, &[IS_AUTHENTICATED_REMEMBERED]), Vote::Grant);
        assert_eq!(voter.vote(&remembered, None, &[IS_REMEMBERED]), Vote::Grant);
        assert_eq!(voter.vote(&anonymous, None, &[IS_AUTHENTICATED]), Vote::Deny);
        assert_eq!(voter.vote(&anonymous, None, &[PUBLIC_ACCESS]), Vote::Grant);
        assert_eq!(voter.vote(&full, None, &["ROLE_USER"]), Vote::Abstain);
    }

    #[test]
    fn test_mixed_attribute_list_answered_per_voter() {
        let attributes = ["ROLE_ADMIN", IS_AUTHENTICATED_FULLY];
        let user = token(&["ROLE_USER"], TokenKind::UsernamePassword);
        let admin = token(&["ROLE_ADMIN"], TokenKind::RememberMe);

        assert_eq!(RoleVoter::new().vote(&user, None, &attributes), Vote::Deny);
        assert_eq!(AuthenticatedVoter.vote(&user, None, &attributes), Vote::Grant);
        assert_eq!(RoleVoter::new().vote(&admin, None, &attributes), Vote::Grant);
        assert_eq!(AuthenticatedVoter.vote(&admin, None, &attributes), Vote::Deny);
    }

    #[test]
    fn test_callback_voter_sees_subject() {
        let voter = CallbackVoter::new("owner", |token, subject, _| {
            match subject.and_then(|s| s.downcast_ref::<String>()) {
                Some(owner) if owner == token.user_identifier() => Vote::Grant,
                Some(_) => Vote::Deny,
                None => Vote::Abstain,
            }
        });
        let token = token(&[], TokenKind::UsernamePassword);
        let owner = "alice".to_string();
        let other = "bob".to_string();

        assert_eq!(voter.vote(&token, Some(&owner), &["EDIT"]), Vote::Grant);
        assert_eq!(voter.vote(&token, Some(&other), &["EDIT"]), Vote::Deny);
        assert_eq!(voter.vote(&token, None, &["EDIT"]), Vote::Abstain);
        assert_eq!(voter.name(), "owner");
    }
}
