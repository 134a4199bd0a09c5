//! The passport: one user badge plus auxiliary badges for one attempt.

use std::collections::BTreeMap;

use super::{
    Badge, BadgeKind, CsrfTokenBadge, PasswordCredentials, PasswordUpgradeBadge,
    RememberMeBadge, TokenBadge, UserBadge,
};
use crate::domain::User;
use crate::error::{AuthenticationError, ShieldError, ShieldResult};

/// In-flight bundle of credentials for a single authentication attempt.
///
/// Holds exactly one `UserBadge` and at most one badge of every other kind.
#[derive(Debug)]
pub struct Passport {
    user_badge: UserBadge,
    badges: BTreeMap<BadgeKind, Badge>,
}

impl Passport {
    /// A passport whose password must be verified.
    pub fn new(user_badge: UserBadge, credentials: PasswordCredentials) -> Self {
        let mut badges = BTreeMap::new();
        badges.insert(BadgeKind::Password, Badge::Password(credentials));
        Self { user_badge, badges }
    }

    /// A passport without credentials, valid once its user is loaded.
    pub fn self_validating(user_badge: UserBadge) -> Self {
        Self {
            user_badge,
            badges: BTreeMap::new(),
        }
    }

    /// Build a passport from a flat list of badges.
    ///
    /// Exactly one user badge is required; any duplicated kind is rejected.
    pub fn from_badges(badges: impl IntoIterator<Item = Badge>) -> ShieldResult<Self> {
        let mut user_badge = None;
        let mut others = Vec::new();

        for badge in badges {
            match badge {
                Badge::User(b) => {
                    if user_badge.is_some() {
                        return Err(ShieldError::BadgeAlreadyPresent(BadgeKind::User));
                    }
                    user_badge = Some(b);
                }
                other => others.push(other),
            }
        }

        let user_badge = user_badge.ok_or_else(|| {
            ShieldError::Invariant("A passport needs exactly one user badge".to_string())
        })?;

        let mut passport = Self::self_validating(user_badge);
        for badge in others {
            passport.add_badge(badge)?;
        }
        Ok(passport)
    }

    /// Add a badge, rejecting kinds already present.
    pub fn add_badge(&mut self, badge: impl Into<Badge>) -> ShieldResult<()> {
        let badge = badge.into();
        let kind = badge.kind();
        if kind == BadgeKind::User || self.badges.contains_key(&kind) {
            return Err(ShieldError::BadgeAlreadyPresent(kind));
        }
        self.badges.insert(kind, badge);
        Ok(())
    }

    /// Builder-style `add_badge`.
    pub fn with_badge(mut self, badge: impl Into<Badge>) -> ShieldResult<Self> {
        self.add_badge(badge)?;
        Ok(self)
    }

    pub fn user_badge(&self) -> &UserBadge {
        &self.user_badge
    }

    pub fn user_badge_mut(&mut self) -> &mut UserBadge {
        &mut self.user_badge
    }

    /// Resolve the user through the user badge (memoized).
    pub fn user(&self) -> Result<&User, AuthenticationError> {
        self.user_badge.user()
    }

    pub fn has_badge(&self, kind: BadgeKind) -> bool {
        kind == BadgeKind::User || self.badges.contains_key(&kind)
    }

    pub fn badge(&self, kind: BadgeKind) -> Option<&Badge> {
        self.badges.get(&kind)
    }

    pub fn badge_mut(&mut self, kind: BadgeKind) -> Option<&mut Badge> {
        self.badges.get_mut(&kind)
    }

    /// Auxiliary badges in kind order.
    pub fn badges(&self) -> impl Iterator<Item = &Badge> {
        self.badges.values()
    }

    pub fn password(&self) -> Option<&PasswordCredentials> {
        match self.badges.get(&BadgeKind::Password) {
            Some(Badge::Password(b)) => Some(b),
            _ => None,
        }
    }

    pub fn password_mut(&mut self) -> Option<&mut PasswordCredentials> {
        match self.badges.get_mut(&BadgeKind::Password) {
            Some(Badge::Password(b)) => Some(b),
            _ => None,
        }
    }

    pub fn csrf_mut(&mut self) -> Option<&mut CsrfTokenBadge> {
        match self.badges.get_mut(&BadgeKind::Csrf) {
            Some(Badge::Csrf(b)) => Some(b),
            _ => None,
        }
    }

    pub fn remember_me(&self) -> Option<&RememberMeBadge> {
        match self.badges.get(&BadgeKind::RememberMe) {
            Some(Badge::RememberMe(b)) => Some(b),
            _ => None,
        }
    }

    pub fn remember_me_mut(&mut self) -> Option<&mut RememberMeBadge> {
        match self.badges.get_mut(&BadgeKind::RememberMe) {
            Some(Badge::RememberMe(b)) => Some(b),
            _ => None,
        }
    }

    pub fn token_mut(&mut self) -> Option<&mut TokenBadge> {
        match self.badges.get_mut(&BadgeKind::Token) {
            Some(Badge::Token(b)) => Some(b),
            _ => None,
        }
    }

    pub fn password_upgrade(&self) -> Option<&PasswordUpgradeBadge> {
        match self.badges.get(&BadgeKind::PasswordUpgrade) {
            Some(Badge::PasswordUpgrade(b)) => Some(b),
            _ => None,
        }
    }

    pub fn is_pre_authenticated(&self) -> bool {
        self.badges.contains_key(&BadgeKind::PreAuthenticated)
    }

    /// Kinds whose checker has not (yet) resolved them.
    pub fn unresolved_badges(&self) -> Vec<BadgeKind> {
        self.badges
            .values()
            .filter(|b| !b.is_resolved())
            .map(Badge::kind)
            .collect()
    }

    /// Drop every plaintext secret still held by the passport.
    pub fn erase_credentials(&mut self) {
        for badge in self.badges.values_mut() {
            match badge {
                Badge::Password(b) => b.erase(),
                Badge::PasswordUpgrade(b) => b.erase(),
                _ => {}
            }
        }
    }
}
