//! User domain types.
//!
//! Users are loaded through a `UserProvider` by identifier. Providers are
//! shared across requests and must be safe for concurrent reads.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::AuthenticationError;

/// An identity known to a user provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier (username, email, client id...).
    pub identifier: String,
    /// Roles granted to the user.
    pub roles: Vec<String>,
    /// Stored password hash, never serialized.
    #[serde(skip)]
    pub password_hash: Option<String>,
    /// Disabled users fail the pre-authentication user check.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl User {
    /// Create an enabled user without a password.
    pub fn new(identifier: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            identifier: identifier.into(),
            roles,
            password_hash: None,
            enabled: true,
        }
    }

    /// Create an enabled user with a stored password hash.
    pub fn with_password(
        identifier: impl Into<String>,
        password_hash: impl Into<String>,
        roles: Vec<String>,
    ) -> Self {
        Self {
            password_hash: Some(password_hash.into()),
            ..Self::new(identifier, roles)
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("identifier", &self.identifier)
            .field("roles", &self.roles)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Loads users by identifier.
pub trait UserProvider: Send + Sync {
    /// Load a user, `None` when no such user exists.
    fn load_user_by_identifier(&self, identifier: &str) -> Option<User>;

    /// Reload a user restored from the session.
    fn refresh_user(&self, user: &User) -> Option<User> {
        self.load_user_by_identifier(&user.identifier)
    }

    /// Whether `upgrade_password` persists anything.
    fn supports_password_upgrade(&self) -> bool {
        false
    }

    /// Persist a freshly computed hash for the user.
    fn upgrade_password(&self, _user: &User, _new_hash: &str) {}
}

/// User entry from config file.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfiguredUser {
    pub identifier: String,
    /// PHC password hash, `$argon2id$...`.
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Simple in-memory user provider.
pub struct InMemoryUserProvider {
    users: RwLock<HashMap<String, User>>,
}

impl InMemoryUserProvider {
    /// Create a provider from configured users.
    pub fn new(users: Vec<ConfiguredUser>) -> Self {
        let users = users
            .into_iter()
            .map(|u| {
                let user = User {
                    identifier: u.identifier.clone(),
                    roles: u.roles,
                    password_hash: u.password_hash,
                    enabled: u.enabled,
                };
                (u.identifier, user)
            })
            .collect();
        Self {
            users: RwLock::new(users),
        }
    }

    /// Create a provider from already built users.
    pub fn from_users(users: impl IntoIterator<Item = User>) -> Self {
        let users = users
            .into_iter()
            .map(|u| (u.identifier.clone(), u))
            .collect();
        Self {
            users: RwLock::new(users),
        }
    }
}

impl UserProvider for InMemoryUserProvider {
    fn load_user_by_identifier(&self, identifier: &str) -> Option<User> {
        let users = self.users.read().ok()?;
        users.get(identifier).cloned()
    }

    fn supports_password_upgrade(&self) -> bool {
        true
    }

    fn upgrade_password(&self, user: &User, new_hash: &str) {
        if let Ok(mut users) = self.users.write() {
            if let Some(stored) = users.get_mut(&user.identifier) {
                stored.password_hash = Some(new_hash.to_string());
                tracing::debug!(user = %user.identifier, "Password hash upgraded");
            }
        }
    }
}

/// Account status checks run around credential verification.
pub trait UserChecker: Send + Sync {
    /// Runs while the passport is checked, before credentials.
    fn check_pre_auth(&self, user: &User) -> Result<(), AuthenticationError>;

    /// Runs once the user is logged in.
    fn check_post_auth(&self, _user: &User) -> Result<(), AuthenticationError> {
        Ok(())
    }
}

/// Rejects disabled accounts.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnabledUserChecker;

impl UserChecker for EnabledUserChecker {
    fn check_pre_auth(&self, user: &User) -> Result<(), AuthenticationError> {
        if !user.enabled {
            return Err(AuthenticationError::AccountStatus(
                "Account is disabled.".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured(identifier: &str) -> ConfiguredUser {
        ConfiguredUser {
            identifier: identifier.to_string(),
            password_hash: Some("abc".to_string()),
            roles: vec!["ROLE_USER".to_string()],
            enabled: true,
        }
    }

    #[test]
    fn test_provider_lookup() {
        let provider = InMemoryUserProvider::new(vec![configured("alice")]);

        let user = provider.load_user_by_identifier("alice").unwrap();
        assert_eq!(user.identifier, "alice");
        assert!(user.has_role("ROLE_USER"));

        assert!(provider.load_user_by_identifier("bob").is_none());
    }

    #[test]
    fn test_password_upgrade_is_persisted() {
        let provider = InMemoryUserProvider::new(vec![configured("alice")]);
        let user = provider.load_user_by_identifier("alice").unwrap();

        provider.upgrade_password(&user, "new-hash");

        let reloaded = provider.refresh_user(&user).unwrap();
        assert_eq!(reloaded.password_hash.as_deref(), Some("new-hash"));
    }

    #[test]
    fn test_debug_hides_password_hash() {
        let user = User::with_password("alice", "secret-hash", vec![]);
        assert!(!format!("{:?}", user).contains("secret-hash"));
    }

    #[test]
    fn test_disabled_user_rejected() {
        let mut user = User::new("alice", vec![]);
        user.enabled = false;
        assert!(matches!(
            EnabledUserChecker.check_pre_auth(&user),
            Err(AuthenticationError::AccountStatus(_))
        ));
    }
}
