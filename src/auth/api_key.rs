//! API key access tokens for machine clients.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{AccessTokenHandler, VerifiedAccessToken};
use crate::config::ConfiguredApiKey;
use crate::domain::User;
use crate::error::AuthenticationError;
use crate::passport::UserBadge;

/// Represents an API key with its metadata.
#[derive(Debug, Clone)]
pub struct ApiKeyInfo {
    /// Unique identifier for this key.
    pub key_id: String,
    /// Client the key authenticates as.
    pub client_id: String,
    pub roles: Vec<String>,
    /// Whether this key is active.
    pub active: bool,
}

/// API key store, keyed by SHA-256 of the key.
#[derive(Clone, Default)]
pub struct ApiKeyTokenHandler {
    keys: Arc<RwLock<HashMap<String, ApiKeyInfo>>>,
}

impl ApiKeyTokenHandler {
    /// Create a handler with initial keys from config.
    pub fn new(configured_keys: Vec<ConfiguredApiKey>) -> Self {
        let keys = configured_keys
            .into_iter()
            .map(|key| {
                (
                    Self::hash_key(&key.key),
                    ApiKeyInfo {
                        key_id: key.id,
                        client_id: key.client_id,
                        roles: key.roles,
                        active: true,
                    },
                )
            })
            .collect();

        Self {
            keys: Arc::new(RwLock::new(keys)),
        }
    }

    /// Hash an API key for secure storage/comparison.
    pub fn hash_key(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Validate an API key and return its info if valid.
    pub fn validate(&self, key: &str) -> Option<ApiKeyInfo> {
        let hashed = Self::hash_key(key);
        let keys = self.keys.read().ok()?;
        keys.get(&hashed).filter(|info| info.active).cloned()
    }

    /// Add a new API key at runtime.
    pub fn add_key(&self, key: &str, info: ApiKeyInfo) {
        if let Ok(mut keys) = self.keys.write() {
            keys.insert(Self::hash_key(key), info);
        }
    }

    /// Revoke an API key by its ID.
    pub fn revoke_key(&self, key_id: &str) {
        if let Ok(mut keys) = self.keys.write() {
            for info in keys.values_mut().filter(|info| info.key_id == key_id) {
                info.active = false;
            }
        }
    }
}

impl AccessTokenHandler for ApiKeyTokenHandler {
    fn verify(&self, raw_token: &str) -> Result<VerifiedAccessToken, AuthenticationError> {
        let info = self.validate(raw_token).ok_or_else(|| {
            tracing::warn!(
                key_prefix = %raw_token.chars().take(8).collect::<String>(),
                "Invalid API key attempted"
            );
            AuthenticationError::InvalidToken("Invalid API key".to_string())
        })?;

        // the key itself is authoritative for the client identity
        let roles = info.roles;
        let loader = Arc::new(move |id: &str| Some(User::new(id, roles.clone())));
        Ok(VerifiedAccessToken::new(UserBadge::with_loader(
            info.client_id,
            loader,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured(id: &str, key: &str) -> ConfiguredApiKey {
        ConfiguredApiKey {
            id: id.to_string(),
            key: key.to_string(),
            client_id: "agent-001".to_string(),
            roles: vec!["ROLE_AGENT".to_string()],
        }
    }

    #[test]
    fn test_api_key_validation() {
        let handler = ApiKeyTokenHandler::new(vec![configured("key-1", "sk-test-key-12345")]);

        let result = handler.validate("sk-test-key-12345");
        assert_eq!(result.unwrap().client_id, "agent-001");

        assert!(handler.validate("wrong-key").is_none());
    }

    #[test]
    fn test_key_revocation() {
        let handler = ApiKeyTokenHandler::new(vec![configured("key-1", "sk-test-key")]);
        assert!(handler.verify("sk-test-key").is_ok());

        handler.revoke_key("key-1");

        assert!(matches!(
            handler.verify("sk-test-key"),
            Err(AuthenticationError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_verified_key_resolves_client() {
        let handler = ApiKeyTokenHandler::default();
        handler.add_key(
            "sk-runtime",
            ApiKeyInfo {
                key_id: "key-2".to_string(),
                client_id: "agent-002".to_string(),
                roles: vec!["ROLE_AGENT".to_string()],
                active: true,
            },
        );

        let verified = handler.verify("sk-runtime").unwrap();
        assert!(!verified.user_badge.has_fallback_loader());
        let user = verified.user_badge.user().unwrap();
        assert_eq!(user.identifier, "agent-002");
        assert!(user.has_role("ROLE_AGENT"));
    }
}
