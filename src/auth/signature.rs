//! Expiring signatures bound to a user's stored password hash.
//!
//! Changing the password invalidates every signature issued before.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use moka::sync::Cache;
use sha2::Sha256;

use crate::domain::User;
use crate::error::{AuthenticationError, ConfigurationError};

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over the user identifier, expiry and stored password hash.
pub struct SignatureHasher {
    mac: HmacSha256,
}

impl SignatureHasher {
    pub fn new(secret: &str) -> Result<Self, ConfigurationError> {
        if secret.is_empty() {
            return Err(ConfigurationError::InvalidSecret(
                "signing secret must not be empty".to_string(),
            ));
        }
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| ConfigurationError::InvalidSecret(e.to_string()))?;
        Ok(Self { mac })
    }

    fn keyed(&self, user: &User, expires: i64) -> HmacSha256 {
        let mut mac = self.mac.clone();
        let expires = expires.to_be_bytes();
        let fields: [&[u8]; 3] = [
            user.identifier.as_bytes(),
            &expires,
            user.password_hash.as_deref().unwrap_or("").as_bytes(),
        ];
        // length-prefixed so field boundaries cannot shift
        for field in fields {
            mac.update(&(field.len() as u64).to_be_bytes());
            mac.update(field);
        }
        mac
    }

    pub fn compute(&self, user: &User, expires: i64) -> String {
        URL_SAFE_NO_PAD.encode(self.keyed(user, expires).finalize().into_bytes())
    }

    /// Check expiry then signature.
    pub fn verify(&self, user: &User, expires: i64, hash: &str) -> Result<(), AuthenticationError> {
        if expires < Utc::now().timestamp() {
            return Err(AuthenticationError::InvalidToken(
                "Signature has expired.".to_string(),
            ));
        }
        let invalid =
            || AuthenticationError::InvalidToken("Invalid or expired signature.".to_string());
        let tag = URL_SAFE_NO_PAD.decode(hash).map_err(|_| invalid())?;
        self.keyed(user, expires)
            .verify_slice(&tag)
            .map_err(|_| invalid())
    }
}

/// Counts how often each signature was consumed.
///
/// Entries expire after the signature lifetime, when the signature itself
/// stops verifying.
pub struct ExpiredSignatureStorage {
    uses: Cache<String, Arc<AtomicU32>>,
}

impl ExpiredSignatureStorage {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            uses: Cache::builder().time_to_live(lifetime).build(),
        }
    }

    pub fn count_usages(&self, hash: &str) -> u32 {
        self.uses
            .get(hash)
            .map(|count| count.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Record one more use and return the new total.
    pub fn increment_usages(&self, hash: &str) -> u32 {
        self.uses
            .get_with(hash.to_string(), || Arc::new(AtomicU32::new(0)))
            .fetch_add(1, Ordering::SeqCst)
            + 1
    }
}
