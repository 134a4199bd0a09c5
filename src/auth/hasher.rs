//! Password hashing used by the credentials check.

use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
};
use argon2::{Algorithm, Argon2, Params, Version};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{ShieldError, ShieldResult};

/// Hashes and verifies user passwords.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, plaintext: &str) -> ShieldResult<String>;

    fn verify(&self, hashed: &str, plaintext: &str) -> bool;

    /// Whether a stored hash should be replaced after a successful login.
    fn needs_rehash(&self, hashed: &str) -> bool;
}

const ARGON2ID_PREFIX: &str = "$argon2id$";
const LEGACY_SHA256_PREFIX: &str = "$sha256$";

/// Argon2id hasher producing PHC strings with a random per-hash salt.
///
/// Verification reads the cost parameters from the stored hash, so hashes
/// produced with other parameters keep verifying. Unsalted SHA-256 digests
/// (`$sha256$<hex>` or bare hex) from older configurations still verify
/// and are always flagged for rehash.
#[derive(Debug, Clone, Default)]
pub struct Argon2PasswordHasher {
    params: Params,
}

impl Argon2PasswordHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: Params) -> Self {
        Self { params }
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    fn verify_legacy(hashed: &str, plaintext: &str) -> bool {
        let expected = hashed.strip_prefix(LEGACY_SHA256_PREFIX).unwrap_or(hashed);
        let digest = hex::encode(Sha256::digest(plaintext.as_bytes()));
        expected.as_bytes().ct_eq(digest.as_bytes()).into()
    }
}

impl PasswordHasher for Argon2PasswordHasher {
    fn hash(&self, plaintext: &str) -> ShieldResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ShieldError::Internal(format!("Password hashing failed: {}", e)))
    }

    fn verify(&self, hashed: &str, plaintext: &str) -> bool {
        if !hashed.starts_with("$argon2") {
            return Self::verify_legacy(hashed, plaintext);
        }
        match PasswordHash::new(hashed) {
            Ok(parsed) => Argon2::default()
                .verify_password(plaintext.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::warn!(error = %e, "Stored password hash is malformed");
                false
            }
        }
    }

    fn needs_rehash(&self, hashed: &str) -> bool {
        !hashed.starts_with(ARGON2ID_PREFIX)
    }
}

#[cfg(test)]
impl Argon2PasswordHasher {
    /// Minimal cost parameters so unoptimized test builds stay fast.
    pub(crate) fn fast() -> Self {
        Self::with_params(Params::new(1024, 1, 1, None).unwrap())
    }

    pub(crate) fn legacy_sha256(plaintext: &str) -> String {
        format!(
            "{}{}",
            LEGACY_SHA256_PREFIX,
            hex::encode(Sha256::digest(plaintext.as_bytes()))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hasher = Argon2PasswordHasher::fast();
        let hash = hasher.hash("password123").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify(&hash, "password123"));
        assert!(!hasher.verify(&hash, "wrong"));
        assert!(!hasher.needs_rehash(&hash));
    }

    #[test]
    fn test_same_password_gets_distinct_salted_hashes() {
        let hasher = Argon2PasswordHasher::fast();
        let first = hasher.hash("password123").unwrap();
        let second = hasher.hash("password123").unwrap();

        assert_ne!(first, second);
        assert!(hasher.verify(&first, "password123"));
        assert!(hasher.verify(&second, "password123"));
    }

    #[test]
    fn test_default_hasher_verifies_other_cost_parameters() {
        let hash = Argon2PasswordHasher::fast().hash("pw").unwrap();
        assert!(Argon2PasswordHasher::default().verify(&hash, "pw"));
    }

    #[test]
    fn test_known_phc_hash_verifies() {
        let hash = "$argon2id$v=19$m=19456,t=2,p=1$0LFqk9nY68tV1S5ItJcADQ$ORUdvXIBgakEII93r6AMocsocx9h3yKYzZzcbRUF2ek";
        let hasher = Argon2PasswordHasher::default();
        assert!(hasher.verify(hash, "secret"));
        assert!(!hasher.verify(hash, "Secret"));
    }

    #[test]
    fn test_legacy_sha256_verifies_and_needs_rehash() {
        let hasher = Argon2PasswordHasher::fast();
        let prefixed = Argon2PasswordHasher::legacy_sha256("password123");
        let bare = prefixed.trim_start_matches(LEGACY_SHA256_PREFIX).to_string();

        for legacy in [&prefixed, &bare] {
            assert!(hasher.verify(legacy, "password123"));
            assert!(!hasher.verify(legacy, "wrong"));
            assert!(hasher.needs_rehash(legacy));
        }
    }

    #[test]
    fn test_malformed_phc_string_does_not_verify() {
        let hasher = Argon2PasswordHasher::fast();
        assert!(!hasher.verify("$argon2id$garbage", "pw"));
    }
}
