//! JWT access tokens (HS256).

use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};

use super::{AccessTokenHandler, VerifiedAccessToken};
use crate::domain::User;
use crate::error::{AuthenticationError, ShieldError, ShieldResult};
use crate::passport::{SignedTokenBadge, UserBadge};

/// Claims issued by `JwtTokenHandler::generate_token`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user identifier).
    pub sub: String,
    /// Roles granted to the subject.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    /// Issued at time (Unix timestamp).
    pub iat: i64,
    /// Issuer.
    pub iss: String,
}

/// Verifies signed JWTs and issues new ones.
#[derive(Clone)]
pub struct JwtTokenHandler {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    identifier_claim: String,
}

impl JwtTokenHandler {
    pub fn new(secret: &str, issuer: impl Into<String>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.into(),
            identifier_claim: "sub".to_string(),
        }
    }

    /// Read the user identifier from another claim than `sub`.
    pub fn with_identifier_claim(mut self, claim: impl Into<String>) -> Self {
        self.identifier_claim = claim.into();
        self
    }

    /// Generate a JWT for a user.
    pub fn generate_token(&self, user: &User, validity: Duration) -> ShieldResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.identifier.clone(),
            roles: user.roles.clone(),
            exp: (now + validity).timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ShieldError::Internal(format!("Failed to generate token: {}", e)))
    }

    /// Validate a JWT and return its raw claims.
    pub fn validate_token(&self, token: &str) -> Result<serde_json::Value, AuthenticationError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);

        let token_data: TokenData<serde_json::Value> =
            decode(token, &self.decoding_key, &validation).map_err(|e| {
                tracing::debug!(error = %e, "JWT validation failed");
                AuthenticationError::InvalidToken(e.to_string())
            })?;

        Ok(token_data.claims)
    }
}

impl AccessTokenHandler for JwtTokenHandler {
    fn verify(&self, raw_token: &str) -> Result<VerifiedAccessToken, AuthenticationError> {
        let claims = self.validate_token(raw_token)?;

        let identifier = claims
            .get(&self.identifier_claim)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                AuthenticationError::InvalidToken(format!(
                    "missing \"{}\" claim",
                    self.identifier_claim
                ))
            })?
            .to_string();

        let roles: Vec<String> = claims
            .get("roles")
            .and_then(|v| v.as_array())
            .map(|roles| {
                roles
                    .iter()
                    .filter_map(|r| r.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        // a configured user provider takes precedence over the claims
        let loader = Arc::new(move |id: &str| Some(User::new(id, roles.clone())));

        Ok(VerifiedAccessToken {
            user_badge: UserBadge::with_fallback_loader(identifier, loader),
            claim_key: self.identifier_claim.clone(),
            signed: Some(SignedTokenBadge::new(claims)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passport::BadgeKind;

    fn handler() -> JwtTokenHandler {
        JwtTokenHandler::new("test-secret-key-12345", "shield-guard")
    }

    #[test]
    fn test_jwt_roundtrip() {
        let handler = handler();
        let user = User::new("alice", vec!["ROLE_ADMIN".to_string()]);
        let token = handler.generate_token(&user, Duration::hours(1)).unwrap();

        let claims = handler.validate_token(&token).unwrap();
        assert_eq!(claims["sub"], "alice");
        assert_eq!(claims["iss"], "shield-guard");

        let verified = handler.verify(&token).unwrap();
        assert!(verified.user_badge.has_fallback_loader());
        assert_eq!(verified.user_badge.identifier(), "alice");
        assert!(verified.user_badge.user().unwrap().has_role("ROLE_ADMIN"));
        assert_eq!(verified.claim_key, "sub");
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let other = JwtTokenHandler::new("test-secret-key-12345", "someone-else");
        let token = other
            .generate_token(&User::new("alice", vec![]), Duration::hours(1))
            .unwrap();

        assert!(matches!(
            handler().verify(&token),
            Err(AuthenticationError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let handler = handler();
        let token = handler
            .generate_token(&User::new("alice", vec![]), Duration::hours(-2))
            .unwrap();
        assert!(handler.verify(&token).is_err());
    }

    #[test]
    fn test_tampered_token_rejected() {
        let token = JwtTokenHandler::new("another-secret", "shield-guard")
            .generate_token(&User::new("alice", vec![]), Duration::hours(1))
            .unwrap();
        assert!(handler().verify(&token).is_err());
    }

    #[test]
    fn test_signed_claims_badge() {
        let handler = handler();
        let token = handler
            .generate_token(&User::new("alice", vec![]), Duration::hours(1))
            .unwrap();
        let verified = handler.verify(&token).unwrap();
        let signed = verified.signed.unwrap();
        assert_eq!(signed.claims()["sub"], "alice");
        assert_eq!(
            crate::passport::Badge::from(signed).kind(),
            BadgeKind::SignedToken
        );
    }
}
