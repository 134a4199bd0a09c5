//! Authenticated identity tokens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::User;
use crate::error::AuthenticationError;
use crate::passport::Passport;

/// How a token was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Zero-privilege identity for unauthenticated visitors.
    Anonymous,
    /// Restored from a remember-me cookie.
    RememberMe,
    /// Established upstream (client certificate, REMOTE_USER).
    PreAuthenticated,
    /// Produced by an authenticator after a passport was checked.
    PostAuthentication,
    /// Produced from a username/password login.
    UsernamePassword,
    /// Impersonation of another user, carrying the impersonator's token.
    SwitchUser,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Anonymous => write!(f, "anonymous"),
            TokenKind::RememberMe => write!(f, "remember_me"),
            TokenKind::PreAuthenticated => write!(f, "pre_authenticated"),
            TokenKind::PostAuthentication => write!(f, "post_authentication"),
            TokenKind::UsernamePassword => write!(f, "username_password"),
            TokenKind::SwitchUser => write!(f, "switch_user"),
        }
    }
}

/// The authenticated identity attached to a request.
///
/// Tokens are immutable; listeners that want a different token replace it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    id: Uuid,
    user: User,
    roles: Vec<String>,
    firewall_name: String,
    kind: TokenKind,
    created_at: DateTime<Utc>,
    /// Token of the impersonator when `kind` is `SwitchUser`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    original: Option<Box<Token>>,
}

impl Token {
    /// Create a token for an already loaded user.
    pub fn new(user: User, firewall_name: impl Into<String>, kind: TokenKind) -> Self {
        let roles = user.roles.clone();
        Self {
            id: Uuid::new_v4(),
            user,
            roles,
            firewall_name: firewall_name.into(),
            kind,
            created_at: Utc::now(),
            original: None,
        }
    }

    /// Create a token from a passport whose user has been resolved.
    pub fn from_passport(
        passport: &Passport,
        firewall_name: &str,
        kind: TokenKind,
    ) -> Result<Self, AuthenticationError> {
        let user = passport.user()?.clone();
        Ok(Self::new(user, firewall_name, kind))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn user_identifier(&self) -> &str {
        &self.user.identifier
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn firewall_name(&self) -> &str {
        &self.firewall_name
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// `user` impersonated by the holder of `original`.
    pub fn switched(user: User, firewall_name: impl Into<String>, original: Token) -> Self {
        Self {
            original: Some(Box::new(original)),
            ..Self::new(user, firewall_name, TokenKind::SwitchUser)
        }
    }

    /// The impersonator's token of a switched token.
    pub fn original_token(&self) -> Option<&Token> {
        self.original.as_deref()
    }

    /// Same identity with a refreshed user, as done when restoring a session.
    pub fn with_user(&self, user: User) -> Self {
        Self {
            roles: user.roles.clone(),
            user,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_copies_user_roles() {
        let user = User::new("alice", vec!["ROLE_ADMIN".to_string()]);
        let token = Token::new(user, "main", TokenKind::PostAuthentication);

        assert_eq!(token.user_identifier(), "alice");
        assert!(token.has_role("ROLE_ADMIN"));
        assert_eq!(token.firewall_name(), "main");
        assert_eq!(token.kind(), TokenKind::PostAuthentication);
    }

    #[test]
    fn test_serialized_token_drops_password_hash() {
        let user = User::with_password("alice", "hash", vec![]);
        let token = Token::new(user, "main", TokenKind::UsernamePassword);

        let json = serde_json::to_string(&token).unwrap();
        assert!(!json.contains("password_hash"));

        let restored: Token = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.user_identifier(), "alice");
        assert!(restored.user().password_hash.is_none());
    }

    #[test]
    fn test_switched_token_keeps_original_through_serialization() {
        let admin = Token::new(
            User::new("root", vec!["ROLE_ALLOWED_TO_SWITCH".to_string()]),
            "main",
            TokenKind::UsernamePassword,
        );
        let switched = Token::switched(User::new("alice", vec!["ROLE_USER".to_string()]), "main", admin.clone());

        assert_eq!(switched.kind(), TokenKind::SwitchUser);
        assert!(switched.has_role("ROLE_USER"));
        assert!(!switched.has_role("ROLE_ALLOWED_TO_SWITCH"));
        assert_eq!(switched.original_token(), Some(&admin));

        let restored: Token = serde_json::from_value(serde_json::to_value(&switched).unwrap()).unwrap();
        assert_eq!(restored.original_token().map(Token::user_identifier), Some("root"));
        assert!(Token::new(User::new("bob", vec![]), "main", TokenKind::UsernamePassword)
            .original_token()
            .is_none());
    }
}
