//! Request and response types for the API.

use serde::{Deserialize, Serialize};

use crate::domain::{Token, TokenKind};

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
    /// Number of configured firewalls.
    pub firewalls: usize,
    /// Timestamp.
    pub timestamp: String,
}

/// The authenticated user.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserInfo {
    pub identifier: String,
    pub roles: Vec<String>,
    pub firewall: String,
    pub token_kind: TokenKind,
}

impl From<&Token> for UserInfo {
    fn from(token: &Token) -> Self {
        Self {
            identifier: token.user_identifier().to_string(),
            roles: token.roles().to_vec(),
            firewall: token.firewall_name().to_string(),
            token_kind: token.kind(),
        }
    }
}

/// Token request body.
#[derive(Debug, Default, Deserialize)]
pub struct IssueTokenRequest {
    /// Validity in hours, defaults to one hour.
    #[serde(default)]
    pub hours: Option<i64>,
}

/// Issued access token.
#[derive(Debug, Serialize, Deserialize)]
pub struct IssueTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Login link for the authenticated user.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginLinkResponse {
    pub url: String,
}
