//! HTTP request handlers.

use axum::{extract::State, Extension, Json};
use chrono::Duration;

use crate::api::routes::ApiState;
use crate::api::types::*;
use crate::domain::Token;
use crate::error::{AuthenticationError, ShieldError, ShieldResult};

const MAX_TOKEN_HOURS: i64 = 24;

/// GET /v1/health
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        firewalls: state.security.firewalls().len(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

fn require_token(token: Option<Extension<Token>>) -> ShieldResult<Token> {
    token.map(|Extension(token)| token).ok_or_else(|| {
        ShieldError::Authentication(AuthenticationError::Custom(
            "Full authentication is required to access this resource.".to_string(),
        ))
    })
}

/// GET /v1/me
pub async fn current_user(token: Option<Extension<Token>>) -> ShieldResult<Json<UserInfo>> {
    let token = require_token(token)?;
    Ok(Json(UserInfo::from(&token)))
}

/// Issue a JWT for the authenticated user.
///
/// POST /v1/auth/token
pub async fn issue_token(
    State(state): State<ApiState>,
    token: Option<Extension<Token>>,
    request: Option<Json<IssueTokenRequest>>,
) -> ShieldResult<Json<IssueTokenResponse>> {
    let token = require_token(token)?;
    let jwt = state
        .jwt
        .as_ref()
        .ok_or_else(|| ShieldError::BadRequest("JWT issuing is not configured".to_string()))?;

    let hours = request
        .and_then(|Json(r)| r.hours)
        .unwrap_or(1)
        .clamp(1, MAX_TOKEN_HOURS);
    let access_token = jwt.generate_token(token.user(), Duration::hours(hours))?;

    tracing::info!(user = %token.user_identifier(), hours, "Issued access token");

    Ok(Json(IssueTokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: hours * 3600,
    }))
}

/// Create a login link on the user's firewall.
///
/// POST /v1/auth/login-link
pub async fn create_login_link(
    State(state): State<ApiState>,
    token: Option<Extension<Token>>,
) -> ShieldResult<Json<LoginLinkResponse>> {
    let token = require_token(token)?;
    let handler = state
        .security
        .login_link_handler(token.firewall_name())
        .ok_or_else(|| {
            ShieldError::BadRequest(format!(
                "Firewall \"{}\" has no login link configured",
                token.firewall_name()
            ))
        })?;

    Ok(Json(LoginLinkResponse {
        url: handler.create_login_link(token.user()),
    }))
}
