//! Route definitions for the API.

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::api::handlers;
use crate::auth::JwtTokenHandler;
use crate::middleware::{firewall, SecurityState};
use crate::security::Security;

/// State shared by the handlers.
#[derive(Clone)]
pub struct ApiState {
    pub security: Arc<Security>,
    /// Issues access tokens, absent without a `jwt` section.
    pub jwt: Option<Arc<JwtTokenHandler>>,
}

/// Build the API router behind the security middleware.
pub fn build_router(state: ApiState, security: SecurityState) -> Router {
    Router::new()
        .route("/v1/health", get(handlers::health_check))
        .route("/v1/me", get(handlers::current_user))
        .route("/v1/auth/token", post(handlers::issue_token))
        .route("/v1/auth/login-link", post(handlers::create_login_link))
        .with_state(state)
        .layer(middleware::from_fn_with_state(security, firewall))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{IssueTokenResponse, LoginLinkResponse, UserInfo};
    use crate::auth::{Argon2PasswordHasher, PasswordHasher};
    use crate::config::SecurityConfig;
    use crate::domain::TokenKind;
    use crate::services::ServiceRegistry;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use base64::Engine;
    use tower::ServiceExt;

    fn app() -> Router {
        let hash = Argon2PasswordHasher::fast().hash("secret").unwrap();
        let yaml = format!(
            r#"
users:
  - identifier: alice
    password_hash: "{hash}"
    roles: [ROLE_USER]
jwt:
  secret: test-secret
  issuer: shield-guard
access_control:
  - path: "^/v1/health"
    roles: [PUBLIC_ACCESS]
  - path: "^/v1"
    roles: [IS_AUTHENTICATED]
firewalls:
  - name: api
    stateless: true
    http_basic: {{ realm: Api }}
    access_token:
      token_handler: jwt
    entry_point: http_basic
    login_link:
      secret: link-secret
"#
        );
        let config = SecurityConfig::from_yaml(&yaml).unwrap();
        let security = Arc::new(Security::from_config(&config, &ServiceRegistry::new()).unwrap());
        let jwt = config
            .jwt
            .as_ref()
            .map(|c| Arc::new(JwtTokenHandler::new(&c.secret, c.issuer.clone())));

        build_router(
            ApiState {
                security: security.clone(),
                jwt,
            },
            SecurityState::new(security),
        )
    }

    fn basic() -> String {
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode("alice:secret")
        )
    }

    async fn json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let response = app()
            .oneshot(Request::builder().uri("/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_me_requires_authentication() {
        let response = app()
            .oneshot(Request::builder().uri("/v1/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_some());
    }

    #[tokio::test]
    async fn test_issued_jwt_authenticates() {
        let app = app();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/auth/token")
                    .header(header::AUTHORIZATION, basic())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let issued: IssueTokenResponse = json(response).await;
        assert_eq!(issued.expires_in, 3600);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/me")
                    .header(header::AUTHORIZATION, format!("Bearer {}", issued.access_token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let me: UserInfo = json(response).await;
        assert_eq!(me.identifier, "alice");
        assert_eq!(me.roles, vec!["ROLE_USER".to_string()]);
        assert_eq!(me.token_kind, TokenKind::PostAuthentication);
    }

    #[tokio::test]
    async fn test_login_link_for_current_user() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/auth/login-link")
                    .header(header::AUTHORIZATION, basic())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let link: LoginLinkResponse = json(response).await;
        assert!(link.url.contains("user=alice"));
    }
}
