//! Passwordless login through signed, expiring links.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::{
    Authenticator, DefaultFailureHandler, DefaultSuccessHandler, ExpiredSignatureStorage,
    SignatureHasher, Supports,
};
use crate::config::LoginLinkConfig;
use crate::domain::{Token, User, UserProvider};
use crate::error::{AuthenticationError, ConfigurationError, ShieldResult};
use crate::passport::{Passport, UserBadge};
use crate::request::{Request, Response};

/// Creates and consumes login links.
pub struct LoginLinkHandler {
    provider: Arc<dyn UserProvider>,
    signer: SignatureHasher,
    check_path: String,
    lifetime: i64,
    /// Set when links may only be consumed a limited number of times.
    usages: Option<(u32, ExpiredSignatureStorage)>,
}

impl LoginLinkHandler {
    pub fn new(
        options: &LoginLinkConfig,
        provider: Arc<dyn UserProvider>,
    ) -> Result<Self, ConfigurationError> {
        let ttl = Duration::from_secs(options.lifetime.max(1).unsigned_abs());
        Ok(Self {
            provider,
            signer: SignatureHasher::new(&options.secret)?,
            check_path: options.check_path.clone(),
            lifetime: options.lifetime,
            usages: options
                .max_uses
                .map(|max| (max, ExpiredSignatureStorage::new(ttl))),
        })
    }

    /// Relative URL logging `user` in until the link expires.
    pub fn create_login_link(&self, user: &User) -> String {
        let expires = Utc::now().timestamp() + self.lifetime;
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("user", &user.identifier)
            .append_pair("expires", &expires.to_string())
            .append_pair("hash", &self.signer.compute(user, expires))
            .finish();
        format!("{}?{}", self.check_path, query)
    }

    /// Verify the link parameters of `request` and load its user.
    pub fn consume_login_link(&self, request: &Request) -> Result<User, AuthenticationError> {
        let identifier = request
            .query
            .get("user")
            .ok_or_else(|| AuthenticationError::InvalidLoginLink("Missing user from link.".to_string()))?;
        let hash = request
            .query
            .get("hash")
            .ok_or_else(|| AuthenticationError::InvalidLoginLink("Missing \"hash\" parameter.".to_string()))?;
        let expires: i64 = request
            .query
            .get("expires")
            .and_then(|e| e.parse().ok())
            .ok_or_else(|| AuthenticationError::InvalidLoginLink("Missing \"expires\" parameter.".to_string()))?;

        let user = self
            .provider
            .load_user_by_identifier(identifier)
            .ok_or_else(|| AuthenticationError::InvalidLoginLink("User not found.".to_string()))?;

        self.signer
            .verify(&user, expires, hash)
            .map_err(|e| AuthenticationError::InvalidLoginLink(e.to_string()))?;

        if let Some((max_uses, storage)) = &self.usages {
            if storage.increment_usages(hash) > *max_uses {
                tracing::warn!(user = %user.identifier, "Login link reused beyond its limit");
                return Err(AuthenticationError::InvalidLoginLink(format!(
                    "Login link can only be used \"{}\" times.",
                    max_uses
                )));
            }
        }
        Ok(user)
    }
}

pub struct LoginLinkAuthenticator {
    handler: Arc<LoginLinkHandler>,
    check_path: String,
    success_handler: DefaultSuccessHandler,
    failure_handler: DefaultFailureHandler,
}

impl LoginLinkAuthenticator {
    pub fn new(options: &LoginLinkConfig, handler: Arc<LoginLinkHandler>) -> Self {
        Self {
            handler,
            check_path: options.check_path.clone(),
            success_handler: DefaultSuccessHandler::new(options.default_target_path.clone(), false),
            failure_handler: DefaultFailureHandler::new(options.failure_path.clone()),
        }
    }
}

impl Authenticator for LoginLinkAuthenticator {
    fn key(&self) -> &str {
        "login_link"
    }

    fn priority(&self) -> i32 {
        -20
    }

    fn supports(&self, request: &mut Request) -> Supports {
        if request.path == self.check_path {
            Supports::Yes
        } else {
            Supports::No
        }
    }

    fn authenticate(&self, request: &mut Request) -> ShieldResult<Passport> {
        // a missing user is a failure, not a reason to skip the link
        let identifier = request.query.get("user").cloned().ok_or_else(|| {
            AuthenticationError::InvalidLoginLink("Missing user from link.".to_string())
        })?;

        let user = self.handler.consume_login_link(request)?;
        Ok(Passport::self_validating(UserBadge::with_loader(
            identifier,
            Arc::new(move |_: &str| Some(user.clone())),
        )))
    }

    fn on_authentication_success(
        &self,
        request: &mut Request,
        token: &Token,
        _firewall_name: &str,
    ) -> ShieldResult<Option<Response>> {
        Ok(Some(self.success_handler.on_success(request, token)))
    }

    fn on_authentication_failure(
        &self,
        request: &mut Request,
        error: &AuthenticationError,
    ) -> ShieldResult<Option<Response>> {
        Ok(Some(self.failure_handler.on_failure(request, error)))
    }

    fn is_interactive(&self) -> bool {
        true
    }
}
