//! Bearer access-token authentication.
//!
//! Extraction and verification are pluggable: an `AccessTokenExtractor`
//! finds the raw token, an `AccessTokenHandler` turns it into a user badge.

use std::sync::Arc;

use axum::http::{header, Method, StatusCode};

use super::{failure_body, AuthenticationEntryPoint, Authenticator, Supports};
use crate::domain::{Token, UserProvider};
use crate::error::{AuthenticationError, ShieldResult};
use crate::passport::{provider_loader, Passport, SignedTokenBadge, TokenBadge, UserBadge};
use crate::request::{Request, Response};

/// Finds a raw access token in a request.
pub trait AccessTokenExtractor: Send + Sync {
    fn extract(&self, request: &Request) -> Option<String>;
}

/// A verified token: the badge resolving its user, and claims if signed.
pub struct VerifiedAccessToken {
    pub user_badge: UserBadge,
    pub claim_key: String,
    pub signed: Option<SignedTokenBadge>,
}

impl VerifiedAccessToken {
    pub fn new(user_badge: UserBadge) -> Self {
        Self {
            user_badge,
            claim_key: "sub".to_string(),
            signed: None,
        }
    }
}

/// Verifies raw access tokens.
pub trait AccessTokenHandler: Send + Sync {
    fn verify(&self, raw_token: &str) -> Result<VerifiedAccessToken, AuthenticationError>;
}

/// `Authorization: <type> <token>` with the RFC 6750 token character set.
pub struct HeaderAccessTokenExtractor {
    header: String,
    token_type: String,
}

impl HeaderAccessTokenExtractor {
    pub fn new(header: &str, token_type: &str) -> Self {
        Self {
            header: header.to_ascii_lowercase(),
            token_type: token_type.to_string(),
        }
    }

    pub fn bearer() -> Self {
        Self::new(header::AUTHORIZATION.as_str(), "Bearer")
    }
}

/// `1*( ALPHA / DIGIT / "-" / "." / "_" / "~" / "+" / "/" ) *"="`
fn is_b64token(token: &str) -> bool {
    let body = token.trim_end_matches('=');
    !body.is_empty()
        && body
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~' | '+' | '/'))
}

impl AccessTokenExtractor for HeaderAccessTokenExtractor {
    fn extract(&self, request: &Request) -> Option<String> {
        let value = request.header(&self.header)?;
        let rest = value.strip_prefix(self.token_type.as_str())?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let token = rest.trim_start();
        is_b64token(token).then(|| token.to_string())
    }
}

/// `?access_token=...`
pub struct QueryAccessTokenExtractor {
    parameter: String,
}

impl QueryAccessTokenExtractor {
    pub fn new(parameter: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
        }
    }
}

impl Default for QueryAccessTokenExtractor {
    fn default() -> Self {
        Self::new("access_token")
    }
}

impl AccessTokenExtractor for QueryAccessTokenExtractor {
    fn extract(&self, request: &Request) -> Option<String> {
        request
            .query
            .get(&self.parameter)
            .filter(|t| !t.is_empty())
            .cloned()
    }
}

/// `access_token` field of a urlencoded POST body.
pub struct FormEncodedBodyExtractor {
    parameter: String,
}

impl FormEncodedBodyExtractor {
    pub fn new(parameter: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
        }
    }
}

impl Default for FormEncodedBodyExtractor {
    fn default() -> Self {
        Self::new("access_token")
    }
}

impl AccessTokenExtractor for FormEncodedBodyExtractor {
    fn extract(&self, request: &Request) -> Option<String> {
        if request.method != Method::POST {
            return None;
        }
        request
            .form()
            .remove(&self.parameter)
            .filter(|t| !t.is_empty())
    }
}

/// Tries extractors in order, first hit wins.
pub struct ChainAccessTokenExtractor {
    extractors: Vec<Arc<dyn AccessTokenExtractor>>,
}

impl ChainAccessTokenExtractor {
    pub fn new(extractors: Vec<Arc<dyn AccessTokenExtractor>>) -> Self {
        Self { extractors }
    }
}

impl AccessTokenExtractor for ChainAccessTokenExtractor {
    fn extract(&self, request: &Request) -> Option<String> {
        self.extractors.iter().find_map(|e| e.extract(request))
    }
}

/// Build an extractor from configured names.
pub fn extractor_from_names(
    names: &[String],
) -> Result<Arc<dyn AccessTokenExtractor>, String> {
    let mut extractors: Vec<Arc<dyn AccessTokenExtractor>> = Vec::new();
    for name in names {
        let extractor: Arc<dyn AccessTokenExtractor> = match name.as_str() {
            "header" => Arc::new(HeaderAccessTokenExtractor::bearer()),
            "query_string" => Arc::new(QueryAccessTokenExtractor::default()),
            "request_body" => Arc::new(FormEncodedBodyExtractor::default()),
            other => return Err(format!("unknown access token extractor \"{}\"", other)),
        };
        extractors.push(extractor);
    }

    match extractors.len() {
        0 => Ok(Arc::new(HeaderAccessTokenExtractor::bearer())),
        1 => Ok(extractors.remove(0)),
        _ => Ok(Arc::new(ChainAccessTokenExtractor::new(extractors))),
    }
}

pub struct AccessTokenAuthenticator {
    extractor: Arc<dyn AccessTokenExtractor>,
    handler: Arc<dyn AccessTokenHandler>,
    user_provider: Option<Arc<dyn UserProvider>>,
    realm: Option<String>,
}

impl AccessTokenAuthenticator {
    pub fn new(
        extractor: Arc<dyn AccessTokenExtractor>,
        handler: Arc<dyn AccessTokenHandler>,
        user_provider: Option<Arc<dyn UserProvider>>,
        realm: Option<String>,
    ) -> Self {
        Self {
            extractor,
            handler,
            user_provider,
            realm,
        }
    }

    fn challenge(&self, error: Option<&AuthenticationError>) -> String {
        let mut parts = Vec::new();
        if let Some(realm) = &self.realm {
            parts.push(format!("realm=\"{}\"", realm));
        }
        if let Some(error) = error {
            parts.push("error=\"invalid_token\"".to_string());
            parts.push(format!(
                "error_description=\"{}\"",
                error.to_string().replace('"', "'")
            ));
        }

        if parts.is_empty() {
            "Bearer".to_string()
        } else {
            format!("Bearer {}", parts.join(", "))
        }
    }
}

impl Authenticator for AccessTokenAuthenticator {
    fn key(&self) -> &str {
        "access_token"
    }

    fn priority(&self) -> i32 {
        -40
    }

    fn supports(&self, request: &mut Request) -> Supports {
        // explicit No lets other authenticators run when there is no token
        match self.extractor.extract(request) {
            Some(_) => Supports::Maybe,
            None => Supports::No,
        }
    }

    fn authenticate(&self, request: &mut Request) -> ShieldResult<Passport> {
        let raw = self
            .extractor
            .extract(request)
            .ok_or_else(|| AuthenticationError::BadCredentials("Invalid credentials.".to_string()))?;

        let verified = self.handler.verify(&raw)?;
        let mut user_badge = verified.user_badge;

        if !user_badge.has_loader() || user_badge.has_fallback_loader() {
            if let Some(provider) = &self.user_provider {
                user_badge.set_loader(provider_loader(provider.clone()));
            }
        }

        let mut token_badge = TokenBadge::new(raw, verified.claim_key);
        token_badge.mark_resolved();

        let mut passport = Passport::self_validating(user_badge);
        passport.add_badge(token_badge)?;
        if let Some(signed) = verified.signed {
            passport.add_badge(signed)?;
        }
        Ok(passport)
    }

    fn on_authentication_success(
        &self,
        _request: &mut Request,
        _token: &Token,
        _firewall_name: &str,
    ) -> ShieldResult<Option<Response>> {
        Ok(None)
    }

    fn on_authentication_failure(
        &self,
        _request: &mut Request,
        error: &AuthenticationError,
    ) -> ShieldResult<Option<Response>> {
        Ok(Some(
            Response::json(StatusCode::UNAUTHORIZED, &failure_body(error))
                .with_header(header::WWW_AUTHENTICATE.as_str(), &self.challenge(Some(error))),
        ))
    }

    fn entry_point(&self) -> Option<&dyn AuthenticationEntryPoint> {
        Some(self)
    }
}

impl AuthenticationEntryPoint for AccessTokenAuthenticator {
    fn start(&self, _request: &mut Request, _error: Option<&AuthenticationError>) -> Response {
        Response::new(StatusCode::UNAUTHORIZED)
            .with_header(header::WWW_AUTHENTICATE.as_str(), &self.challenge(None))
    }
}
