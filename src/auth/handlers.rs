//! Default success and failure handlers for interactive logins.

use crate::domain::Token;
use crate::error::AuthenticationError;
use crate::request::{Request, Response};

/// Session key of the last authentication error message.
pub const LAST_ERROR_KEY: &str = "_security.last_error";
/// Session key of the last submitted username.
pub const LAST_USERNAME_KEY: &str = "_security.last_username";
/// Request parameter overriding the redirect after login.
pub const TARGET_PATH_PARAMETER: &str = "_target_path";

/// Session key of the page a firewall redirected away from.
pub fn target_path_key(firewall_name: &str) -> String {
    format!("_security.{}.target_path", firewall_name)
}

/// Redirects to the saved target path or a default one.
#[derive(Debug, Clone)]
pub struct DefaultSuccessHandler {
    default_target_path: String,
    always_use_default_target_path: bool,
}

impl DefaultSuccessHandler {
    pub fn new(default_target_path: impl Into<String>, always_use_default_target_path: bool) -> Self {
        Self {
            default_target_path: default_target_path.into(),
            always_use_default_target_path,
        }
    }

    pub fn on_success(&self, request: &mut Request, token: &Token) -> Response {
        Response::redirect(&self.determine_target(request, token.firewall_name()))
    }

    fn determine_target(&self, request: &mut Request, firewall_name: &str) -> String {
        if self.always_use_default_target_path {
            return self.default_target_path.clone();
        }

        let parameter = request
            .form()
            .remove(TARGET_PATH_PARAMETER)
            .or_else(|| request.query.get(TARGET_PATH_PARAMETER).cloned())
            .filter(|p| is_local_path(p));
        if let Some(target) = parameter {
            return target;
        }

        let key = target_path_key(firewall_name);
        if let Some(saved) = request
            .session_mut()
            .and_then(|s| s.remove(&key))
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|p| is_local_path(p))
        {
            return saved;
        }

        self.default_target_path.clone()
    }
}

/// Stores the failure in the session and redirects back to the form.
#[derive(Debug, Clone)]
pub struct DefaultFailureHandler {
    failure_path: String,
}

impl DefaultFailureHandler {
    pub fn new(failure_path: impl Into<String>) -> Self {
        Self {
            failure_path: failure_path.into(),
        }
    }

    pub fn on_failure(&self, request: &mut Request, error: &AuthenticationError) -> Response {
        if let Some(session) = request.session_mut() {
            session.set(LAST_ERROR_KEY, error.to_string());
        }
        Response::redirect(&self.failure_path)
    }
}

/// Only same-site paths are accepted as redirect targets.
///
/// Browsers treat `\` like `/`, so `/\host` is protocol-relative too.
fn is_local_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.first() == Some(&b'/')
        && !matches!(bytes.get(1), Some(b'/' | b'\\'))
        && !path.chars().any(char::is_control)
        && url::Url::parse(path).is_err()
}
