//! CSRF tokens for interactive logins.

use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::request::Request;

/// Issues and validates CSRF tokens.
pub trait CsrfTokenManager: Send + Sync {
    /// Current token for `token_id`, generated on first use.
    fn get_token(&self, request: &mut Request, token_id: &str) -> Option<String>;

    fn is_token_valid(&self, request: &Request, token_id: &str, value: &str) -> bool;

    fn remove_token(&self, request: &mut Request, token_id: &str);
}

/// Keeps tokens in the session under `_csrf/<token_id>`.
///
/// Without a session no token can be issued and every submission fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionCsrfTokenManager;

fn session_key(token_id: &str) -> String {
    format!("_csrf/{}", token_id)
}

impl CsrfTokenManager for SessionCsrfTokenManager {
    fn get_token(&self, request: &mut Request, token_id: &str) -> Option<String> {
        let session = request.session_mut()?;
        let key = session_key(token_id);
        if let Some(existing) = session.get_str(&key) {
            return Some(existing.to_string());
        }
        let token = Uuid::new_v4().simple().to_string();
        session.set(key, token.clone());
        Some(token)
    }

    fn is_token_valid(&self, request: &Request, token_id: &str, value: &str) -> bool {
        request
            .session
            .as_ref()
            .and_then(|s| s.get_str(&session_key(token_id)))
            .map(|stored| stored.as_bytes().ct_eq(value.as_bytes()).into())
            .unwrap_or(false)
    }

    fn remove_token(&self, request: &mut Request, token_id: &str) {
        if let Some(session) = request.session_mut() {
            session.remove(&session_key(token_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Session;

    #[test]
    fn test_token_roundtrip_through_session() {
        let manager = SessionCsrfTokenManager;
        let mut request = Request::get("/login").with_session(Session::new());

        let token = manager.get_token(&mut request, "authenticate").unwrap();
        assert_eq!(
            manager.get_token(&mut request, "authenticate").as_deref(),
            Some(token.as_str())
        );
        assert!(manager.is_token_valid(&request, "authenticate", &token));
        assert!(!manager.is_token_valid(&request, "authenticate", "forged"));
        assert!(!manager.is_token_valid(&request, "other", &token));

        manager.remove_token(&mut request, "authenticate");
        assert!(!manager.is_token_valid(&request, "authenticate", &token));
    }

    #[test]
    fn test_truncated_token_rejected() {
        let manager = SessionCsrfTokenManager;
        let mut request = Request::get("/login").with_session(Session::new());
        let token = manager.get_token(&mut request, "authenticate").unwrap();

        assert!(!manager.is_token_valid(&request, "authenticate", &token[..token.len() - 1]));
        assert!(!manager.is_token_valid(&request, "authenticate", ""));
    }

    #[test]
    fn test_no_session_no_token() {
        let manager = SessionCsrfTokenManager;
        let mut request = Request::get("/login");
        assert!(manager.get_token(&mut request, "authenticate").is_none());
        assert!(!manager.is_token_valid(&request, "authenticate", "x"));
    }
}
