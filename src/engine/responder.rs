//! Mapping of denied requests to responses.

use axum::http::StatusCode;

use crate::error::{AuthenticationError, ErrorResponse};
use crate::request::{Request, Response};

/// Why a firewall stopped a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// Authentication is needed, or failed.
    Unauthenticated(Option<AuthenticationError>),
    /// Authenticated, but not allowed.
    AccessDenied,
}

/// Turns a denial into a response when no entry point handles it.
pub trait Responder: Send + Sync {
    fn respond(&self, request: &Request, denial: &Denial) -> Response;
}

/// `401` or `403` with a JSON error body.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultResponder;

impl Responder for DefaultResponder {
    fn respond(&self, _request: &Request, denial: &Denial) -> Response {
        let (status, body) = match denial {
            Denial::Unauthenticated(Some(error)) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse {
                    error: error.to_string(),
                    code: error.code().to_string(),
                    details: None,
                },
            ),
            Denial::Unauthenticated(None) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse {
                    error: "Full authentication is required to access this resource.".to_string(),
                    code: "UNAUTHENTICATED".to_string(),
                    details: None,
                },
            ),
            Denial::AccessDenied => (
                StatusCode::FORBIDDEN,
                ErrorResponse {
                    error: "Access denied.".to_string(),
                    code: "ACCESS_DENIED".to_string(),
                    details: None,
                },
            ),
        };

        let body = serde_json::to_value(&body).unwrap_or_default();
        Response::json(status, &body)
    }
}
