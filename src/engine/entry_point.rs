//! Selection of the entry point of a firewall.

use std::sync::Arc;

use crate::auth::{AuthenticationEntryPoint, Authenticator};
use crate::error::{AuthenticationError, ConfigurationError};
use crate::request::{Request, Response};
use crate::services::ServiceRegistry;

/// The component answering "please authenticate" for a firewall.
#[derive(Clone)]
pub enum EntryPoint {
    /// An authenticator with the entry point capability.
    Authenticator(Arc<dyn Authenticator>),
    /// A registered entry point service.
    Service(Arc<dyn AuthenticationEntryPoint>),
}

impl EntryPoint {
    pub fn start(&self, request: &mut Request, error: Option<&AuthenticationError>) -> Option<Response> {
        match self {
            EntryPoint::Authenticator(authenticator) => authenticator
                .entry_point()
                .map(|entry_point| entry_point.start(request, error)),
            EntryPoint::Service(entry_point) => Some(entry_point.start(request, error)),
        }
    }

    /// Authenticator key, or `None` for a service.
    pub fn key(&self) -> Option<&str> {
        match self {
            EntryPoint::Authenticator(authenticator) => Some(authenticator.key()),
            EntryPoint::Service(_) => None,
        }
    }
}

impl std::fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryPoint::Authenticator(a) => f.debug_tuple("Authenticator").field(&a.key()).finish(),
            EntryPoint::Service(_) => f.write_str("Service"),
        }
    }
}

/// Pick the entry point of `firewall`.
///
/// Without an explicit choice the single authenticator offering an entry
/// point is used; several of them are ambiguous. An explicit choice names
/// an authenticator key of the firewall or an entry point service.
pub fn resolve_entry_point(
    firewall: &str,
    authenticators: &[Arc<dyn Authenticator>],
    explicit: Option<&str>,
    registry: &ServiceRegistry,
) -> Result<Option<EntryPoint>, ConfigurationError> {
    if let Some(id) = explicit {
        if let Some(authenticator) = authenticators.iter().find(|a| a.key() == id) {
            if authenticator.entry_point().is_none() {
                return Err(ConfigurationError::IncompatibleService {
                    id: id.to_string(),
                    expected: "AuthenticationEntryPoint",
                });
            }
            return Ok(Some(EntryPoint::Authenticator(authenticator.clone())));
        }
        if registry.contains(id) {
            return Ok(Some(EntryPoint::Service(registry.entry_point(id)?)));
        }
        return Err(ConfigurationError::UnknownEntryPoint {
            firewall: firewall.to_string(),
            entry_point: id.to_string(),
        });
    }

    let candidates: Vec<&Arc<dyn Authenticator>> = authenticators
        .iter()
        .filter(|a| a.entry_point().is_some())
        .collect();

    match candidates.as_slice() {
        [] => Ok(None),
        [only] => Ok(Some(EntryPoint::Authenticator((*only).clone()))),
        _ => Err(ConfigurationError::AmbiguousEntryPoint {
            firewall: firewall.to_string(),
            candidates: candidates.iter().map(|a| a.key().to_string()).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AnonymousAuthenticator, FormLoginAuthenticator, HttpBasicAuthenticator};
    use crate::config::FormLoginConfig;
    use crate::services::Service;
    use axum::http::StatusCode;

    struct Forbidden;

    impl AuthenticationEntryPoint for Forbidden {
        fn start(&self, _request: &mut Request, _error: Option<&AuthenticationError>) -> Response {
            Response::new(StatusCode::FORBIDDEN)
        }
    }

    fn anonymous() -> Arc<dyn Authenticator> {
        Arc::new(AnonymousAuthenticator)
    }

    fn basic() -> Arc<dyn Authenticator> {
        Arc::new(HttpBasicAuthenticator::new("Secured Area"))
    }

    fn form() -> Arc<dyn Authenticator> {
        Arc::new(FormLoginAuthenticator::new(FormLoginConfig::default()))
    }

    #[test]
    fn test_no_candidate_means_no_entry_point() {
        let resolved =
            resolve_entry_point("main", &[anonymous()], None, &ServiceRegistry::new())
                .unwrap();
        assert!(resolved.is_none());
    }

    #[test]
    fn test_single_candidate_is_selected() {
        let resolved =
            resolve_entry_point("main", &[anonymous(), basic()], None, &ServiceRegistry::new())
                .unwrap()
                .unwrap();
        assert_eq!(resolved.key(), Some("http_basic"));

        let response = resolved.start(&mut Request::get("/"), None).unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_several_candidates_need_explicit_choice() {
        let err = resolve_entry_point("main", &[form(), basic()], None, &ServiceRegistry::new())
            .unwrap_err();
        let ConfigurationError::AmbiguousEntryPoint { candidates, .. } = &err else {
            panic!("expected an ambiguity error");
        };
        assert_eq!(candidates, &vec!["form_login".to_string(), "http_basic".to_string()]);
        assert!(err.to_string().contains("\"form_login\""));

        let resolved =
            resolve_entry_point("main", &[form(), basic()], Some("http_basic"), &ServiceRegistry::new())
                .unwrap()
                .unwrap();
        assert_eq!(resolved.key(), Some("http_basic"));
    }

    #[test]
    fn test_explicit_service() {
        let registry = ServiceRegistry::new().with("forbidden", Service::EntryPoint(Arc::new(Forbidden)));
        let resolved = resolve_entry_point("main", &[form(), basic()], Some("forbidden"), &registry)
            .unwrap()
            .unwrap();

        assert!(resolved.key().is_none());
        let response = resolved.start(&mut Request::get("/"), None).unwrap();
        assert_eq!(response.status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_explicit_choice_errors() {
        let registry = ServiceRegistry::new();
        assert!(matches!(
            resolve_entry_point("main", &[anonymous()], Some("anonymous"), &registry),
            Err(ConfigurationError::IncompatibleService { .. })
        ));
        assert!(matches!(
            resolve_entry_point("main", &[basic()], Some("nowhere"), &registry),
            Err(ConfigurationError::UnknownEntryPoint { .. })
        ));
    }
}
