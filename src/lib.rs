//! Shield Guard: firewall-based authentication and access control.
//!
//! A request is matched to a firewall whose listeners restore the session
//! token, run the configured authenticators and enforce access rules:
//!
//! - `passport`: badges and the passport an authenticator produces
//! - `auth`: authenticators and their collaborators
//! - `event`: security events, badge checkers and event bubbling
//! - `engine`: authenticator manager, firewalls and entry points
//! - `access`: voters, strategies and the access decision manager
//! - `security`: the facade built from configuration
//! - `middleware`: the axum bridge

pub mod access;
pub mod api;
pub mod auth;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod event;
pub mod logging;
pub mod middleware;
pub mod passport;
pub mod request;
pub mod security;
pub mod services;

pub use error::{AuthenticationError, ConfigurationError, ShieldError, ShieldResult};
pub use security::Security;
pub use services::{Service, ServiceRegistry};
