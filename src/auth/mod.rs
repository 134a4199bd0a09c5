//! Authentication methods for Shield Guard.
//!
//! Every method implements `Authenticator`:
//! - HTTP Basic and access tokens (JWT, API keys) for API clients
//! - Form and JSON logins for interactive users
//! - X.509 and `REMOTE_USER` for identities established upstream
//! - Remember-me cookies, login links and anonymous visitors
//!
//! The collaborators they rely on (password hasher, CSRF tokens, signed
//! cookies and links) live here as well.

mod access_token;
mod anonymous;
mod api_key;
mod authenticator;
mod csrf;
mod form_login;
mod handlers;
mod hasher;
mod http_basic;
mod json_login;
mod jwt;
mod login_link;
mod pre_authenticated;
mod remember_me;
mod signature;

pub use access_token::*;
pub use anonymous::*;
pub use api_key::*;
pub use authenticator::*;
pub use csrf::*;
pub use form_login::*;
pub use handlers::*;
pub use hasher::*;
pub use http_basic::*;
pub use json_login::*;
pub use jwt::*;
pub use login_link::*;
pub use pre_authenticated::*;
pub use remember_me::*;
pub use signature::*;
