//! Domain types for Shield Guard.
//!
//! Users, the providers that load them, and the tokens representing an
//! authenticated identity.

mod token;
mod user;

pub use token::*;
pub use user::*;
