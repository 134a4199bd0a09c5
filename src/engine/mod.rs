//! Request processing engine for Shield Guard.
//!
//! - Authenticator manager: runs the authenticators of a firewall
//! - Firewall listeners: session context, authentication, logout, access control
//! - Firewalls and the firewall map
//! - Entry point resolution and the denial responder

mod entry_point;
mod firewall;
mod listeners;
mod manager;
mod responder;

pub use entry_point::*;
pub use firewall::*;
pub use listeners::*;
pub use manager::*;
pub use responder::*;
