//! Security events and their listeners.
//!
//! Each firewall owns an `EventDispatcher`. Listeners registered on the
//! process-wide dispatcher also observe the bubbled event kinds of every
//! firewall.

mod dispatcher;
mod events;
mod listeners;

pub use dispatcher::*;
pub use events::*;
pub use listeners::*;
