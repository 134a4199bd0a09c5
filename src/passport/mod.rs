//! Passports and badges.
//!
//! An authenticator answers a request with a `Passport`: exactly one
//! `UserBadge` resolving the user, plus badges carrying credentials or state
//! that independent checkers validate.

mod badge;
#[allow(clippy::module_inception)]
mod passport;

pub use badge::*;
pub use passport::*;
