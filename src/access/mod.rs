//! Authorization: voters, strategies and the access decision manager.

mod decision;
mod strategy;
mod voter;

pub use decision::*;
pub use strategy::*;
pub use voter::*;
