//! Demo HTTP API protected by the security middleware.
//!
//! Provides endpoints exposing the authenticated user and issuing
//! credentials (JWTs, login links) for it.

pub mod handlers;
mod routes;
mod types;

pub use routes::{build_router, ApiState};
pub use types::*;
