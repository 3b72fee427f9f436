//! HTTP surface: handlers, middleware, DTOs, OIDC verification.

pub mod handlers;
pub mod middleware;
pub mod oidc;
pub mod types;
