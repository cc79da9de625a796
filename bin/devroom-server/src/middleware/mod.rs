//! HTTP middleware stack: bearer auth, CORS and per-request trace ids.

pub mod auth;
pub mod cors;
pub mod trace;

pub use auth::{AuthUser, require_user};
