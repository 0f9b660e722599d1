//! HTTP middleware components.
//!
//! Middleware are functions that run before route handlers.
//! They can:
//! - Load the client's session and user
//! - Short-circuit requests (reject unauthorized)

/// Session cookie middleware
pub mod session;
