//! HTTP request handlers outside the page front controller.
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (query string, form body, session context)
//! 2. Performs its work (database ping, file browser command)
//! 3. Returns a JSON or raw response
/// File browser connector
pub mod elfinder;
pub mod health;
