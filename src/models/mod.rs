//! Data models representing database entities.
//!
//! This module contains all data structures that map to database tables.

pub mod blacklist;
pub mod blog;
pub mod cms;
pub mod link;
/// Mailing messages, lists and audience criteria
pub mod message;
pub mod page;
/// Browser sessions
pub mod session;
pub mod tracker;
/// Site users
pub mod user;
