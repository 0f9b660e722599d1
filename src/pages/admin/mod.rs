//! Admin pages. Every page here requires the `all` permission.

pub mod cms;
pub mod mailing;
pub mod table;
