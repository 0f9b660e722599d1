//! HTML rendering helpers: variable markup, form fields, translations and the
//! site layout.

pub mod field;
pub mod html;
pub mod language;
pub mod markup;
pub mod template;
