//! Services that talk to the outside world.
//!
//! Services wrap outbound delivery and verification (mail relay, reCAPTCHA)
//! so pages only deal with the result.

pub mod mailer;
pub mod recaptcha;
