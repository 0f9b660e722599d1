//! Google reCAPTCHA rendering and verification.

use crate::error::AppError;
use serde::Deserialize;

const VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

/// Form field the widget posts its response in.
pub const RESPONSE_FIELD: &str = "g-recaptcha-response";

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Markup for an invisible reCAPTCHA bound to a JS callback.
pub fn render_invisible(site_key: &str, callback: &str, class: &str) -> String {
    format!(
        "<div class=\"g-recaptcha {}\" data-sitekey=\"{}\" data-callback=\"{}\" data-size=\"invisible\"></div>",
        crate::view::html::escape(class),
        crate::view::html::escape(site_key),
        crate::view::html::escape(callback),
    )
}

/// Ask Google whether a widget response is valid.
///
/// A missing response or secret fails verification without a request.
pub async fn verify(
    client: &reqwest::Client,
    secret: &str,
    response: Option<&str>,
    remote_ip: &str,
) -> Result<bool, AppError> {
    let Some(response) = response.filter(|r| !r.is_empty()) else {
        return Ok(false);
    };
    if secret.is_empty() {
        tracing::warn!("reCAPTCHA secret is not configured");
        return Ok(false);
    }

    let result: VerifyResponse = client
        .post(VERIFY_URL)
        .form(&[
            ("secret", secret),
            ("response", response),
            ("remoteip", remote_ip),
        ])
        .send()
        .await?
        .json()
        .await?;

    if !result.success {
        tracing::info!(errors = ?result.error_codes, "reCAPTCHA verification failed");
    }
    Ok(result.success)
}
