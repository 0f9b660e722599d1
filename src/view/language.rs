//! User-facing strings.

/// Look up a translation and apply `{TOKEN}` replacements.
///
/// Unknown keys are returned as-is so a missing string is visible rather than
/// blank.
pub fn translate(key: &str, replacements: &[(&str, &str)]) -> String {
    let text = match key {
        "unsubscribe" => {
            "You are receiving this email because you subscribed to our mailing list. \
             <a href=\"{LINK}\">Unsubscribe</a>"
        }
        "unsubscribed" => "You have been unsubscribed from all mailing lists.",
        "invalid_token" => "Invalid token. Please reload the page and try again.",
        "access_denied" => "Access denied.",
        "contact_sent" => "Your message has been sent. We will get back to you soon.",
        "spam_test" => {
            "Your message has been sent. Please check your junk folder for our reply and mark it as not spam."
        }
        "optin.success" => "You have been subscribed.",
        "captcha_failed" => "You did not correctly enter the captcha code.",
        "invalid_email" => "Please enter a valid email address.",
        "send_failed" => "Your message could not be sent. Please try again later",
        "signed_in" => "You are now signed in.",
        "logged_out" => "You have been logged out.",
        "saved" => "Saved.",
        "deleted" => "Deleted.",
        other => other,
    };

    replacements
        .iter()
        .fold(text.to_string(), |acc, (token, value)| acc.replace(token, value))
}
