//! The contact form.
//!
//! A POST can do any of:
//! - subscribe the sender to a mailing list (`list` or `optin`)
//! - send them a stored message (`message`)
//! - notify the site contacts (`contact`, or always with
//!   `contact.always_notify`), optionally followed by an auto responder
//!
//! and then redirects to `redirect` or `/message`.

use super::context::{Output, PageContext, Params};
use crate::{
    config::Configuration,
    error::AppError,
    models::{message, tracker, user::NameParts, user::User},
    services::{mailer::Mailer, recaptcha},
    view::{
        field::{self, FieldOptions},
        html::escape,
        language::translate,
    },
};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex")
});

/// Form fields that are not repeated in the notification body.
const EXCLUDED_FIELDS: &[&str] = &[
    "token",
    "name",
    "email",
    "message",
    "contact",
    "success",
    "list",
    recaptcha::RESPONSE_FIELD,
    "captcha_abide",
];

pub async fn handle(ctx: &mut PageContext, method: &str) -> Result<Output, AppError> {
    match method {
        "get" => get(ctx).await,
        "post" => post(ctx).await,
        _ => Err(AppError::MethodNotAvailable),
    }
}

async fn get(ctx: &mut PageContext) -> Result<Output, AppError> {
    let token = ctx.ensure_session().await?.token.clone();
    let recaptcha_public = ctx
        .state
        .config
        .get_str("recaptcha.public")
        .unwrap_or_default()
        .to_string();
    let submitted = ctx.form.to_map();

    let mut html = String::from("<form method=\"post\" action=\"/contact\" class=\"contact\">");
    html.push_str(&field::render_markup(
        &FieldOptions {
            value: token,
            ..FieldOptions::new("hidden", "token")
        },
        "",
    ));
    html.push_str(&field::render_markup(
        &FieldOptions::new("hidden", "contact"),
        "",
    ));
    for (name, label, field_type, required) in [
        ("name", "Name", "text", false),
        ("email", "Email", "email", true),
    ] {
        html.push_str(&field::render_markup(
            &FieldOptions {
                label: label.to_string(),
                required,
                value: submitted.get(name).cloned().unwrap_or_default(),
                ..FieldOptions::new(field_type, name)
            },
            "",
        ));
    }
    html.push_str(&format!(
        "<div><label>Message<textarea name=\"message\">{}</textarea></label></div>",
        field::default_value(&submitted, "message", "")
    ));
    if captcha_required(&ctx.state.config, true) {
        html.push_str(&field::render_markup(
            &FieldOptions {
                value: "lightning.contact.submit".to_string(),
                ..FieldOptions::new("invisibleRecaptcha", "")
            },
            &recaptcha_public,
        ));
    }
    html.push_str(&field::render_markup(
        &FieldOptions {
            value: "Send".to_string(),
            class: "button".to_string(),
            ..FieldOptions::new("submit", "")
        },
        "",
    ));
    html.push_str("</form>");

    ctx.template.content = html;
    Ok(Output::Page)
}

/// `contact.require_captcha` is `true` or `"contact_only"`.
fn captcha_required(config: &Configuration, contact: bool) -> bool {
    match config.get("contact.require_captcha") {
        Some(Value::Bool(required)) => *required,
        Some(Value::String(mode)) => mode == "contact_only" && contact,
        _ => false,
    }
}

fn valid_email(email: &str) -> bool {
    EMAIL.is_match(email)
}

/// Name from `name`, or from `first` and `last`.
fn sender_name(form: &Params) -> NameParts {
    match form.get_text("name") {
        Some(name) => NameParts::from_full_name(name),
        None => NameParts {
            first: form.get_text("first").unwrap_or_default().to_string(),
            last: form.get_text("last").unwrap_or_default().to_string(),
        },
    }
}

/// Only local paths are accepted as a redirect target.
fn redirect_target(form: &Params) -> String {
    form.get_text("redirect")
        .filter(|url| url.starts_with('/') && !url.starts_with("//"))
        .unwrap_or("/message")
        .to_string()
}

/// The notification sent to the site contacts: name, email, IP, every
/// other submitted field, then the message.
pub fn message_body(form: &Params, email: &str, ip: &str) -> String {
    let mut values: Vec<(String, String)> = vec![
        ("Name".into(), form.get("name").unwrap_or_default().to_string()),
        ("Email".into(), email.to_string()),
        ("IP".into(), ip.to_string()),
    ];

    for name in form.names() {
        if EXCLUDED_FIELDS.contains(&name) {
            continue;
        }
        let input = if form.is_list(name) {
            serde_json::to_string(&form.get_all(name)).unwrap_or_default()
        } else {
            form.get(name).unwrap_or_default().to_string()
        };
        values.push((field_label(name), input));
    }

    let mut output = String::new();
    for (key, value) in values {
        output.push_str(&format!("{}: {}<br>\n", escape(&key), escape(&value)));
    }
    output.push_str("Message: <br>\n");
    output.push_str(&escape(form.get("message").unwrap_or_default()));
    output
}

/// `first_name` → `First name`.
fn field_label(name: &str) -> String {
    let name = name.replace('_', " ");
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// A custom `success` text when allowed, nothing when `success` was posted
/// empty or disallowed, else the default.
fn success_message(config: &Configuration, form: &Params, default: &str) -> Option<String> {
    if config.get_bool("contact.custom_message") {
        if let Some(custom) = form.get_text("success") {
            return Some(custom.to_string());
        }
    }
    if form.contains("success") {
        return None;
    }
    Some(default.to_string())
}

async fn post(ctx: &mut PageContext) -> Result<Output, AppError> {
    let state = ctx.state.clone();
    let config = &state.config;
    let pool = &state.pool;

    let contact = ctx.form.get_bool("contact");
    if captcha_required(config, contact) {
        let secret = config.get_str("recaptcha.private").unwrap_or_default();
        let passed = recaptcha::verify(
            &state.http,
            secret,
            ctx.post(recaptcha::RESPONSE_FIELD),
            &ctx.ip,
        )
        .await?;
        if !passed {
            ctx.error(translate("captcha_failed", &[]));
            return get(ctx).await;
        }
    }

    let Some(email) = ctx
        .form
        .get_text("email")
        .filter(|email| valid_email(email))
        .map(str::to_string)
    else {
        ctx.error(translate("invalid_email", &[]));
        return get(ctx).await;
    };
    let user = User::add_user(pool, &email, &sender_name(&ctx.form)).await?;

    // Opt in.
    let mut list = None;
    if let Some(list_id) = ctx.request_int("list").filter(|id| *id > 0) {
        list = Some(if message::validate_list_id(pool, list_id).await? {
            list_id
        } else {
            message::get_default_list_id(pool).await?
        });
    }
    if list.is_none() && ctx.form.get_bool("optin") {
        list = Some(message::get_default_list_id(pool).await?);
    }
    if let Some(list_id) = list {
        user.subscribe(pool, list_id).await?;
    }

    // A stored message for the sender.
    if let Some(message_id) = ctx.form.get_int("message").filter(|id| *id > 0) {
        Mailer::new(&state).send_one(message_id, user.clone()).await?;
    }

    let redirect = redirect_target(&ctx.form);

    let notify = config.get_bool("contact.always_notify")
        || (contact && config.get_bool("contact.contact"));
    if !notify {
        if let Some(text) = success_message(config, &ctx.form, &translate("optin.success", &[])) {
            ctx.message(text);
        }
        return ctx.redirect(&redirect).await;
    }

    let sent = send_notification(ctx, &user).await?;
    let session_id = ctx.session.as_ref().map(|s| s.session_id).unwrap_or_default();
    tracker::track_event(pool, tracker::CONTACT_SENT, 0, user.user_id, session_id).await?;
    if !sent {
        ctx.error(translate("send_failed", &[]));
        return get(ctx).await;
    }

    let mut default = translate("contact_sent", &[]);
    if let Some(auto_responder) = config.get_i64("contact.auto_responder").filter(|id| *id > 0) {
        let recipient = User::load_by_email(pool, &email)
            .await?
            .unwrap_or_else(|| User::transient(&email));
        let responded = Mailer::new(&state).send_one(auto_responder, recipient).await?;
        if responded && config.get_bool("contact.spam_test") {
            default = translate("spam_test", &[]);
        }
    }
    if let Some(text) = success_message(config, &ctx.form, &default) {
        ctx.message(text);
    }
    ctx.redirect(&redirect).await
}

/// Mail the submission to every address in `contact.to`, in the site mail
/// template.
async fn send_notification(ctx: &PageContext, user: &User) -> Result<bool, AppError> {
    let config = &ctx.state.config;
    let recipients: Vec<String> = match config.get("contact.to") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(to)) => vec![to.clone()],
        _ => Vec::new(),
    };
    if recipients.is_empty() {
        tracing::warn!("contact.to is empty, notification not sent");
        return Ok(false);
    }

    Mailer::new(&ctx.state)
        .reply_to(&user.email)
        .send_custom(
            config.get_str("contact.subject").unwrap_or_default(),
            &message_body(&ctx.form, &user.email, &ctx.ip),
            &recipients,
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn body_lists_extra_fields_and_skips_known_ones() {
        let form = Params::parse(
            "token=abc&name=Ada+Lovelace&email=ada%40example.com&phone_number=555&topics%5B%5D=a&topics%5B%5D=b&contact=1&message=Hello+%3Cthere%3E",
        );
        let body = message_body(&form, "ada@example.com", "203.0.113.9");
        assert_eq!(
            body,
            "Name: Ada Lovelace<br>\nEmail: ada@example.com<br>\nIP: 203.0.113.9<br>\n\
             Phone number: 555<br>\nTopics: [&quot;a&quot;,&quot;b&quot;]<br>\n\
             Message: <br>\nHello &lt;there&gt;"
        );
    }

    #[test]
    fn captcha_modes() {
        let config = |value: Value| {
            Configuration::from_value(json!({ "contact": { "require_captcha": value } }))
        };
        assert!(captcha_required(&config(json!(true)), false));
        assert!(!captcha_required(&config(json!(false)), true));
        assert!(captcha_required(&config(json!("contact_only")), true));
        assert!(!captcha_required(&config(json!("contact_only")), false));
    }

    #[test]
    fn success_message_rules() {
        let custom = Configuration::from_value(json!({ "contact": { "custom_message": true } }));
        let plain = Configuration::from_value(json!({ "contact": { "custom_message": false } }));
        let with_success = Params::parse("success=Thanks%21");
        let empty_success = Params::parse("success=");

        assert_eq!(
            success_message(&custom, &with_success, "Default").as_deref(),
            Some("Thanks!")
        );
        assert_eq!(success_message(&plain, &with_success, "Default"), None);
        assert_eq!(success_message(&custom, &empty_success, "Default"), None);
        assert_eq!(
            success_message(&plain, &Params::default(), "Default").as_deref(),
            Some("Default")
        );
    }

    #[test]
    fn sender_and_redirect() {
        let form = Params::parse("first=Ada&last=Lovelace&redirect=%2F%2Fevil.com");
        assert_eq!(
            sender_name(&form),
            NameParts {
                first: "Ada".into(),
                last: "Lovelace".into()
            }
        );
        assert_eq!(redirect_target(&form), "/message");
        assert_eq!(redirect_target(&Params::parse("redirect=%2Fthanks")), "/thanks");
        assert!(valid_email("a@b.co"));
        assert!(!valid_email("not an email"));
        assert_eq!(field_label("phone_number"), "Phone number");
    }
}
