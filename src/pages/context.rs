//! Per-request state shared by every page handler.

use crate::{
    error::AppError,
    middleware::session::{ClientContext, session_lifetime},
    models::{session::Session, session::session_cookie, user::User},
    state::AppState,
    view::{language::translate, template::Template},
};
use axum::http::{HeaderValue, Method, StatusCode};
use serde_json::{Value, json};
use std::collections::HashMap;

/// Session setting holding messages for the next rendered page.
const FLASH_SETTING: &str = "messenger";

/// Decoded `application/x-www-form-urlencoded` pairs, in submission order.
///
/// `name[]` fields are looked up by `name`.
#[derive(Debug, Clone, Default)]
pub struct Params(Vec<(String, String)>);

fn base_name(name: &str) -> &str {
    name.strip_suffix("[]").unwrap_or(name)
}

impl Params {
    pub fn parse(raw: &str) -> Self {
        Self(url::form_urlencoded::parse(raw.as_bytes()).into_owned().collect())
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    /// Add pairs after the existing ones. Lookups keep preferring earlier pairs.
    pub fn extend(&mut self, other: Params) {
        self.0.extend(other.0);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// A non-empty value.
    pub fn get_text(&self, name: &str) -> Option<&str> {
        self.get(name).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(|v| v.trim().parse().ok())
    }

    pub fn get_bool(&self, name: &str) -> bool {
        matches!(
            self.get(name).map(|v| v.trim().to_ascii_lowercase()).as_deref(),
            Some("1" | "true" | "on" | "yes")
        )
    }

    /// Every value submitted for `name` or `name[]`.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(key, _)| base_name(key) == name)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(key, _)| base_name(key) == name)
    }

    /// Field names in submission order, without duplicates or `[]`.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (key, _) in &self.0 {
            let name = base_name(key);
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Whether `name` was submitted as a list (`name[]` or repeated).
    pub fn is_list(&self, name: &str) -> bool {
        self.0.iter().any(|(key, _)| key.ends_with("[]") && base_name(key) == name)
            || self.get_all(name).len() > 1
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for (key, value) in &self.0 {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
        map
    }
}

/// What a page handler produced.
#[derive(Debug)]
pub enum Output {
    /// Render the site template.
    Page,
    Redirect(String),
    Json(Value),
    Binary {
        content_type: &'static str,
        body: Vec<u8>,
    },
}

pub struct PageContext {
    pub state: AppState,
    pub method: Method,
    /// Request path without the leading slash.
    pub location: String,
    pub query: Params,
    pub form: Params,
    pub ip: String,
    pub session: Option<Session>,
    pub user: Option<User>,
    pub is_admin: bool,
    pub template: Template,
    pub status: StatusCode,
    cookie: Option<HeaderValue>,
}

impl PageContext {
    pub fn new(
        state: AppState,
        client: ClientContext,
        method: Method,
        location: &str,
        query: Params,
        form: Params,
    ) -> Self {
        let template = Template {
            site_name: state.config.get_str("site.name").unwrap_or_default().to_string(),
            ..Template::default()
        };
        Self {
            state,
            method,
            location: location.trim_matches('/').to_string(),
            query,
            form,
            ip: client.ip,
            session: client.session,
            user: client.user,
            is_admin: client.is_admin,
            template,
            status: StatusCode::OK,
            cookie: None,
        }
    }

    /// Lowercase request verb (`get`, `post`, ...).
    pub fn verb(&self) -> String {
        self.method.as_str().to_ascii_lowercase()
    }

    pub fn is_post(&self) -> bool {
        self.method == Method::POST
    }

    /// Query string parameter.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.query.get(name)
    }

    /// Form body parameter.
    pub fn post(&self, name: &str) -> Option<&str> {
        self.form.get(name)
    }

    /// Form body parameter, falling back to the query string.
    pub fn request(&self, name: &str) -> Option<&str> {
        self.post(name).or_else(|| self.get(name))
    }

    pub fn request_int(&self, name: &str) -> Option<i64> {
        self.form.get_int(name).or_else(|| self.query.get_int(name))
    }

    pub fn token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.token.as_str())
    }

    /// POST requests must echo the session's form token.
    pub fn validate_token(&self) -> bool {
        if !self.is_post() {
            return true;
        }
        match (self.post("token"), self.token()) {
            (Some(posted), Some(expected)) => !posted.is_empty() && posted == expected,
            _ => false,
        }
    }

    /// The current session, created (and its cookie set) if needed.
    pub async fn ensure_session(&mut self) -> Result<&mut Session, AppError> {
        if self.session.is_none() {
            let (session, raw_key) = Session::create(&self.state.pool, &self.ip).await?;
            self.cookie = Some(session_cookie(&raw_key, session_lifetime(&self.state)));
            self.session = Some(session);
        }
        self.session
            .as_mut()
            .ok_or_else(|| AppError::InvalidRequest("Session unavailable".to_string()))
    }

    /// End the session and expire the cookie.
    pub async fn destroy_session(&mut self) -> Result<(), AppError> {
        if let Some(session) = self.session.take() {
            session.destroy(&self.state.pool).await?;
        }
        self.user = None;
        self.is_admin = false;
        self.cookie = Some(session_cookie("", 0));
        Ok(())
    }

    pub fn cookie(&self) -> Option<&HeaderValue> {
        self.cookie.as_ref()
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.template.errors.push(message.into());
    }

    pub fn message(&mut self, message: impl Into<String>) {
        self.template.messages.push(message.into());
    }

    pub fn set_meta(&mut self, field: &str, value: impl Into<String>) {
        self.template.meta.insert(field.to_string(), value.into());
    }

    /// Redirect, carrying the current messages and errors to the next page.
    pub async fn redirect(&mut self, url: &str) -> Result<Output, AppError> {
        if !self.template.messages.is_empty() || !self.template.errors.is_empty() {
            let flash = json!({
                "messages": std::mem::take(&mut self.template.messages),
                "errors": std::mem::take(&mut self.template.errors),
            });
            let pool = self.state.pool.clone();
            self.ensure_session()
                .await?
                .set_setting(&pool, FLASH_SETTING, flash)
                .await?;
        }
        Ok(Output::Redirect(url.to_string()))
    }

    /// Pull messages stored by a previous redirect, and `msg`/`err` language
    /// keys from the query string.
    pub async fn load_messages(&mut self) -> Result<(), AppError> {
        let flash = self
            .session
            .as_ref()
            .and_then(|s| s.get_setting(FLASH_SETTING))
            .cloned();
        if let Some(flash) = flash {
            for (field, target) in [("errors", &mut self.template.errors), ("messages", &mut self.template.messages)] {
                if let Some(items) = flash.get(field).and_then(Value::as_array) {
                    target.extend(items.iter().filter_map(Value::as_str).map(str::to_string));
                }
            }
            let pool = self.state.pool.clone();
            if let Some(session) = self.session.as_mut() {
                session.set_setting(&pool, FLASH_SETTING, Value::Null).await?;
            }
        }

        for (param, errors) in [("msg", false), ("err", true)] {
            let Some(key) = self.query.get_text(param).map(str::to_string) else {
                continue;
            };
            let text = translate(&key, &[]);
            // Only known keys, so the query string cannot inject text.
            if text != key {
                if errors {
                    self.error(text);
                } else {
                    self.message(text);
                }
            }
        }
        Ok(())
    }
}

/// Append query parameters to a URL.
pub fn with_query(url: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return url.to_string();
    }
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    let glue = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, glue, query)
}

/// `verb` + `action` → handler name: `("post", "save-image")` → `post_save_image`.
pub fn convert_function_name(verb: &str, action: &str) -> String {
    let action: String = action
        .trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            c => c.to_ascii_lowercase(),
        })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    format!("{}_{}", verb.to_ascii_lowercase(), action)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_actions_to_handler_names() {
        assert_eq!(convert_function_name("post", "save-image"), "post_save_image");
        assert_eq!(convert_function_name("GET", "Unsubscribe"), "get_unsubscribe");
        assert_eq!(convert_function_name("post", "a<b>"), "post_ab");
    }

    #[test]
    fn params_handle_lists_and_types() {
        let params = Params::parse("name=Ada+L&list=3&optin=on&tags%5B%5D=a&tags%5B%5D=b&x=&x=2");
        assert_eq!(params.get("name"), Some("Ada L"));
        assert_eq!(params.get_int("list"), Some(3));
        assert!(params.get_bool("optin"));
        assert!(!params.get_bool("missing"));
        assert_eq!(params.get_all("tags"), vec!["a", "b"]);
        assert!(params.is_list("tags"));
        assert!(params.is_list("x"));
        assert!(!params.is_list("name"));
        assert_eq!(params.get_text("x"), None);
        assert_eq!(params.names(), vec!["name", "list", "optin", "tags", "x"]);
    }

    #[test]
    fn query_is_appended() {
        assert_eq!(with_query("/message", &[]), "/message");
        assert_eq!(with_query("/user", &[("msg", "logged out")]), "/user?msg=logged+out");
        assert_eq!(with_query("/a?b=1", &[("c", "2")]), "/a?b=1&c=2");
    }
}
