//! Google sign-in.
//!
//! Two flows are supported:
//!
//! - **ID token**: the browser signs in and posts an ID token. It is checked
//!   with Google's `tokeninfo` endpoint and its audience must be our client ID.
//! - **Authorize**: the browser posts an OAuth access token, which is used to
//!   read the `userinfo` profile.

use crate::{
    config::Configuration,
    db::DbPool,
    error::AppError,
    models::session::Session,
    view::{html::escape, template::Template},
};
use serde::Deserialize;
use serde_json::Value;

pub const NETWORK: &str = "google";
pub const EMAIL_SUFFIX: &str = "google.com";
/// Session setting holding the last token.
pub const SESSION_TOKEN: &str = "google.token";
/// Session setting holding the profile picture URL.
pub const SESSION_IMAGE: &str = "google.image";

const TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";

/// Profile fields shared by `tokeninfo` and `userinfo` responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoogleProfile {
    pub sub: String,
    #[serde(default)]
    pub aud: Option<String>,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

/// Profile data used to create or update the site user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserData {
    pub first: String,
    pub last: String,
    pub alt_email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Google {
    token: String,
    profile: Option<GoogleProfile>,
}

/// Client ID for the web or app integration.
pub fn client_id(config: &Configuration, app: bool) -> &str {
    let path = if app {
        "social.google-app.client_id"
    } else {
        "social.google.client_id"
    };
    config.get_str(path).unwrap_or_default()
}

/// Reject ID tokens issued for another application.
pub fn check_audience(profile: &GoogleProfile, client_id: &str) -> Result<(), AppError> {
    if client_id.is_empty() {
        return Err(AppError::SocialAuth("Google sign-in is not configured".to_string()));
    }
    match profile.aud.as_deref() {
        Some(aud) if aud == client_id => Ok(()),
        _ => Err(AppError::SocialAuth("token was issued for another client".to_string())),
    }
}

impl Google {
    /// Verify a token and load the profile it belongs to.
    ///
    /// # Errors
    ///
    /// `SocialAuth` when Google rejects the token or the audience does not
    /// match, `Upstream` when Google cannot be reached.
    pub async fn create(
        http: &reqwest::Client,
        config: &Configuration,
        token: &str,
        authorize: bool,
        app: bool,
    ) -> Result<Self, AppError> {
        if token.is_empty() {
            return Err(AppError::SocialAuth("missing token".to_string()));
        }

        let request = if authorize {
            http.get(USERINFO_URL).bearer_auth(token)
        } else {
            http.get(TOKENINFO_URL).query(&[("id_token", token)])
        };
        let response = request.send().await?;
        if !response.status().is_success() {
            tracing::info!(status = %response.status(), "Google rejected the token");
            return Err(AppError::SocialAuth("invalid token".to_string()));
        }
        let profile: GoogleProfile = response.json().await?;

        if !authorize {
            check_audience(&profile, client_id(config, app))?;
        }

        Ok(Self::from_profile(token, profile))
    }

    pub fn from_profile(token: &str, profile: GoogleProfile) -> Self {
        Self {
            token: token.to_string(),
            profile: Some(profile),
        }
    }

    pub fn authenticate(&self) -> bool {
        self.profile.as_ref().is_some_and(|p| !p.sub.is_empty())
    }

    pub fn user_data(&self) -> UserData {
        let profile = self.profile.clone().unwrap_or_default();
        UserData {
            first: profile.given_name,
            last: profile.family_name,
            alt_email: profile.email.filter(|email| !email.is_empty()),
        }
    }

    pub fn social_id(&self) -> Option<&str> {
        self.profile.as_ref().map(|p| p.sub.as_str())
    }

    pub fn display_name(&self) -> String {
        self.profile
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_default()
    }

    pub fn image_url(&self) -> Option<&str> {
        self.profile.as_ref().and_then(|p| p.picture.as_deref())
    }

    /// Email used when the profile has none: `<social id>@google.com`.
    pub fn fallback_email(&self) -> Option<String> {
        self.social_id()
            .map(|id| format!("{}@{}", id, EMAIL_SUFFIX))
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Keep the token, and the profile picture when there is one.
    pub async fn store_session_data(
        &self,
        pool: &DbPool,
        session: &mut Session,
    ) -> Result<(), AppError> {
        session
            .set_setting(pool, SESSION_TOKEN, Value::String(self.token.clone()))
            .await?;
        if let Some(image) = self.image_url() {
            session
                .set_setting(pool, SESSION_IMAGE, Value::String(image.to_string()))
                .await?;
        }
        Ok(())
    }
}

/// The sign-in button. Exposes what the browser script needs on `template`.
pub fn login_button(
    template: &mut Template,
    config: &Configuration,
    token: &str,
    authorize: bool,
) -> String {
    template.set_js("token", token);
    template.set_js("social.authorize", authorize);
    template.set_js("social.google.client_id", client_id(config, false));
    "<span class=\"social-signin google\"><i class=\"fa fa-google\"></i><span> Sign in with Google</span></span>"
        .to_string()
}

/// The +1 button, when enabled with `social.google.like`.
pub fn render_links(config: &Configuration) -> Option<String> {
    config.get_bool("social.google.like").then(|| {
        format!(
            "<script src=\"{}\" async defer></script><g:plusone size=\"medium\" annotation=\"none\"></g:plusone>",
            escape("https://apis.google.com/js/platform.js")
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile() -> GoogleProfile {
        serde_json::from_value(json!({
            "sub": "1234",
            "aud": "client.apps.googleusercontent.com",
            "given_name": "Ada",
            "family_name": "Lovelace",
            "name": "Ada Lovelace",
            "email": "ada@example.com",
            "picture": "https://example.com/ada.png",
            "email_verified": "true"
        }))
        .unwrap()
    }

    #[test]
    fn audience_must_match_client() {
        let profile = profile();
        assert!(check_audience(&profile, "client.apps.googleusercontent.com").is_ok());
        assert!(matches!(
            check_audience(&profile, "other"),
            Err(AppError::SocialAuth(_))
        ));
        assert!(check_audience(&profile, "").is_err());
    }

    #[test]
    fn exposes_profile_fields() {
        let google = Google::from_profile("tok", profile());
        assert!(google.authenticate());
        assert_eq!(
            google.user_data(),
            UserData {
                first: "Ada".into(),
                last: "Lovelace".into(),
                alt_email: Some("ada@example.com".into()),
            }
        );
        assert_eq!(google.social_id(), Some("1234"));
        assert_eq!(google.image_url(), Some("https://example.com/ada.png"));
        assert_eq!(google.fallback_email().as_deref(), Some("1234@google.com"));
    }

    #[test]
    fn client_id_depends_on_mode() {
        let config = Configuration::from_value(json!({
            "social": {
                "google": { "client_id": "web", "like": true },
                "google-app": { "client_id": "app" }
            }
        }));
        assert_eq!(client_id(&config, false), "web");
        assert_eq!(client_id(&config, true), "app");
        assert!(render_links(&config).unwrap().contains("g:plusone"));
    }

    #[test]
    fn login_button_sets_script_vars() {
        let config = Configuration::from_value(json!({ "social": { "google": { "client_id": "web" } } }));
        let mut template = Template::default();
        let html = login_button(&mut template, &config, "form-token", true);
        assert!(html.contains("Sign in with Google"));
        assert_eq!(template.js_vars["social.google.client_id"], json!("web"));
        assert_eq!(template.js_vars["social.authorize"], json!(true));
    }
}
