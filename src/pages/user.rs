//! Sign-in with Google, sign-out, unsubscribe links and the linked accounts
//! page.

use super::context::{Output, PageContext, with_query};
use crate::{
    error::AppError,
    models::user::{NameParts, User},
    social::{self, google},
    view::{html::escape, language::translate},
};
use serde_json::Value;

pub async fn handle(ctx: &mut PageContext, method: &str) -> Result<Output, AppError> {
    match method {
        "get" => get(ctx).await,
        "post_google_login" => post_google_login(ctx).await,
        "get_logout" | "post_logout" => logout(ctx).await,
        "get_unsubscribe" => get_unsubscribe(ctx).await,
        _ => Err(AppError::MethodNotAvailable),
    }
}

async fn get(ctx: &mut PageContext) -> Result<Output, AppError> {
    let token = ctx.ensure_session().await?.token.clone();

    let Some(user) = ctx.user.clone() else {
        let config = ctx.state.config.clone();
        let button = google::login_button(&mut ctx.template, &config, &token, false);
        ctx.template.content = format!(
            "<div class=\"login\"><h1>Sign in</h1>{}<form method=\"post\" action=\"/user\" class=\"social-login\">\
             <input type=\"hidden\" name=\"token\" value=\"{}\">\
             <input type=\"hidden\" name=\"action\" value=\"google-login\">\
             <input type=\"hidden\" name=\"google_token\" value=\"\"></form></div>",
            button,
            escape(&token)
        );
        return Ok(Output::Page);
    };

    let authorizations = social::load_authorizations(&ctx.state.pool, user.user_id).await?;
    let mut rows = String::new();
    for authorization in &authorizations {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&authorization.network),
            escape(&authorization.name),
            escape(&authorization.screen_name)
        ));
    }
    let avatar = ctx
        .session
        .as_ref()
        .and_then(|s| s.get_setting(google::SESSION_IMAGE))
        .and_then(Value::as_str)
        .map(|src| format!("<img class=\"avatar\" src=\"{}\" alt=\"\">", escape(src)))
        .unwrap_or_default();
    ctx.template.content = format!(
        "<div class=\"account\">{}<h1>{}</h1><p>{}</p>\
         <table class=\"social-authorizations\"><tr><th>Network</th><th>Name</th><th>Account</th></tr>{}</table>\
         <form method=\"post\" action=\"/user\"><input type=\"hidden\" name=\"token\" value=\"{}\">\
         <input type=\"hidden\" name=\"action\" value=\"logout\"><input type=\"submit\" class=\"button\" value=\"Sign out\"></form></div>",
        avatar,
        escape(&user.full_name()),
        escape(&user.email),
        rows,
        escape(&token)
    );
    Ok(Output::Page)
}

/// Local path to return to after signing in.
fn return_path(ctx: &PageContext) -> String {
    ctx.request("redirect")
        .filter(|url| url.starts_with('/') && !url.starts_with("//"))
        .unwrap_or("/user")
        .to_string()
}

/// Sign in with a Google ID token (or an access token with `authorize`),
/// creating the user on first sign-in and linking the Google account.
async fn post_google_login(ctx: &mut PageContext) -> Result<Output, AppError> {
    let state = ctx.state.clone();
    let pool = &state.pool;

    let token = ctx.post("google_token").unwrap_or_default().to_string();
    let authorize = ctx.form.get_bool("authorize");
    let app = ctx.form.get_bool("app");

    let google = google::Google::create(&state.http, &state.config, &token, authorize, app).await?;
    if !google.authenticate() {
        return Err(AppError::SocialAuth("no profile".to_string()));
    }

    let data = google.user_data();
    let email = data
        .alt_email
        .clone()
        .or_else(|| google.fallback_email())
        .ok_or_else(|| AppError::SocialAuth("no email address".to_string()))?;
    let user = User::add_user(
        pool,
        &email,
        &NameParts {
            first: data.first,
            last: data.last,
        },
    )
    .await?;

    let session = ctx.ensure_session().await?;
    session.set_user(pool, user.user_id).await?;
    google.store_session_data(pool, session).await?;

    social::save_authorization(
        pool,
        user.user_id,
        google::NETWORK,
        google.social_id().unwrap_or_default(),
        google.token(),
        &google.display_name(),
        &email,
    )
    .await?;

    tracing::info!(user_id = user.user_id, "Signed in with Google");
    ctx.is_admin = user.is_admin(pool).await?;
    ctx.user = Some(user);
    ctx.message(translate("signed_in", &[]));
    let target = return_path(ctx);
    ctx.redirect(&target).await
}

async fn logout(ctx: &mut PageContext) -> Result<Output, AppError> {
    ctx.destroy_session().await?;
    Ok(Output::Redirect(with_query("/user", &[("msg", "logged_out")])))
}

/// `/user?action=unsubscribe&u=<url key>` removes the user from every list.
async fn get_unsubscribe(ctx: &mut PageContext) -> Result<Output, AppError> {
    let pool = ctx.state.pool.clone();
    let key = ctx.get("u").unwrap_or_default().to_string();
    let user = User::load_by_url_key(&pool, &key)
        .await?
        .ok_or_else(|| AppError::InvalidRequest("Invalid unsubscribe link.".to_string()))?;

    let removed = user.unsubscribe_all(&pool).await?;
    tracing::info!(user_id = user.user_id, removed, "User unsubscribed");
    Ok(Output::Redirect(with_query("/message", &[("msg", "unsubscribed")])))
}
