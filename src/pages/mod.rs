//! The page front controller.
//!
//! Every request that is not a static file, the health check or the file
//! browser connector lands in [`front_controller`]:
//!
//! 1. Resolve the location to a [`PageKind`] (static routes, then dynamic)
//! 2. Apply `modules.<name>` settings for the page
//! 3. Check access, then the form token on POST requests
//! 4. Pick the handler from `action` (`post` + `save-image` → `post_save_image`)
//!    or the verb, checking the blacklist for anything but `get`
//! 5. Render the site template, a redirect, JSON or raw bytes
//!
//! Errors are rendered inside the site template with their status code.

pub mod admin;
pub mod blog;
pub mod contact;
pub mod content;
pub mod context;
pub mod image_browser;
pub mod message;
pub mod routes;
pub mod track;
pub mod user;

use crate::{
    config::Configuration,
    error::AppError,
    middleware::session::ClientContext,
    models::blacklist,
    social::google,
    state::AppState,
};
use axum::{
    Extension, Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    response::{Html, IntoResponse, Response},
};
use context::{Output, PageContext, Params, convert_function_name};
use serde_json::Value;

/// Admin pages backed by the generic table editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminTable {
    Roles,
    Permissions,
    MailingLists,
    MailingMessages,
    MailingTemplates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Content,
    Blog,
    Contact,
    Message,
    Track,
    User,
    AdminCms,
    AdminTable(AdminTable),
    AdminMailingSend,
    ImageBrowser,
}

impl PageKind {
    /// Page names used in `routes.static` and `routes.dynamic`.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "page" => PageKind::Content,
            "blog" => PageKind::Blog,
            "contact" => PageKind::Contact,
            "message" => PageKind::Message,
            "track" => PageKind::Track,
            "user" => PageKind::User,
            "admin_cms" => PageKind::AdminCms,
            "admin_roles" => PageKind::AdminTable(AdminTable::Roles),
            "admin_permissions" => PageKind::AdminTable(AdminTable::Permissions),
            "admin_mailing_lists" => PageKind::AdminTable(AdminTable::MailingLists),
            "admin_mailing_messages" => PageKind::AdminTable(AdminTable::MailingMessages),
            "admin_mailing_templates" => PageKind::AdminTable(AdminTable::MailingTemplates),
            "admin_mailing_send" => PageKind::AdminMailingSend,
            "image_browser" => PageKind::ImageBrowser,
            _ => return None,
        })
    }

    /// Key under `modules` holding settings for this page.
    pub fn module(self) -> Option<&'static str> {
        match self {
            PageKind::Blog => Some("blog"),
            _ => None,
        }
    }

    /// Pages that accept POSTs without the form token.
    pub fn ignores_token(self) -> bool {
        matches!(self, PageKind::Track)
    }

    fn init(self, ctx: &mut PageContext) {
        let template = &mut ctx.template;
        match self {
            PageKind::Contact => template.menu_context = "contact".into(),
            PageKind::Blog => template.menu_context = "blog".into(),
            PageKind::User => template.menu_context = "user".into(),
            PageKind::AdminCms
            | PageKind::AdminTable(_)
            | PageKind::AdminMailingSend
            | PageKind::ImageBrowser => {
                template.menu_context = "admin".into();
                template.right_column = false;
                template.full_width = true;
                template.share = false;
            }
            PageKind::Content | PageKind::Message | PageKind::Track => {}
        }
    }

    fn has_access(self, ctx: &PageContext) -> bool {
        match self {
            PageKind::Content
            | PageKind::Blog
            | PageKind::Contact
            | PageKind::Message
            | PageKind::Track
            | PageKind::User => true,
            PageKind::AdminCms
            | PageKind::AdminTable(_)
            | PageKind::AdminMailingSend
            | PageKind::ImageBrowser => ctx.is_admin,
        }
    }

    async fn dispatch(self, ctx: &mut PageContext, method: &str) -> Result<Output, AppError> {
        match self {
            PageKind::Content => content::handle(ctx, method).await,
            PageKind::Blog => blog::handle(ctx, method).await,
            PageKind::Contact => contact::handle(ctx, method).await,
            PageKind::Message => message::handle(ctx, method).await,
            PageKind::Track => track::handle(ctx, method).await,
            PageKind::User => user::handle(ctx, method).await,
            PageKind::AdminCms => admin::cms::handle(ctx, method).await,
            PageKind::AdminTable(table) => admin::table::handle(table, ctx, method).await,
            PageKind::AdminMailingSend => admin::mailing::handle(ctx, method).await,
            PageKind::ImageBrowser => image_browser::handle(ctx, method).await,
        }
    }
}

/// Apply `modules.<name>` settings: menu context, meta data and layout flags.
pub fn apply_module_settings(ctx: &mut PageContext, config: &Configuration, module: &str) {
    let Some(settings) = config.get(&format!("modules.{}", module)) else {
        return;
    };
    let template = &mut ctx.template;

    if let Some(menu) = settings.get("menu_context").and_then(Value::as_str) {
        if !menu.is_empty() {
            template.menu_context = menu.to_string();
        }
    }
    if let Some(Value::Object(meta)) = settings.get("meta_data") {
        for (field, value) in meta {
            if let Some(value) = value.as_str() {
                template
                    .meta
                    .entry(field.clone())
                    .or_insert_with(|| value.to_string());
            }
        }
    }
    if let Some(right_column) = settings.get("right_column") {
        template.right_column = crate::config::truthy(right_column);
    }
    if let Some(full_width) = settings.get("full_width") {
        template.full_width = crate::config::truthy(full_width);
    }
}

/// Run a page: access, token, blacklist, then the handler.
pub async fn execute(kind: PageKind, ctx: &mut PageContext) -> Result<Output, AppError> {
    if !kind.has_access(ctx) {
        return Err(AppError::AccessDenied);
    }

    if !kind.ignores_token() && !ctx.validate_token() {
        return Err(AppError::InvalidToken);
    }

    let verb = ctx.verb();
    let method = match ctx.request("action").filter(|a| !a.is_empty()) {
        Some(action) => convert_function_name(&verb, action),
        None => verb,
    };

    if method != "get" {
        blacklist::check_blacklist(&ctx.state.pool, &ctx.ip).await?;
    }

    tracing::debug!(page = ?kind, %method, location = %ctx.location, "Dispatching page");
    kind.dispatch(ctx, &method).await
}

/// Fill the template with site-wide values before rendering.
fn prepare_output(ctx: &mut PageContext) {
    let config = ctx.state.config.clone();
    let template = &mut ctx.template;

    let site_title = config.get_str("meta_data.title").unwrap_or_default();
    if let Some(title) = template.meta.get_mut("title") {
        if !title.is_empty() && !site_title.is_empty() {
            title.push_str(" | ");
            title.push_str(site_title);
        }
    }

    if let Some(Value::Object(defaults)) = config.get("meta_data") {
        for (field, value) in defaults {
            if let Some(value) = value.as_str() {
                template
                    .meta
                    .entry(field.clone())
                    .or_insert_with(|| value.to_string());
            }
        }
    }
    if template.share {
        template.share_links = google::render_links(&config).unwrap_or_default();
    }
    if let Some(twitter) = config.get_str("social.twitter.url").filter(|t| !t.is_empty()) {
        template.meta.insert("twitter_site".into(), twitter.to_string());
        template.meta.insert("twitter_creator".into(), twitter.to_string());
    }

    for key in ["google_analytics_id", "facebook_pixel_id"] {
        if let Some(value) = config.get_str(key) {
            template.set_js(key, value);
        }
    }
    template.set_js(
        "google_adwords",
        config.get_or("google_adwords", Value::Array(Vec::new())),
    );
    if config.get_bool("debug") {
        template.set_js("debug", true);
    }
    if let Some(token) = ctx.session.as_ref().map(|s| s.token.clone()) {
        ctx.template.set_js("token", token);
    }
}

fn with_cookie(mut response: Response, cookie: Option<&HeaderValue>) -> Response {
    if let Some(cookie) = cookie {
        response
            .headers_mut()
            .append(header::SET_COOKIE, cookie.clone());
    }
    response
}

async fn render(ctx: &mut PageContext) -> Response {
    if let Err(e) = ctx.load_messages().await {
        e.log();
    }
    prepare_output(ctx);
    (ctx.status, Html(ctx.template.render())).into_response()
}

async fn respond(ctx: &mut PageContext, result: Result<Output, AppError>) -> Response {
    let response = match result {
        Ok(Output::Page) => render(ctx).await,
        Ok(Output::Redirect(url)) => {
            let location = HeaderValue::from_str(&url).unwrap_or_else(|_| HeaderValue::from_static("/"));
            (StatusCode::SEE_OTHER, [(header::LOCATION, location)]).into_response()
        }
        Ok(Output::Json(value)) => (ctx.status, Json(value)).into_response(),
        Ok(Output::Binary { content_type, body }) => {
            (ctx.status, [(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Err(AppError::NotFound) => {
            ctx.status = StatusCode::NOT_FOUND;
            if let Err(e) = content::output_404(ctx).await {
                e.log();
                ctx.error(AppError::NotFound.public_message());
            }
            render(ctx).await
        }
        Err(e) => {
            e.log();
            ctx.status = e.status_code();
            ctx.error(e.public_message());
            render(ctx).await
        }
    };
    with_cookie(response, ctx.cookie())
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"))
}

/// Fallback handler serving every page route.
pub async fn front_controller(
    State(state): State<AppState>,
    Extension(client): Extension<ClientContext>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let query = Params::parse(uri.query().unwrap_or_default());
    let form = if is_form(&headers) {
        Params::parse(&String::from_utf8_lossy(&body))
    } else {
        Params::default()
    };

    let routes = state.routes.clone();
    let config = state.config.clone();
    let mut ctx = PageContext::new(state, client, method, uri.path(), query, form);

    let result = match routes.resolve(&ctx.location) {
        Some(kind) => {
            kind.init(&mut ctx);
            if let Some(module) = kind.module() {
                apply_module_settings(&mut ctx, &config, module);
            }
            execute(kind, &mut ctx).await
        }
        None => Err(AppError::NotFound),
    };

    respond(&mut ctx, result).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_names_resolve() {
        assert_eq!(PageKind::from_name("page"), Some(PageKind::Content));
        assert_eq!(
            PageKind::from_name("admin_mailing_templates"),
            Some(PageKind::AdminTable(AdminTable::MailingTemplates))
        );
        assert_eq!(PageKind::from_name("Page"), None);
        assert_eq!(PageKind::Blog.module(), Some("blog"));
        assert!(PageKind::Track.ignores_token());
        assert!(!PageKind::Contact.ignores_token());
    }

    #[test]
    fn form_content_type_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_form(&headers));
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded; charset=UTF-8"),
        );
        assert!(is_form(&headers));
    }
}
