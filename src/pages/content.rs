//! Content pages stored in the `page` table.

use super::context::{Output, PageContext};
use crate::{
    error::AppError,
    models::{
        cms,
        page::{NOT_FOUND_URL, PageRecord},
    },
    view::html::escape,
};

pub async fn handle(ctx: &mut PageContext, method: &str) -> Result<Output, AppError> {
    match method {
        "get" => get(ctx).await,
        _ => Err(AppError::MethodNotAvailable),
    }
}

async fn get(ctx: &mut PageContext) -> Result<Output, AppError> {
    // `/page?url=about` is the same as `/about.html`.
    let url = match ctx.location.as_str() {
        "page" => ctx.get("url").unwrap_or("index").to_string(),
        location => PageRecord::url_from_location(location),
    };

    let record = PageRecord::load_by_url(&ctx.state.pool, &url)
        .await?
        .ok_or(AppError::NotFound)?;
    show(ctx, &record).await?;
    Ok(Output::Page)
}

/// Put a page record into the template.
async fn show(ctx: &mut PageContext, record: &PageRecord) -> Result<(), AppError> {
    let body = cms::render_blocks(&ctx.state.pool, &record.body, ctx.is_admin).await?;

    ctx.set_meta("title", record.title.clone());
    ctx.set_meta("keywords", record.keywords.clone());
    ctx.set_meta("description", record.description.clone());

    let template = &mut ctx.template;
    if !record.menu_context.is_empty() {
        template.menu_context = record.menu_context.clone();
    }
    template.right_column = record.right_column;
    template.full_width = record.full_width;
    template.content = format!(
        "<article class=\"page\" id=\"page_{}\"><h1>{}</h1>{}</article>",
        record.page_id,
        escape(&record.title),
        body
    );
    Ok(())
}

/// Show the `404` page if one exists.
///
/// # Errors
///
/// `NotFound` when the site has no `404` page.
pub async fn output_404(ctx: &mut PageContext) -> Result<(), AppError> {
    let record = PageRecord::load_by_url(&ctx.state.pool, NOT_FOUND_URL)
        .await?
        .ok_or(AppError::NotFound)?;
    show(ctx, &record).await
}
