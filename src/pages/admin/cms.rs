//! Saves CMS blocks edited in place. Answers with JSON for the browser
//! script: `{"status":"success"}` or `{"status":"error","errors":[...]}`.

use super::super::context::{Output, PageContext};
use crate::{error::AppError, models::cms::Cms};
use serde_json::{Value, json};

pub async fn handle(ctx: &mut PageContext, method: &str) -> Result<Output, AppError> {
    match method {
        "post_save" => post_save(ctx).await,
        "post_save_image" => post_save_image(ctx).await,
        _ => Err(AppError::MethodNotAvailable),
    }
}

/// Block name from `cms`, with or without the element ID prefix.
fn block_name(ctx: &PageContext) -> String {
    let name = ctx.post("cms").unwrap_or_default().trim();
    name.strip_prefix("cms_").unwrap_or(name).to_string()
}

fn status(result: Result<(), AppError>) -> Result<Output, AppError> {
    match result {
        Ok(()) => Ok(Output::Json(json!({ "status": "success" }))),
        Err(AppError::InvalidRequest(message)) => Ok(Output::Json(error_body(&message))),
        Err(e) => Err(e),
    }
}

fn error_body(message: &str) -> Value {
    json!({ "status": "error", "errors": [message] })
}

async fn post_save(ctx: &mut PageContext) -> Result<Output, AppError> {
    let name = block_name(ctx);
    let content = ctx.post("content").unwrap_or_default();
    status(Cms::save(&ctx.state.pool, &name, content).await)
}

async fn post_save_image(ctx: &mut PageContext) -> Result<Output, AppError> {
    let name = block_name(ctx);
    let url = ctx.post("url").unwrap_or_default();
    let class = ctx.post("class").unwrap_or_default();
    status(Cms::save_image(&ctx.state.pool, &name, url, class).await)
}
