//! Shows messages and errors carried over from a redirect.

use super::context::{Output, PageContext};
use crate::error::AppError;

pub async fn handle(ctx: &mut PageContext, method: &str) -> Result<Output, AppError> {
    match method {
        "get" => {
            ctx.template.content = "<div class=\"message-page\"></div>".to_string();
            Ok(Output::Page)
        }
        _ => Err(AppError::MethodNotAvailable),
    }
}
