//! The image browser page. The browser talks to the elFinder connector at
//! `/api/elfinder`.

use super::context::{Output, PageContext};
use crate::error::AppError;

pub const CONNECTOR_URL: &str = "/api/elfinder";

pub async fn handle(ctx: &mut PageContext, method: &str) -> Result<Output, AppError> {
    match method {
        "get" => {
            let template = &mut ctx.template;
            template.set_js("imageBrowser.type", "elfinder");
            template.set_js("imageBrowser.url", CONNECTOR_URL);
            template.hide_menu = true;
            template.hide_header = true;
            template.hide_footer = true;
            template.content = format!(
                "<div id=\"elfinder\" data-url=\"{}\"></div>\
                 <script>lightning.fileBrowser.init();</script>",
                CONNECTOR_URL
            );
            Ok(Output::Page)
        }
        _ => Err(AppError::MethodNotAvailable),
    }
}
