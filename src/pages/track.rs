//! Tracking pixel.
//!
//! `/track?t=<token>` records the event the signed token describes and
//! always answers with a transparent GIF, so invalid tokens reveal nothing.

use super::context::{Output, PageContext};
use crate::{
    error::AppError,
    models::tracker::{self, PIXEL_GIF, TrackerToken},
};

pub async fn handle(ctx: &mut PageContext, method: &str) -> Result<Output, AppError> {
    match method {
        "get" => get(ctx).await,
        _ => Err(AppError::MethodNotAvailable),
    }
}

async fn get(ctx: &mut PageContext) -> Result<Output, AppError> {
    let key = ctx.state.config.get_str("tracker.key").unwrap_or_default();
    match ctx.get("t").and_then(|t| TrackerToken::verify(key, t)) {
        Some(token) => {
            let session_id = ctx.session.as_ref().map(|s| s.session_id).unwrap_or_default();
            tracker::track_event_by_id(
                &ctx.state.pool,
                token.tracker_id,
                token.sub_id,
                token.user_id,
                session_id,
            )
            .await?;
        }
        None => tracing::debug!("Ignoring invalid tracking token"),
    }

    Ok(Output::Binary {
        content_type: "image/gif",
        body: PIXEL_GIF.to_vec(),
    })
}
