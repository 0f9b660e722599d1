//! Sending stored messages: audience count, test sends and the bulk send.

use super::super::context::{Output, PageContext};
use crate::{
    error::AppError,
    models::message::{self, Message},
    services::mailer::{Mailer, test_addresses},
    view::html::escape,
};
use serde_json::json;

pub async fn handle(ctx: &mut PageContext, method: &str) -> Result<Output, AppError> {
    match method {
        "get" => get(ctx).await,
        "get_count" => get_count(ctx).await,
        "post_send" => post_send(ctx).await,
        "post_test" => post_test(ctx).await,
        _ => Err(AppError::MethodNotAvailable),
    }
}

fn message_id(ctx: &PageContext) -> Result<i64, AppError> {
    ctx.request_int("id")
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::InvalidRequest("Select a message to send.".to_string()))
}

async fn audience_count(ctx: &PageContext, message_id: i64) -> Result<(Message, i64), AppError> {
    let state = &ctx.state;
    let mut message = Message::load(&state.pool, &state.config, message_id, true, false).await?;
    let count = message.get_users_count(&state.pool).await?;
    Ok((message, count))
}

async fn get(ctx: &mut PageContext) -> Result<Output, AppError> {
    let id = message_id(ctx)?;
    let (mut message, count) = audience_count(ctx, id).await?;
    let pool = ctx.state.pool.clone();
    let list_ids = message.load_lists(&pool).await?.to_vec();
    let lists: Vec<String> = message::get_all_lists(&pool)
        .await?
        .into_iter()
        .filter(|list| list_ids.contains(&list.message_list_id))
        .map(|list| list.name)
        .collect();
    let token = ctx.ensure_session().await?.token.clone();
    let tests = test_addresses(&ctx.state.config).join(", ");

    let mut html = format!(
        "<h1>Send Message</h1><h2>{}</h2><p>Lists: {}</p>\
         <p>This message will be sent to <strong>{}</strong> users.</p>",
        escape(&message.subject()),
        escape(&lists.join(", ")),
        count
    );
    for (action, label) in [("test", "Send test"), ("send", "Send to all")] {
        html.push_str(&format!(
            "<form method=\"post\" action=\"/{}\" class=\"mailing-{}\">\
             <input type=\"hidden\" name=\"token\" value=\"{}\">\
             <input type=\"hidden\" name=\"action\" value=\"{}\">\
             <input type=\"hidden\" name=\"id\" value=\"{}\">\
             <input type=\"submit\" class=\"button\" value=\"{}\"></form>",
            escape(&ctx.location),
            action,
            escape(&token),
            action,
            id,
            label
        ));
    }
    if !tests.is_empty() {
        html.push_str(&format!("<p>Tests go to {}.</p>", escape(&tests)));
    }

    ctx.template.content = html;
    Ok(Output::Page)
}

async fn get_count(ctx: &mut PageContext) -> Result<Output, AppError> {
    let id = message_id(ctx)?;
    let (_, count) = audience_count(ctx, id).await?;
    Ok(Output::Json(json!({ "count": count })))
}

async fn post_send(ctx: &mut PageContext) -> Result<Output, AppError> {
    let id = message_id(ctx)?;
    let state = ctx.state.clone();
    let sent = Mailer::new(&state).send_message(id, false).await?;
    ctx.message(format!("Sent {} messages.", sent));
    let target = format!("/{}?id={}", ctx.location, id);
    ctx.redirect(&target).await
}

async fn post_test(ctx: &mut PageContext) -> Result<Output, AppError> {
    let id = message_id(ctx)?;
    let state = ctx.state.clone();
    let sent = Mailer::new(&state).send_test(id).await?;
    if sent == 0 {
        ctx.error("No test messages were sent. Check mailer.test.");
    } else {
        ctx.message(format!("Sent {} test messages.", sent));
    }
    let target = format!("/{}?id={}", ctx.location, id);
    ctx.redirect(&target).await
}
