//! Session middleware.
//!
//! This middleware runs before every page and the file browser connector to:
//! 1. Read the `session` cookie and load the live session it belongs to
//! 2. Load the signed-in user and whether they are an admin
//! 3. Inject a [`ClientContext`] into the request extensions
//!
//! Requests without a valid session continue anonymously. Pages that need a
//! session (forms, sign-in) create one on demand.

use crate::{
    error::AppError,
    models::{
        session::{SESSION_COOKIE, Session, cookie_value},
        user::User,
    },
    state::AppState,
};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;

/// Who is making the request.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub ip: String,
    pub session: Option<Session>,
    pub user: Option<User>,
    pub is_admin: bool,
}

/// Session lifetime in seconds, from `user.session_days`.
pub fn session_lifetime(state: &AppState) -> i64 {
    state.config.get_i64("user.session_days").unwrap_or(30).max(1) * 86_400
}

/// Client address, preferring the first `X-Forwarded-For` hop.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("X-Forwarded-For")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_default()
}

pub async fn session_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let mut client = ClientContext {
        ip: client_ip(request.headers(), peer),
        ..ClientContext::default()
    };

    if let Some(raw_key) = cookie_value(request.headers(), SESSION_COOKIE) {
        client.session = Session::load(&state.pool, &raw_key, session_lifetime(&state)).await?;
    }

    if let Some(user_id) = client.session.as_ref().and_then(|s| s.user_id) {
        client.user = User::load_by_id(&state.pool, user_id).await?;
        if let Some(user) = &client.user {
            client.is_admin = user.is_admin(&state.pool).await?;
        }
    }

    request.extensions_mut().insert(client);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_address_wins() {
        let peer: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(peer)), "10.0.0.1");

        headers.insert(
            "X-Forwarded-For",
            HeaderValue::from_static("203.0.113.9, 10.0.0.2"),
        );
        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.9");
        assert_eq!(client_ip(&HeaderMap::new(), None), "");
    }
}
