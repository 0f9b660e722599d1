//! Browser sessions.
//!
//! The `session` cookie holds a random key. Only its SHA-256 hash is stored, the
//! same way API credentials are stored, so a leaked table cannot be replayed.
//! Each session also carries the form token required on POST requests.

use crate::{db::DbPool, error::AppError};
use axum::http::{HeaderMap, HeaderValue, header};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub const SESSION_COOKIE: &str = "session";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Session {
    pub session_id: i64,
    pub session_key: String,
    /// Form token echoed back in POST bodies.
    pub token: String,
    pub user_id: Option<i64>,
    pub ip: String,
    pub created: i64,
    pub last_ping: i64,
    /// Arbitrary per-session settings (e.g. `google.token`).
    pub settings: Value,
}

/// SHA-256 of the raw cookie key, hex encoded.
pub fn hash_key(raw_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_key.as_bytes());
    hex::encode(hasher.finalize())
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl Session {
    /// Load a live session by its raw cookie key and refresh its ping time.
    ///
    /// Sessions idle for longer than `max_idle_secs` are ignored.
    pub async fn load(
        pool: &DbPool,
        raw_key: &str,
        max_idle_secs: i64,
    ) -> Result<Option<Self>, AppError> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            UPDATE session SET last_ping = $2
            WHERE session_key = $1 AND last_ping > $3
            RETURNING session_id, session_key, token, user_id, ip, created, last_ping, settings
            "#,
        )
        .bind(hash_key(raw_key))
        .bind(now())
        .bind(now() - max_idle_secs)
        .fetch_optional(pool)
        .await?;

        Ok(session)
    }

    /// Start a new anonymous session. Returns the session and the raw cookie key.
    pub async fn create(pool: &DbPool, ip: &str) -> Result<(Self, String), AppError> {
        let raw_key = hex::encode(rand::random::<[u8; 32]>());
        let token = hex::encode(rand::random::<[u8; 16]>());

        let session = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO session (session_key, token, ip, created, last_ping)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING session_id, session_key, token, user_id, ip, created, last_ping, settings
            "#,
        )
        .bind(hash_key(&raw_key))
        .bind(&token)
        .bind(ip)
        .bind(now())
        .fetch_one(pool)
        .await?;

        tracing::debug!(session_id = session.session_id, "Session created");
        Ok((session, raw_key))
    }

    /// Attach a signed-in user.
    pub async fn set_user(&mut self, pool: &DbPool, user_id: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE session SET user_id = $1 WHERE session_id = $2")
            .bind(user_id)
            .bind(self.session_id)
            .execute(pool)
            .await?;
        self.user_id = Some(user_id);
        Ok(())
    }

    /// Read a setting by key.
    pub fn get_setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key).filter(|value| !value.is_null())
    }

    /// Store a setting by key.
    pub async fn set_setting(
        &mut self,
        pool: &DbPool,
        key: &str,
        value: Value,
    ) -> Result<(), AppError> {
        if !self.settings.is_object() {
            self.settings = Value::Object(Default::default());
        }
        if let Value::Object(map) = &mut self.settings {
            map.insert(key.to_string(), value);
        }

        sqlx::query("UPDATE session SET settings = $1 WHERE session_id = $2")
            .bind(&self.settings)
            .bind(self.session_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Remove the session (log out).
    pub async fn destroy(self, pool: &DbPool) -> Result<(), AppError> {
        sqlx::query("DELETE FROM session WHERE session_id = $1")
            .bind(self.session_id)
            .execute(pool)
            .await?;
        Ok(())
    }
}

/// Read a cookie value from request headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// `Set-Cookie` header for the session key. An empty key clears the cookie.
pub fn session_cookie(raw_key: &str, max_age_secs: i64) -> HeaderValue {
    let max_age = if raw_key.is_empty() { 0 } else { max_age_secs };
    let cookie = format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        SESSION_COOKIE, raw_key, max_age
    );
    // hex keys and fixed attributes only
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_stable_hex() {
        let hash = hash_key("abc");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_key("abc"));
        assert_ne!(hash, hash_key("abd"));
    }

    #[test]
    fn reads_cookie_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session=abc123; other=1"),
        );
        assert_eq!(cookie_value(&headers, "session").as_deref(), Some("abc123"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn empty_key_expires_cookie() {
        let cookie = session_cookie("", 3600);
        assert!(cookie.to_str().unwrap().contains("Max-Age=0"));
        let cookie = session_cookie("ff", 3600);
        assert!(cookie.to_str().unwrap().starts_with("session=ff;"));
    }
}
