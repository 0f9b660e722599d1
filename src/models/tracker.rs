//! Event trackers.
//!
//! A tracker is a named action ("Email Sent", "Email Opened", "Contact Sent").
//! Each occurrence is a row in `tracker_event` (see [`crate::schema::TrackerEvent`]).
//! The `sub_id` column narrows the event, e.g. to the message that was sent.

use crate::{db::DbPool, error::AppError, query::criteria::today};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const EMAIL_SENT: &str = "Email Sent";
pub const EMAIL_OPENED: &str = "Email Opened";
pub const CONTACT_SENT: &str = "Contact Sent";

/// Get a tracker's ID, creating the tracker on first use.
pub async fn get_tracker_id(pool: &DbPool, name: &str) -> Result<i64, AppError> {
    let tracker_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO tracker (name) VALUES ($1)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING tracker_id
        "#,
    )
    .bind(name)
    .fetch_one(pool)
    .await?;

    Ok(tracker_id)
}

/// Record an event for a named tracker.
pub async fn track_event(
    pool: &DbPool,
    name: &str,
    sub_id: i64,
    user_id: i64,
    session_id: i64,
) -> Result<(), AppError> {
    let tracker_id = get_tracker_id(pool, name).await?;
    track_event_by_id(pool, tracker_id, sub_id, user_id, session_id).await
}

/// Record an event for a tracker ID.
pub async fn track_event_by_id(
    pool: &DbPool,
    tracker_id: i64,
    sub_id: i64,
    user_id: i64,
    session_id: i64,
) -> Result<(), AppError> {
    let now = chrono::Utc::now();

    sqlx::query(
        r#"
        INSERT INTO tracker_event (tracker_id, user_id, session_id, sub_id, date, time)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(tracker_id)
    .bind(user_id)
    .bind(session_id)
    .bind(sub_id)
    .bind(today(now))
    .bind(now.timestamp())
    .execute(pool)
    .await?;

    tracing::debug!(tracker_id, sub_id, user_id, "Tracker event recorded");
    Ok(())
}

/// Identifies an event to record when a tracking URL is hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerToken {
    pub tracker_id: i64,
    pub sub_id: i64,
    pub user_id: i64,
}

fn signature(key: &str, payload: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).ok()?;
    mac.update(payload.as_bytes());
    Some(mac)
}

impl TrackerToken {
    /// `<tracker>.<sub>.<user>.<hmac>`
    pub fn sign(&self, key: &str) -> String {
        let payload = format!("{}.{}.{}", self.tracker_id, self.sub_id, self.user_id);
        let digest = signature(key, &payload)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
            .unwrap_or_default();
        format!("{}.{}", payload, digest)
    }

    /// Parse and authenticate a token produced by [`TrackerToken::sign`].
    pub fn verify(key: &str, token: &str) -> Option<Self> {
        let (payload, digest) = token.rsplit_once('.')?;
        let digest = hex::decode(digest).ok()?;
        signature(key, payload)?.verify_slice(&digest).ok()?;

        let mut parts = payload.split('.').map(|part| part.parse::<i64>().ok());
        let token = Self {
            tracker_id: parts.next()??,
            sub_id: parts.next()??,
            user_id: parts.next()??,
        };
        parts.next().is_none().then_some(token)
    }
}

/// HTML for a 1x1 tracking image that records `name` when loaded.
pub async fn tracker_image(
    pool: &DbPool,
    key: &str,
    web_root: &str,
    name: &str,
    sub_id: i64,
    user_id: i64,
) -> Result<String, AppError> {
    let token = TrackerToken {
        tracker_id: get_tracker_id(pool, name).await?,
        sub_id,
        user_id,
    };
    Ok(tracker_image_html(web_root, &token.sign(key)))
}

pub fn tracker_image_html(web_root: &str, signed: &str) -> String {
    format!(
        "<img src=\"{}/track?t={}\" width=\"1\" height=\"1\" alt=\"\" />",
        web_root.trim_end_matches('/'),
        signed
    )
}

/// A transparent 1x1 GIF.
pub const PIXEL_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_tokens_verify() {
        let token = TrackerToken {
            tracker_id: 2,
            sub_id: 15,
            user_id: 99,
        };
        let signed = token.sign("secret");
        assert!(signed.starts_with("2.15.99."));
        assert_eq!(TrackerToken::verify("secret", &signed), Some(token));
    }

    #[test]
    fn tampered_or_foreign_tokens_fail() {
        let signed = TrackerToken {
            tracker_id: 2,
            sub_id: 15,
            user_id: 99,
        }
        .sign("secret");

        let tampered = signed.replacen("2.15.99", "2.15.98", 1);
        assert_eq!(TrackerToken::verify("secret", &tampered), None);
        assert_eq!(TrackerToken::verify("other", &signed), None);
        assert_eq!(TrackerToken::verify("secret", "garbage"), None);
    }

    #[test]
    fn image_points_at_track_page() {
        let html = tracker_image_html("https://example.com/", "1.2.3.ab");
        assert_eq!(
            html,
            "<img src=\"https://example.com/track?t=1.2.3.ab\" width=\"1\" height=\"1\" alt=\"\" />"
        );
    }
}
