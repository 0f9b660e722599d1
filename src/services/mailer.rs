//! Outgoing email.
//!
//! Every mail is written to the `mail_outbox` table. When `mailer.relay_url`
//! is configured the mail is also POSTed to that endpoint as a signed JSON
//! body:
//!
//! - `Content-Type: application/json`
//! - `X-Mail-Signature: sha256=<hex hmac of the body>` (key `mailer.relay_secret`)
//! - `X-Mail-Id: <uuid>`
//!
//! The relay is expected to hand the mail to an MTA.

use crate::{
    config::Configuration,
    error::AppError,
    models::{message::Message, tracker, user::User},
    state::AppState,
};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const RELAY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipient {
    pub email: String,
    pub name: String,
}

/// A composed mail, as stored and relayed.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMail {
    pub id: Uuid,
    pub to: Vec<Recipient>,
    pub reply_to: Option<String>,
    pub from_address: String,
    pub from_name: String,
    pub subject: String,
    pub body: String,
}

/// Sender address and name: `mailer.*` first, then `site.*`.
pub fn sender(config: &Configuration) -> (String, String) {
    let pick = |primary: &str, fallback: &str| {
        config
            .get_str(primary)
            .filter(|v| !v.is_empty())
            .or_else(|| config.get_str(fallback))
            .unwrap_or_default()
            .to_string()
    };
    (
        pick("mailer.mail_from", "site.mail_from"),
        pick("mailer.mail_from_name", "site.mail_from_name"),
    )
}

/// `sha256=<hex>` HMAC of a relay payload.
pub fn relay_signature(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

pub struct Mailer<'a> {
    state: &'a AppState,
    to: Vec<Recipient>,
    reply_to: Option<String>,
    subject: String,
    body: String,
}

impl<'a> Mailer<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self {
            state,
            to: Vec::new(),
            reply_to: None,
            subject: String::new(),
            body: String::new(),
        }
    }

    pub fn to(&mut self, email: &str, name: &str) -> &mut Self {
        self.to.push(Recipient {
            email: email.to_string(),
            name: name.to_string(),
        });
        self
    }

    pub fn reply_to(&mut self, email: &str) -> &mut Self {
        self.reply_to = Some(email.to_string());
        self
    }

    pub fn subject(&mut self, subject: &str) -> &mut Self {
        self.subject = subject.to_string();
        self
    }

    pub fn message(&mut self, body: &str) -> &mut Self {
        self.body = body.to_string();
        self
    }

    fn compose(&self) -> Result<OutgoingMail, AppError> {
        if self.to.is_empty() {
            return Err(AppError::InvalidRequest("No recipients".to_string()));
        }
        let (from_address, from_name) = sender(&self.state.config);
        Ok(OutgoingMail {
            id: Uuid::new_v4(),
            to: self.to.clone(),
            reply_to: self.reply_to.clone(),
            from_address,
            from_name,
            subject: self.subject.clone(),
            body: self.body.clone(),
        })
    }

    /// Deliver the mail and clear the recipients for the next one.
    ///
    /// Returns `false` when the relay rejected or never received the mail.
    /// The outbox row is written either way.
    pub async fn send(&mut self) -> Result<bool, AppError> {
        let mail = self.compose()?;
        self.to.clear();

        sqlx::query(
            r#"
            INSERT INTO mail_outbox (id, recipients, reply_to, from_address, from_name, subject, body)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(mail.id)
        .bind(serde_json::to_value(&mail.to).unwrap_or_default())
        .bind(&mail.reply_to)
        .bind(&mail.from_address)
        .bind(&mail.from_name)
        .bind(&mail.subject)
        .bind(&mail.body)
        .execute(&self.state.pool)
        .await?;

        let Some(relay_url) = self
            .state
            .config
            .get_str("mailer.relay_url")
            .filter(|url| !url.is_empty())
        else {
            tracing::info!(mail_id = %mail.id, subject = %mail.subject, "Mail queued");
            return Ok(true);
        };

        let status = self.relay(relay_url, &mail).await;
        sqlx::query("UPDATE mail_outbox SET relay_status = $1 WHERE id = $2")
            .bind(status.map(i32::from))
            .bind(mail.id)
            .execute(&self.state.pool)
            .await?;

        Ok(status.is_some_and(|code| (200..300).contains(&code)))
    }

    async fn relay(&self, relay_url: &str, mail: &OutgoingMail) -> Option<u16> {
        let payload = match serde_json::to_string(mail) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(mail_id = %mail.id, "Failed to serialize mail: {}", e);
                return None;
            }
        };
        let secret = self
            .state
            .config
            .get_str("mailer.relay_secret")
            .unwrap_or_default();

        let response = self
            .state
            .http
            .post(relay_url)
            .timeout(RELAY_TIMEOUT)
            .header("Content-Type", "application/json")
            .header("X-Mail-Signature", relay_signature(secret, &payload))
            .header("X-Mail-Id", mail.id.to_string())
            .body(payload)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if !resp.status().is_success() {
                    tracing::error!(mail_id = %mail.id, status, "Mail relay rejected the mail");
                }
                Some(status)
            }
            Err(e) => {
                tracing::error!(mail_id = %mail.id, "Mail relay request failed: {}", e);
                None
            }
        }
    }

    async fn send_to_user(&mut self, message: &mut Message, user: User) -> Result<bool, AppError> {
        let name = user.full_name();
        let email = user.email.clone();
        message.set_user(user);
        message.set_default_vars(&self.state.pool, None).await?;

        self.to(&email, &name)
            .subject(&message.subject())
            .message(&message.body());
        self.send().await
    }

    /// Send a stored message to a single user.
    pub async fn send_one(&mut self, message_id: i64, user: User) -> Result<bool, AppError> {
        let mut message =
            Message::load(&self.state.pool, &self.state.config, message_id, true, false).await?;
        self.send_to_user(&mut message, user).await
    }

    /// Send a stored message to its whole audience.
    ///
    /// Each delivery is recorded as an "Email Sent" event so messages marked
    /// `never_resend` (or sent with `auto`) skip those users next time.
    /// Returns the number of mails delivered.
    pub async fn send_message(&mut self, message_id: i64, auto: bool) -> Result<usize, AppError> {
        let state = self.state;
        let pool = &state.pool;
        let mut message = Message::load(pool, &state.config, message_id, true, auto).await?;
        let users = message.get_users(pool).await?;
        let sent_tracker = tracker::get_tracker_id(pool, tracker::EMAIL_SENT).await?;

        tracing::info!(message_id, recipients = users.len(), "Sending message");
        let mut sent = 0;
        for user in users {
            let user_id = user.user_id;
            if self.send_to_user(&mut message, user).await? {
                tracker::track_event_by_id(pool, sent_tracker, message_id, user_id, 0).await?;
                sent += 1;
            }
        }
        tracing::info!(message_id, sent, "Message sent");
        Ok(sent)
    }

    /// Send an ad-hoc message wrapped in the `mailer.mail_template` template,
    /// one mail per address. Returns whether every mail was delivered.
    pub async fn send_custom(
        &mut self,
        subject: &str,
        body: &str,
        addresses: &[String],
    ) -> Result<bool, AppError> {
        let state = self.state;
        let mut message = Message::custom(&state.pool, &state.config, subject, body).await?;

        let mut delivered = !addresses.is_empty();
        for email in addresses {
            if !self.send_to_user(&mut message, User::transient(email)).await? {
                delivered = false;
            }
        }
        Ok(delivered)
    }

    /// Send a stored message to the `mailer.test` addresses with a `TEST`
    /// subject. Returns the number of mails delivered.
    pub async fn send_test(&mut self, message_id: i64) -> Result<usize, AppError> {
        let state = self.state;
        let pool = &state.pool;
        let mut message = Message::load(pool, &state.config, message_id, true, false).await?;
        message.set_test(true);

        let mut sent = 0;
        for email in test_addresses(&state.config) {
            let user = User::load_by_email(pool, &email)
                .await?
                .unwrap_or_else(|| User::transient(&email));
            if self.send_to_user(&mut message, user).await? {
                sent += 1;
            }
        }
        Ok(sent)
    }
}

/// Addresses configured under `mailer.test` (a list or a single string).
pub fn test_addresses(config: &Configuration) -> Vec<String> {
    match config.get("mailer.test") {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str())
            .filter(|email| !email.is_empty())
            .map(str::to_string)
            .collect(),
        Some(serde_json::Value::String(email)) if !email.is_empty() => vec![email.clone()],
        _ => Vec::new(),
    }
}
