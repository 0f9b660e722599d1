//! Site users.
//!
//! Users are created on demand (contact form, social login, list opt-in) and
//! keyed by email address. Each user carries a random salt used to derive the
//! URL key embedded in unsubscribe links.

use crate::{db::DbPool, error::AppError};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Permission that grants access to everything, including the admin pages.
pub const PERMISSION_ALL: &str = "all";

/// Represents a row of the `users` table.
#[derive(Debug, Clone, Default, sqlx::FromRow, Serialize)]
pub struct User {
    pub user_id: i64,
    pub email: String,
    pub first: String,
    pub last: String,
    #[serde(skip)]
    pub salt: String,
    pub created: i64,
}

/// First and last name as submitted on a form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameParts {
    pub first: String,
    pub last: String,
}

impl NameParts {
    /// Split a full name on the first space.
    pub fn from_full_name(name: &str) -> Self {
        let mut parts = name.trim().splitn(2, ' ');
        Self {
            first: parts.next().unwrap_or_default().to_string(),
            last: parts.next().unwrap_or_default().trim().to_string(),
        }
    }
}

impl User {
    /// A user that only exists for the duration of a send (e.g. a test address).
    pub fn transient(email: &str) -> Self {
        Self {
            email: email.to_string(),
            ..Self::default()
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first, self.last).trim().to_string()
    }

    /// Create the user or update the name of an existing one.
    ///
    /// Empty name parts never overwrite stored ones.
    pub async fn add_user(pool: &DbPool, email: &str, name: &NameParts) -> Result<Self, AppError> {
        let email = email.trim().to_lowercase();
        let salt = hex::encode(rand::random::<[u8; 16]>());

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, first, last, salt, created)
            VALUES ($1, $2, $3, $4, EXTRACT(EPOCH FROM NOW())::BIGINT)
            ON CONFLICT (email) DO UPDATE SET
                first = CASE WHEN EXCLUDED.first <> '' THEN EXCLUDED.first ELSE users.first END,
                last = CASE WHEN EXCLUDED.last <> '' THEN EXCLUDED.last ELSE users.last END
            RETURNING user_id, email, first, last, salt, created
            "#,
        )
        .bind(&email)
        .bind(&name.first)
        .bind(&name.last)
        .bind(&salt)
        .fetch_one(pool)
        .await?;

        tracing::debug!(user_id = user.user_id, "User added or updated");
        Ok(user)
    }

    pub async fn load_by_id(pool: &DbPool, user_id: i64) -> Result<Option<Self>, AppError> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT user_id, email, first, last, salt, created FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?)
    }

    pub async fn load_by_email(pool: &DbPool, email: &str) -> Result<Option<Self>, AppError> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT user_id, email, first, last, salt, created FROM users WHERE email = $1",
        )
        .bind(email.trim().to_lowercase())
        .fetch_optional(pool)
        .await?)
    }

    /// Key identifying a user in links without a session: `<id>.<digest>`.
    pub fn url_key(user_id: i64, salt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(b":");
        hasher.update(user_id.to_string().as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("{}.{}", user_id, &digest[..20])
    }

    /// Load the user a URL key belongs to, if the key is valid.
    pub async fn load_by_url_key(pool: &DbPool, key: &str) -> Result<Option<Self>, AppError> {
        let Some(user_id) = key
            .split_once('.')
            .and_then(|(id, _)| id.parse::<i64>().ok())
        else {
            return Ok(None);
        };

        let user = Self::load_by_id(pool, user_id).await?;
        Ok(user.filter(|user| Self::url_key(user.user_id, &user.salt) == key))
    }

    pub fn unsubscribe_link(&self, web_root: &str) -> String {
        format!(
            "{}/user?action=unsubscribe&u={}",
            web_root.trim_end_matches('/'),
            Self::url_key(self.user_id, &self.salt)
        )
    }

    /// Add the user to a mailing list. Subscribing twice is a no-op.
    pub async fn subscribe(&self, pool: &DbPool, list_id: i64) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO message_list_user (message_list_id, user_id, time)
            VALUES ($1, $2, EXTRACT(EPOCH FROM NOW())::BIGINT)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(list_id)
        .bind(self.user_id)
        .execute(pool)
        .await?;

        tracing::info!(user_id = self.user_id, list_id, "User subscribed");
        Ok(())
    }

    /// Remove the user from every mailing list.
    pub async fn unsubscribe_all(&self, pool: &DbPool) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM message_list_user WHERE user_id = $1")
            .bind(self.user_id)
            .execute(pool)
            .await?;

        tracing::info!(user_id = self.user_id, lists = result.rows_affected(), "User unsubscribed");
        Ok(result.rows_affected())
    }

    /// Whether any of the user's roles grants `permission` (or `all`).
    pub async fn has_permission(&self, pool: &DbPool, permission: &str) -> Result<bool, AppError> {
        Ok(sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM user_role
                JOIN role_permission USING (role_id)
                JOIN permission USING (permission_id)
                WHERE user_role.user_id = $1
                AND permission.name IN ($2, $3)
            )
            "#,
        )
        .bind(self.user_id)
        .bind(permission)
        .bind(PERMISSION_ALL)
        .fetch_one(pool)
        .await?)
    }

    pub async fn is_admin(&self, pool: &DbPool) -> Result<bool, AppError> {
        self.has_permission(pool, PERMISSION_ALL).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_full_names_on_first_space() {
        assert_eq!(
            NameParts::from_full_name("Ada King Lovelace"),
            NameParts {
                first: "Ada".into(),
                last: "King Lovelace".into()
            }
        );
        assert_eq!(NameParts::from_full_name("Ada").last, "");
    }

    #[test]
    fn url_key_depends_on_salt() {
        let a = User::url_key(12, "salt-a");
        let b = User::url_key(12, "salt-b");
        assert!(a.starts_with("12."));
        assert_eq!(a.len(), "12.".len() + 20);
        assert_ne!(a, b);
        assert_eq!(a, User::url_key(12, "salt-a"));
    }

    #[test]
    fn unsubscribe_link_uses_web_root() {
        let user = User {
            user_id: 3,
            salt: "s".into(),
            ..User::default()
        };
        let link = user.unsubscribe_link("https://example.com/");
        assert!(link.starts_with("https://example.com/user?action=unsubscribe&u=3."));
    }

    #[test]
    fn full_name_trims_missing_parts() {
        let user = User {
            first: "Ada".into(),
            ..User::default()
        };
        assert_eq!(user.full_name(), "Ada");
    }
}
