//! Social network sign-in.
//!
//! A successful sign-in links the network account to a site user in the
//! `user_social` table.

pub mod google;

use crate::{db::DbPool, error::AppError};
use serde::Serialize;

/// A network account linked to a user.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct SocialAuthorization {
    pub user_id: i64,
    pub network: String,
    pub network_user_id: String,
    pub name: String,
    pub screen_name: String,
}

/// Link (or relink) a network account to a user.
pub async fn save_authorization(
    pool: &DbPool,
    user_id: i64,
    network: &str,
    network_user_id: &str,
    token: &str,
    name: &str,
    screen_name: &str,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO user_social (user_id, network, network_user_id, token, name, screen_name)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (network, network_user_id) DO UPDATE SET
            user_id = EXCLUDED.user_id,
            token = EXCLUDED.token,
            name = EXCLUDED.name,
            screen_name = EXCLUDED.screen_name
        "#,
    )
    .bind(user_id)
    .bind(network)
    .bind(network_user_id)
    .bind(token)
    .bind(name)
    .bind(screen_name)
    .execute(pool)
    .await?;

    tracing::info!(user_id, network, "Social account linked");
    Ok(())
}

pub async fn load_authorizations(
    pool: &DbPool,
    user_id: i64,
) -> Result<Vec<SocialAuthorization>, AppError> {
    Ok(sqlx::query_as::<_, SocialAuthorization>(
        r#"
        SELECT user_id, network, network_user_id, name, screen_name
        FROM user_social WHERE user_id = $1 ORDER BY network
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?)
}
