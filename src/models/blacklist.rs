//! Blocked client addresses.
//!
//! Requests that change state (anything but a plain `get`) are refused for
//! blacklisted addresses.

use crate::{db::DbPool, error::AppError};

pub async fn is_blacklisted(pool: &DbPool, ip: &str) -> Result<bool, AppError> {
    Ok(
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM blacklist WHERE ip = $1)")
            .bind(ip)
            .fetch_one(pool)
            .await?,
    )
}

/// # Errors
///
/// `Blacklisted` when the address is on the list.
pub async fn check_blacklist(pool: &DbPool, ip: &str) -> Result<(), AppError> {
    if is_blacklisted(pool, ip).await? {
        tracing::warn!(ip, "Blacklisted address rejected");
        return Err(AppError::Blacklisted);
    }
    Ok(())
}
