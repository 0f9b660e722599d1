//! Many-to-many link tables edited from the admin tables, such as
//! `role_permission` (role → permission) and `message_message_list`
//! (message → mailing list).

use crate::{db::DbPool, error::AppError, query::quote_identifier};
use serde::Serialize;

/// How a row of the edited table links to rows of `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTable {
    /// Label for the option list.
    pub display_name: &'static str,
    /// Link table holding `(owner_key, target_key)` pairs.
    pub index: &'static str,
    pub owner_key: &'static str,
    pub target: &'static str,
    pub target_key: &'static str,
    pub display_column: &'static str,
}

/// A row of the target table offered as an option.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, PartialEq, Eq)]
pub struct LinkOption {
    pub id: i64,
    pub name: String,
}

impl LinkTable {
    fn options_sql(&self) -> String {
        format!(
            "SELECT {key} AS id, {display}::text AS name FROM {target} ORDER BY {display}",
            key = quote_identifier(self.target_key),
            display = quote_identifier(self.display_column),
            target = quote_identifier(self.target),
        )
    }

    fn linked_sql(&self) -> String {
        format!(
            "SELECT {target_key} FROM {index} WHERE {owner_key} = $1 ORDER BY {target_key}",
            target_key = quote_identifier(self.target_key),
            index = quote_identifier(self.index),
            owner_key = quote_identifier(self.owner_key),
        )
    }

    /// Every row that can be linked.
    pub async fn options(&self, pool: &DbPool) -> Result<Vec<LinkOption>, AppError> {
        Ok(sqlx::query_as::<_, LinkOption>(&self.options_sql())
            .fetch_all(pool)
            .await?)
    }

    /// IDs linked to `owner_id`.
    pub async fn linked(&self, pool: &DbPool, owner_id: i64) -> Result<Vec<i64>, AppError> {
        Ok(sqlx::query_scalar::<_, i64>(&self.linked_sql())
            .bind(owner_id)
            .fetch_all(pool)
            .await?)
    }

    /// Replace the links of `owner_id`.
    pub async fn set_links(
        &self,
        pool: &DbPool,
        owner_id: i64,
        target_ids: &[i64],
    ) -> Result<(), AppError> {
        let index = quote_identifier(self.index);
        let owner_key = quote_identifier(self.owner_key);
        let target_key = quote_identifier(self.target_key);
        let mut tx = pool.begin().await?;

        sqlx::query(&format!("DELETE FROM {} WHERE {} = $1", index, owner_key))
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;

        let insert = format!(
            "INSERT INTO {} ({}, {}) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            index, owner_key, target_key
        );
        for target_id in target_ids {
            sqlx::query(&insert)
                .bind(owner_id)
                .bind(target_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        tracing::info!(index = self.index, owner_id, links = target_ids.len(), "Links updated");
        Ok(())
    }
}
