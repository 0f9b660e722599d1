//! Database connection pool, migrations and schema conformance.
//!
//! Core tables come from SQL migrations in `migrations/`. Tables described by
//! the schema layer (see [`crate::schema`]) are created afterwards from their
//! definitions.

use crate::schema;
use sqlx::{Pool, Postgres};

/// Type alias for PostgreSQL connection pool.
pub type DbPool = Pool<Postgres>;

/// Create a new PostgreSQL connection pool.
///
/// # Configuration
///
/// - Maximum connections: 5
/// - Connections are created lazily as needed
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
}

/// Run database migrations from the `migrations/` directory.
///
/// Migrations are tracked in `_sqlx_migrations`, so each file runs once.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Create every table registered with the schema layer if it does not exist yet.
pub async fn conform_schemas(pool: &DbPool) -> Result<(), sqlx::Error> {
    for definition in schema::registered() {
        tracing::debug!(table = definition.table(), "Conforming schema");
        sqlx::query(&definition.create_table_sql())
            .execute(pool)
            .await?;
        for statement in definition.index_sql() {
            sqlx::query(&statement).execute(pool).await?;
        }
    }
    Ok(())
}
