//! Connection pool and embedded migrations.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::DbError;

/// Shared by the graph store, the execution store and every worker task.
pub type DbPool = PgPool;

/// Open a pool of at most `max_connections`; callers wait up to
/// `acquire_timeout` for a free connection.
pub async fn create_pool(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<DbPool, DbError> {
    info!(max_connections, ?acquire_timeout, "connecting to workflow database");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Apply the migrations under `migrations/` at the workspace root, embedded
/// at build time.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbError> {
    let migrator = sqlx::migrate!("../../migrations");
    info!(available = migrator.iter().count(), "applying workflow schema migrations");
    migrator.run(pool).await?;
    Ok(())
}
