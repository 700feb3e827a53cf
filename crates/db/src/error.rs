//! Error type shared by every repository function.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// A keyed lookup, update or delete matched no row.
    #[error("no row in '{table}' with id {id}")]
    NotFound { table: &'static str, id: Uuid },

    /// An upsert hit an id owned by a different workflow.
    #[error("'{table}' row {id} belongs to another workflow")]
    OwnedElsewhere { table: &'static str, id: Uuid },

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}
