//! `db` crate — Postgres persistence for workflows, execution instances and
//! execution logs.
//!
//! Row types mirror `migrations/0001_workflow_engine.sql` column for column;
//! the engine's `PgStore` maps them to domain types.

pub mod error;
pub mod models;
pub mod pool;
pub mod repository;

pub use error::DbError;
pub use pool::{create_pool, run_migrations, DbPool};
