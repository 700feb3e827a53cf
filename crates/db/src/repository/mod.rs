//! Repository functions, one per database operation.
//!
//! Every function takes a `&DbPool` and returns a `Result<T, DbError>`.
//! Rows in, rows out: domain mapping happens in the engine's `PgStore`.

pub mod workflows;
pub mod executions;
