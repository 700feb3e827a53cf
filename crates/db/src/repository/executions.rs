//! Execution instance and execution log repository functions.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    DbError,
    models::{ExecutionInstanceRow, ExecutionLogRow, NewExecutionLog},
};

const INSTANCE_COLUMNS: &str = "id, workflow_id, tenant_id, status, trigger_context, context, graph, \
     graph_version, next_node, resume_at, cancel_requested, error_kind, started_at, finished_at";

const LOG_COLUMNS: &str = "id, instance_id, sequence, node_id, log_message, branch, input_data, \
     output_data, is_error, executed_at";

// ---------------------------------------------------------------------------
// execution_instances
// ---------------------------------------------------------------------------

/// Insert a new instance row exactly as given.
pub async fn create_instance(
    pool: &PgPool,
    row: &ExecutionInstanceRow,
) -> Result<ExecutionInstanceRow, DbError> {
    let created = sqlx::query_as::<_, ExecutionInstanceRow>(&format!(
        r#"
        INSERT INTO execution_instances ({INSTANCE_COLUMNS})
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING {INSTANCE_COLUMNS}
        "#
    ))
    .bind(row.id)
    .bind(row.workflow_id)
    .bind(row.tenant_id)
    .bind(&row.status)
    .bind(&row.trigger_context)
    .bind(&row.context)
    .bind(&row.graph)
    .bind(row.graph_version)
    .bind(row.next_node)
    .bind(row.resume_at)
    .bind(row.cancel_requested)
    .bind(&row.error_kind)
    .bind(row.started_at)
    .bind(row.finished_at)
    .fetch_one(pool)
    .await?;

    Ok(created)
}

pub async fn get_instance(pool: &PgPool, id: Uuid) -> Result<ExecutionInstanceRow, DbError> {
    let row = sqlx::query_as::<_, ExecutionInstanceRow>(&format!(
        "SELECT {INSTANCE_COLUMNS} FROM execution_instances WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound { table: "execution_instances", id })?;

    Ok(row)
}

/// Persist the engine-driven fields of an instance.
///
/// `cancel_requested` is owned by [`request_cancel`] and never written here.
pub async fn update_instance(pool: &PgPool, row: &ExecutionInstanceRow) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        UPDATE execution_instances
        SET status = $1,
            context = $2,
            next_node = $3,
            resume_at = $4,
            error_kind = $5,
            finished_at = $6
        WHERE id = $7
        "#,
    )
    .bind(&row.status)
    .bind(&row.context)
    .bind(row.next_node)
    .bind(row.resume_at)
    .bind(&row.error_kind)
    .bind(row.finished_at)
    .bind(row.id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound { table: "execution_instances", id: row.id });
    }
    Ok(())
}

/// Flag a running instance for cancellation.
///
/// Returns `false` if the instance is not running.
pub async fn request_cancel(pool: &PgPool, id: Uuid) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE execution_instances SET cancel_requested = TRUE WHERE id = $1 AND status = 'running'",
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Atomically take ownership of a due continuation.
///
/// Clears `resume_at` and returns the row as it was claimed, or `None` when
/// the instance is not suspended, not yet due, or another worker got there
/// first.
pub async fn claim_continuation(
    pool: &PgPool,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<ExecutionInstanceRow>, DbError> {
    let row = sqlx::query_as::<_, ExecutionInstanceRow>(&format!(
        r#"
        UPDATE execution_instances
        SET resume_at = NULL
        WHERE id = $1
          AND status = 'running'
          AND resume_at IS NOT NULL
          AND resume_at <= $2
        RETURNING {INSTANCE_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(now)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// IDs of suspended instances whose resume time has passed, oldest first.
pub async fn list_due(pool: &PgPool, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>, DbError> {
    let ids = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT id FROM execution_instances
        WHERE status = 'running' AND resume_at IS NOT NULL AND resume_at <= $1
        ORDER BY resume_at ASC
        LIMIT $2
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

// ---------------------------------------------------------------------------
// execution_logs
// ---------------------------------------------------------------------------

/// Append a log row, assigning the next per-instance sequence number.
///
/// An instance is driven by one worker at a time, so the `MAX + 1` read
/// cannot race; the unique index backs that up. A `node_id` whose node has
/// since been deleted is stored as NULL.
pub async fn append_log(pool: &PgPool, log: &NewExecutionLog) -> Result<ExecutionLogRow, DbError> {
    let row = sqlx::query_as::<_, ExecutionLogRow>(&format!(
        r#"
        INSERT INTO execution_logs
            (id, instance_id, sequence, node_id, log_message, branch, input_data, output_data, is_error, executed_at)
        VALUES (
            $1, $2,
            (SELECT COALESCE(MAX(sequence), 0) + 1 FROM execution_logs WHERE instance_id = $2),
            (SELECT id FROM workflow_nodes WHERE id = $3),
            $4, $5, $6, $7, $8, $9
        )
        RETURNING {LOG_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(log.instance_id)
    .bind(log.node_id)
    .bind(&log.log_message)
    .bind(&log.branch)
    .bind(&log.input_data)
    .bind(&log.output_data)
    .bind(log.is_error)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// All log rows of an instance in execution order.
pub async fn list_logs(pool: &PgPool, instance_id: Uuid) -> Result<Vec<ExecutionLogRow>, DbError> {
    let rows = sqlx::query_as::<_, ExecutionLogRow>(&format!(
        "SELECT {LOG_COLUMNS} FROM execution_logs WHERE instance_id = $1 ORDER BY sequence ASC"
    ))
    .bind(instance_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
