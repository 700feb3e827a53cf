//! Workflow graph operations.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    DbError,
    models::{EdgeRow, NodeRow, WorkflowRow},
};

const WORKFLOW_COLUMNS: &str = "id, tenant_id, name, is_active, version, created_at, updated_at";

/// Insert or replace a workflow together with its whole graph, in one
/// transaction.
///
/// Nodes are upserted by id so unchanged nodes keep their identity (and the
/// log rows pointing at them); nodes missing from `nodes` are deleted, which
/// nulls the log rows' back-references. Edges are replaced wholesale. The
/// stored `version` is bumped.
///
/// A node or edge id already owned by another workflow fails the whole save
/// with [`DbError::OwnedElsewhere`].
pub async fn save_graph(
    pool: &PgPool,
    workflow: &WorkflowRow,
    nodes: &[NodeRow],
    edges: &[EdgeRow],
) -> Result<WorkflowRow, DbError> {
    let mut tx = pool.begin().await?;
    let now = Utc::now();

    let row = sqlx::query_as::<_, WorkflowRow>(&format!(
        r#"
        INSERT INTO workflows (id, tenant_id, name, is_active, version, created_at, updated_at)
        VALUES ($1, $2, $3, $4, 1, $5, $5)
        ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                is_active = EXCLUDED.is_active,
                version = workflows.version + 1,
                updated_at = EXCLUDED.updated_at
            WHERE workflows.tenant_id = EXCLUDED.tenant_id
        RETURNING {WORKFLOW_COLUMNS}
        "#
    ))
    .bind(workflow.id)
    .bind(workflow.tenant_id)
    .bind(&workflow.name)
    .bind(workflow.is_active)
    .bind(now)
    .fetch_optional(&mut *tx)
    .await?
    // The conflict guard only fails when the id belongs to another tenant.
    .ok_or(DbError::NotFound { table: "workflows", id: workflow.id })?;

    let keep: Vec<Uuid> = nodes.iter().map(|n| n.id).collect();

    sqlx::query("DELETE FROM workflow_edges WHERE workflow_id = $1")
        .bind(workflow.id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM workflow_nodes WHERE workflow_id = $1 AND NOT (id = ANY($2))")
        .bind(workflow.id)
        .bind(&keep)
        .execute(&mut *tx)
        .await?;

    for node in nodes {
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_nodes (id, workflow_id, config, position_x, position_y)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
                SET config = EXCLUDED.config,
                    position_x = EXCLUDED.position_x,
                    position_y = EXCLUDED.position_y
                WHERE workflow_nodes.workflow_id = EXCLUDED.workflow_id
            "#,
        )
        .bind(node.id)
        .bind(workflow.id)
        .bind(&node.config)
        .bind(node.position_x)
        .bind(node.position_y)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(DbError::OwnedElsewhere { table: "workflow_nodes", id: node.id });
        }
    }

    // This workflow's own edges are gone by now; a conflict means another
    // workflow holds the id.
    for edge in edges {
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_edges (id, workflow_id, source_node, target_node, condition_path)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(edge.id)
        .bind(workflow.id)
        .bind(edge.source_node)
        .bind(edge.target_node)
        .bind(&edge.condition_path)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(DbError::OwnedElsewhere { table: "workflow_edges", id: edge.id });
        }
    }

    tx.commit().await?;
    Ok(row)
}

/// Fetch a single workflow header by its primary key.
pub async fn get_workflow(pool: &PgPool, id: Uuid) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query_as::<_, WorkflowRow>(&format!(
        "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound { table: "workflows", id })?;

    Ok(row)
}

/// Active workflows owned by `tenant_id`, oldest first.
pub async fn list_active_workflows(pool: &PgPool, tenant_id: Uuid) -> Result<Vec<WorkflowRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
        "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE tenant_id = $1 AND is_active ORDER BY created_at ASC"
    ))
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn list_nodes(pool: &PgPool, workflow_id: Uuid) -> Result<Vec<NodeRow>, DbError> {
    let rows = sqlx::query_as::<_, NodeRow>(
        "SELECT id, workflow_id, config, position_x, position_y FROM workflow_nodes WHERE workflow_id = $1",
    )
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn list_edges(pool: &PgPool, workflow_id: Uuid) -> Result<Vec<EdgeRow>, DbError> {
    let rows = sqlx::query_as::<_, EdgeRow>(
        r#"
        SELECT id, workflow_id, source_node, target_node, condition_path
        FROM workflow_edges
        WHERE workflow_id = $1
        "#,
    )
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
