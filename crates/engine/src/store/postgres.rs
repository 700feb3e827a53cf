//! Postgres-backed stores, built on the `db` crate's repository functions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use db::models::{EdgeRow, ExecutionInstanceRow, ExecutionLogRow, NewExecutionLog, NodeRow, WorkflowRow};
use db::repository::{executions, workflows};
use db::{DbError, DbPool};

use super::{ExecutionStore, GraphStore};
use crate::error::ErrorKind;
use crate::models::{
    Edge, ExecutionInstance, ExecutionLog, ExecutionStatus, GraphSnapshot, LogEntry, Node, Position,
    Workflow,
};
use crate::EngineError;

/// Both stores over one connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_workflow(&self, row: WorkflowRow) -> Result<Workflow, EngineError> {
        let nodes = workflows::list_nodes(&self.pool, row.id)
            .await?
            .into_iter()
            .map(node_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let edges = workflows::list_edges(&self.pool, row.id)
            .await?
            .into_iter()
            .map(edge_from_row)
            .collect();

        Ok(Workflow {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            is_active: row.is_active,
            version: row.version,
            nodes,
            edges,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    async fn owned_header(&self, tenant_id: Uuid, workflow_id: Uuid) -> Result<WorkflowRow, EngineError> {
        let row = workflows::get_workflow(&self.pool, workflow_id).await.map_err(not_found)?;
        if row.tenant_id != tenant_id {
            return Err(EngineError::TenantMismatch {
                entity: "workflow",
                id: workflow_id,
                tenant_id,
            });
        }
        Ok(row)
    }
}

// ---------------------------------------------------------------------------
// GraphStore
// ---------------------------------------------------------------------------

#[async_trait]
impl GraphStore for PgStore {
    async fn persist_workflow(&self, workflow: Workflow) -> Result<Workflow, EngineError> {
        match self.owned_header(workflow.tenant_id, workflow.id).await {
            Ok(_) | Err(EngineError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let header = WorkflowRow {
            id: workflow.id,
            tenant_id: workflow.tenant_id,
            name: workflow.name.clone(),
            is_active: workflow.is_active,
            version: workflow.version,
            created_at: workflow.created_at,
            updated_at: workflow.updated_at,
        };
        let nodes = workflow
            .nodes
            .iter()
            .map(|n| {
                Ok(NodeRow {
                    id: n.id,
                    workflow_id: workflow.id,
                    config: serde_json::to_value(&n.config)?,
                    position_x: n.position.x,
                    position_y: n.position.y,
                })
            })
            .collect::<Result<Vec<_>, EngineError>>()?;
        let edges: Vec<EdgeRow> = workflow
            .edges
            .iter()
            .map(|e| EdgeRow {
                id: e.id,
                workflow_id: workflow.id,
                source_node: e.source,
                target_node: e.target,
                condition_path: e.condition_path.clone(),
            })
            .collect();

        let saved = workflows::save_graph(&self.pool, &header, &nodes, &edges)
            .await
            .map_err(|e| match e {
                DbError::OwnedElsewhere { table, id } => EngineError::TenantMismatch {
                    entity: if table == "workflow_edges" { "edge" } else { "node" },
                    id,
                    tenant_id: workflow.tenant_id,
                },
                other => not_found(other),
            })?;

        Ok(Workflow {
            version: saved.version,
            created_at: saved.created_at,
            updated_at: saved.updated_at,
            ..workflow
        })
    }

    async fn get_workflow(&self, tenant_id: Uuid, workflow_id: Uuid) -> Result<Workflow, EngineError> {
        let row = self.owned_header(tenant_id, workflow_id).await?;
        self.load_workflow(row).await
    }

    async fn list_active_workflows(&self, tenant_id: Uuid) -> Result<Vec<Workflow>, EngineError> {
        let rows = workflows::list_active_workflows(&self.pool, tenant_id).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(self.load_workflow(row).await?);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// ExecutionStore
// ---------------------------------------------------------------------------

#[async_trait]
impl ExecutionStore for PgStore {
    async fn create_instance(&self, instance: &ExecutionInstance) -> Result<(), EngineError> {
        executions::create_instance(&self.pool, &instance_to_row(instance)?).await?;
        Ok(())
    }

    async fn get_instance(&self, id: Uuid) -> Result<ExecutionInstance, EngineError> {
        let row = executions::get_instance(&self.pool, id).await.map_err(not_found)?;
        instance_from_row(row)
    }

    async fn update_instance(&self, instance: &ExecutionInstance) -> Result<(), EngineError> {
        executions::update_instance(&self.pool, &instance_to_row(instance)?)
            .await
            .map_err(not_found)
    }

    async fn request_cancel(&self, id: Uuid) -> Result<bool, EngineError> {
        Ok(executions::request_cancel(&self.pool, id).await?)
    }

    async fn claim_continuation(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<ExecutionInstance>, EngineError> {
        executions::claim_continuation(&self.pool, id, now)
            .await?
            .map(instance_from_row)
            .transpose()
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>, EngineError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(executions::list_due(&self.pool, now, limit).await?)
    }

    async fn append_log(&self, entry: LogEntry) -> Result<ExecutionLog, EngineError> {
        let row = executions::append_log(
            &self.pool,
            &NewExecutionLog {
                instance_id: entry.instance_id,
                node_id: entry.node_id,
                log_message: entry.log_message,
                branch: entry.branch,
                input_data: entry.input_data,
                output_data: entry.output_data,
                is_error: entry.is_error,
            },
        )
        .await?;
        Ok(log_from_row(row))
    }

    async fn list_logs(&self, instance_id: Uuid) -> Result<Vec<ExecutionLog>, EngineError> {
        let rows = executions::list_logs(&self.pool, instance_id).await?;
        Ok(rows.into_iter().map(log_from_row).collect())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn not_found(err: DbError) -> EngineError {
    match err {
        DbError::NotFound { table, id } => EngineError::NotFound { entity: table, id },
        other => EngineError::Database(other),
    }
}

fn object(value: Value, column: &str) -> Result<Map<String, Value>, EngineError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(EngineError::InvalidRecord(format!(
            "{column} must be a JSON object, got {other}"
        ))),
    }
}

fn node_from_row(row: NodeRow) -> Result<Node, EngineError> {
    Ok(Node {
        id: row.id,
        config: serde_json::from_value(row.config)?,
        position: Position {
            x: row.position_x,
            y: row.position_y,
        },
    })
}

fn edge_from_row(row: EdgeRow) -> Edge {
    Edge {
        id: row.id,
        source: row.source_node,
        target: row.target_node,
        condition_path: row.condition_path,
    }
}

fn instance_to_row(instance: &ExecutionInstance) -> Result<ExecutionInstanceRow, EngineError> {
    Ok(ExecutionInstanceRow {
        id: instance.id,
        workflow_id: instance.workflow_id,
        tenant_id: instance.tenant_id,
        status: instance.status.to_string(),
        trigger_context: Value::Object(instance.trigger_context.clone()),
        context: Value::Object(instance.context.clone()),
        graph: serde_json::to_value(&instance.graph)?,
        graph_version: instance.graph.version,
        next_node: instance.next_node,
        resume_at: instance.resume_at,
        cancel_requested: instance.cancel_requested,
        error_kind: instance.error_kind.map(|k| k.as_str().to_owned()),
        started_at: instance.started_at,
        finished_at: instance.finished_at,
    })
}

fn instance_from_row(row: ExecutionInstanceRow) -> Result<ExecutionInstance, EngineError> {
    let graph: GraphSnapshot = serde_json::from_value(row.graph)?;
    Ok(ExecutionInstance {
        id: row.id,
        workflow_id: row.workflow_id,
        tenant_id: row.tenant_id,
        status: row.status.parse::<ExecutionStatus>().map_err(EngineError::InvalidRecord)?,
        trigger_context: object(row.trigger_context, "trigger_context")?,
        context: object(row.context, "context")?,
        graph,
        next_node: row.next_node,
        resume_at: row.resume_at,
        cancel_requested: row.cancel_requested,
        error_kind: row
            .error_kind
            .map(|k| k.parse::<ErrorKind>())
            .transpose()
            .map_err(EngineError::InvalidRecord)?,
        started_at: row.started_at,
        finished_at: row.finished_at,
    })
}

fn log_from_row(row: ExecutionLogRow) -> ExecutionLog {
    ExecutionLog {
        id: row.id,
        instance_id: row.instance_id,
        sequence: row.sequence,
        node_id: row.node_id,
        log_message: row.log_message,
        branch: row.branch,
        input_data: row.input_data,
        output_data: row.output_data,
        is_error: row.is_error,
        executed_at: row.executed_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodes::{ActionOperation, NodeConfig};
    use serde_json::json;

    /// A migrated store on `DATABASE_URL`; `None` (test skipped) when unset.
    async fn live_store() -> Option<PgStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = db::create_pool(&url, 2, std::time::Duration::from_secs(5))
            .await
            .expect("DATABASE_URL should be reachable");
        db::run_migrations(&pool).await.expect("migrations apply");
        Some(PgStore::new(pool))
    }

    fn trigger() -> Node {
        Node::new(NodeConfig::Trigger { event_type: "lead.created".into() })
    }

    fn instance() -> ExecutionInstance {
        let trigger = Node::new(NodeConfig::Trigger { event_type: "lead.created".into() });
        let workflow = Workflow::new(Uuid::new_v4(), "wf", vec![trigger], vec![]);
        let mut context = Map::new();
        context.insert("value".into(), json!(12000));
        ExecutionInstance {
            id: Uuid::new_v4(),
            workflow_id: workflow.id,
            tenant_id: workflow.tenant_id,
            status: ExecutionStatus::Failed,
            trigger_context: context.clone(),
            context,
            graph: GraphSnapshot::from(&workflow),
            next_node: None,
            resume_at: None,
            cancel_requested: false,
            error_kind: Some(ErrorKind::HandlerExecution),
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
        }
    }

    #[test]
    fn instance_row_mapping_preserves_fields() {
        let original = instance();
        let row = instance_to_row(&original).unwrap();
        assert_eq!(row.status, "failed");
        assert_eq!(row.error_kind.as_deref(), Some("handler_execution"));
        assert_eq!(instance_from_row(row).unwrap(), original);
    }

    #[test]
    fn non_object_context_is_rejected() {
        let mut row = instance_to_row(&instance()).unwrap();
        row.context = json!([1, 2, 3]);
        assert!(matches!(instance_from_row(row), Err(EngineError::InvalidRecord(_))));
    }

    #[tokio::test]
    async fn node_id_owned_by_another_tenant_cannot_be_overwritten() {
        let Some(store) = live_store().await else { return };

        let entry = trigger();
        let email = Node::new(NodeConfig::Action {
            action: ActionOperation::SendEmail {
                to: "{{email}}".into(),
                template: "owner-template".into(),
                subject: None,
            },
        });
        let edges = vec![Edge::new(entry.id, email.id)];
        let owner = store
            .save_workflow(Workflow::new(Uuid::new_v4(), "owner", vec![entry, email.clone()], edges))
            .await
            .unwrap();

        let other_entry = trigger();
        let mut values = Map::new();
        values.insert("overwritten".into(), json!(true));
        let mut reused = Node::new(NodeConfig::Action { action: ActionOperation::SetFields { values } });
        reused.id = email.id;
        let edges = vec![Edge::new(other_entry.id, reused.id)];
        let other = Workflow::new(Uuid::new_v4(), "other", vec![other_entry, reused], edges);

        let err = store.save_workflow(other.clone()).await.unwrap_err();
        assert!(matches!(err, EngineError::TenantMismatch { entity: "node", id, .. } if id == email.id));

        let reloaded = store.get_workflow(owner.tenant_id, owner.id).await.unwrap();
        let kept = reloaded.nodes.iter().find(|n| n.id == email.id).unwrap();
        assert_eq!(kept.config, email.config);
        // The rejected save was rolled back as a whole.
        assert!(matches!(
            store.get_workflow(other.tenant_id, other.id).await,
            Err(EngineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn edge_id_owned_by_another_workflow_is_rejected() {
        let Some(store) = live_store().await else { return };

        let (a, b) = (trigger(), trigger());
        let mut values = Map::new();
        values.insert("step".into(), json!(1));
        let action = Node::new(NodeConfig::Action { action: ActionOperation::SetFields { values: values.clone() } });
        let edge = Edge::new(a.id, action.id);
        let tenant = Uuid::new_v4();
        store
            .save_workflow(Workflow::new(tenant, "first", vec![a, action], vec![edge.clone()]))
            .await
            .unwrap();

        let other_action = Node::new(NodeConfig::Action { action: ActionOperation::SetFields { values } });
        let mut reused = Edge::new(b.id, other_action.id);
        reused.id = edge.id;
        let err = store
            .save_workflow(Workflow::new(tenant, "second", vec![b, other_action], vec![reused]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TenantMismatch { entity: "edge", id, .. } if id == edge.id));
    }

    #[tokio::test]
    async fn deleting_the_only_trigger_leaves_the_graph_unchanged() {
        let Some(store) = live_store().await else { return };

        let entry = trigger();
        let mut values = Map::new();
        values.insert("step".into(), json!(1));
        let action = Node::new(NodeConfig::Action { action: ActionOperation::SetFields { values } });
        let edges = vec![Edge::new(entry.id, action.id)];
        let entry_id = entry.id;
        let tenant = Uuid::new_v4();
        let saved = store
            .save_workflow(Workflow::new(tenant, "wf", vec![entry, action], edges))
            .await
            .unwrap();

        let err = store.delete_node(tenant, saved.id, entry_id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GraphConfiguration);

        let reloaded = store.get_workflow(tenant, saved.id).await.unwrap();
        assert_eq!(reloaded.nodes.len(), 2);
        assert_eq!(reloaded.version, saved.version);
    }

    #[test]
    fn db_not_found_maps_to_engine_not_found() {
        let id = Uuid::new_v4();
        let err = not_found(DbError::NotFound { table: "workflows", id });
        assert!(matches!(err, EngineError::NotFound { entity: "workflows", id: got } if got == id));
    }
}
