//! Persistence seams for workflow graphs and execution state.
//!
//! [`GraphStore`] owns workflow definitions, [`ExecutionStore`] owns
//! instances and their logs. The engine only ever talks to these traits;
//! [`MemoryStore`] backs tests and the `run` CLI command, [`PgStore`] backs
//! the worker.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::dag::validate_dag;
use crate::models::{ExecutionInstance, ExecutionLog, GraphSnapshot, LogEntry, Workflow};
use crate::EngineError;

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Write the workflow and its whole graph; returns it with the version
    /// the store assigned. Callers go through [`GraphStore::save_workflow`].
    async fn persist_workflow(&self, workflow: Workflow) -> Result<Workflow, EngineError>;

    /// Fetch a workflow regardless of its active flag.
    ///
    /// # Errors
    /// `NotFound` if it does not exist, `TenantMismatch` if it belongs to
    /// another tenant.
    async fn get_workflow(&self, tenant_id: Uuid, workflow_id: Uuid) -> Result<Workflow, EngineError>;

    async fn list_active_workflows(&self, tenant_id: Uuid) -> Result<Vec<Workflow>, EngineError>;

    /// Validate, then persist.
    async fn save_workflow(&self, workflow: Workflow) -> Result<Workflow, EngineError> {
        validate_dag(&workflow)?;
        self.persist_workflow(workflow).await
    }

    /// Remove one node and its edges, then save the result under the same
    /// rules as [`GraphStore::save_workflow`]. Log rows that referenced the
    /// node keep their content with `node_id` cleared.
    ///
    /// # Errors
    /// `NotFound` if the node is not in the workflow; any validation error
    /// the edited graph fails with (e.g. removing the only trigger of an
    /// active workflow), in which case nothing is written.
    async fn delete_node(&self, tenant_id: Uuid, workflow_id: Uuid, node_id: Uuid) -> Result<Workflow, EngineError> {
        let mut workflow = self.get_workflow(tenant_id, workflow_id).await?;
        let before = workflow.nodes.len();
        workflow.nodes.retain(|n| n.id != node_id);
        if workflow.nodes.len() == before {
            return Err(EngineError::NotFound { entity: "node", id: node_id });
        }
        workflow.edges.retain(|e| e.source != node_id && e.target != node_id);
        self.save_workflow(workflow).await
    }

    /// Snapshot of an active workflow's graph.
    ///
    /// # Errors
    /// `NotFound` if the workflow is missing or inactive.
    async fn load_graph(&self, tenant_id: Uuid, workflow_id: Uuid) -> Result<GraphSnapshot, EngineError> {
        let workflow = self.get_workflow(tenant_id, workflow_id).await?;
        if !workflow.is_active {
            return Err(EngineError::NotFound { entity: "workflow", id: workflow_id });
        }
        Ok(GraphSnapshot::from(&workflow))
    }
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create_instance(&self, instance: &ExecutionInstance) -> Result<(), EngineError>;

    async fn get_instance(&self, id: Uuid) -> Result<ExecutionInstance, EngineError>;

    /// Persist the engine-driven fields. Never clears `cancel_requested`.
    async fn update_instance(&self, instance: &ExecutionInstance) -> Result<(), EngineError>;

    /// Set `cancel_requested` on a running instance; `false` if it is not
    /// running.
    async fn request_cancel(&self, id: Uuid) -> Result<bool, EngineError>;

    /// Atomically take a suspended instance whose `resume_at <= now`,
    /// clearing `resume_at`. At most one caller wins.
    async fn claim_continuation(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<ExecutionInstance>, EngineError>;

    /// Suspended instances due at `now`, earliest first.
    async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>, EngineError>;

    /// Append a row with the next sequence number for its instance.
    async fn append_log(&self, entry: LogEntry) -> Result<ExecutionLog, EngineError>;

    async fn list_logs(&self, instance_id: Uuid) -> Result<Vec<ExecutionLog>, EngineError>;
}
