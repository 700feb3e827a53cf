//! In-process store. All state lives behind one mutex; no call holds it
//! across an await point.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{ExecutionStore, GraphStore};
use crate::models::{ExecutionInstance, ExecutionLog, ExecutionStatus, LogEntry, Workflow};
use crate::EngineError;

#[derive(Default)]
struct State {
    workflows: HashMap<Uuid, Workflow>,
    instances: HashMap<Uuid, ExecutionInstance>,
    logs: HashMap<Uuid, Vec<ExecutionLog>>,
}

/// Both stores in one in-memory value.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means another test thread panicked mid-write.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn owned_by(workflow: &Workflow, tenant_id: Uuid) -> Result<(), EngineError> {
    if workflow.tenant_id != tenant_id {
        return Err(EngineError::TenantMismatch {
            entity: "workflow",
            id: workflow.id,
            tenant_id,
        });
    }
    Ok(())
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn persist_workflow(&self, mut workflow: Workflow) -> Result<Workflow, EngineError> {
        let mut state = self.lock();
        claimed_elsewhere(&state, &workflow)?;
        let now = Utc::now();
        match state.workflows.get(&workflow.id) {
            Some(existing) => {
                owned_by(existing, workflow.tenant_id)?;
                workflow.version = existing.version + 1;
                workflow.created_at = existing.created_at;
            }
            None => {
                workflow.version = 1;
            }
        }
        workflow.updated_at = now;

        // Nodes that disappear in this save lose their log back-references.
        let removed: Vec<Uuid> = state
            .workflows
            .get(&workflow.id)
            .map(|previous| {
                previous
                    .nodes
                    .iter()
                    .map(|n| n.id)
                    .filter(|id| !workflow.nodes.iter().any(|n| n.id == *id))
                    .collect()
            })
            .unwrap_or_default();
        detach_logs(&mut state, &removed);

        state.workflows.insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn get_workflow(&self, tenant_id: Uuid, workflow_id: Uuid) -> Result<Workflow, EngineError> {
        let state = self.lock();
        let workflow = state
            .workflows
            .get(&workflow_id)
            .ok_or(EngineError::NotFound { entity: "workflow", id: workflow_id })?;
        owned_by(workflow, tenant_id)?;
        Ok(workflow.clone())
    }

    async fn list_active_workflows(&self, tenant_id: Uuid) -> Result<Vec<Workflow>, EngineError> {
        let state = self.lock();
        let mut workflows: Vec<Workflow> = state
            .workflows
            .values()
            .filter(|w| w.tenant_id == tenant_id && w.is_active)
            .cloned()
            .collect();
        workflows.sort_by_key(|w| w.created_at);
        Ok(workflows)
    }
}

/// Node and edge ids belong to exactly one workflow.
fn claimed_elsewhere(state: &State, workflow: &Workflow) -> Result<(), EngineError> {
    for other in state.workflows.values().filter(|w| w.id != workflow.id) {
        let taken_node = workflow.nodes.iter().find(|n| other.nodes.iter().any(|o| o.id == n.id));
        if let Some(node) = taken_node {
            return Err(EngineError::TenantMismatch {
                entity: "node",
                id: node.id,
                tenant_id: workflow.tenant_id,
            });
        }
        let taken_edge = workflow.edges.iter().find(|e| other.edges.iter().any(|o| o.id == e.id));
        if let Some(edge) = taken_edge {
            return Err(EngineError::TenantMismatch {
                entity: "edge",
                id: edge.id,
                tenant_id: workflow.tenant_id,
            });
        }
    }
    Ok(())
}

fn detach_logs(state: &mut State, node_ids: &[Uuid]) {
    if node_ids.is_empty() {
        return;
    }
    for log in state.logs.values_mut().flatten() {
        if log.node_id.is_some_and(|id| node_ids.contains(&id)) {
            log.node_id = None;
        }
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn create_instance(&self, instance: &ExecutionInstance) -> Result<(), EngineError> {
        self.lock().instances.insert(instance.id, instance.clone());
        Ok(())
    }

    async fn get_instance(&self, id: Uuid) -> Result<ExecutionInstance, EngineError> {
        self.lock()
            .instances
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound { entity: "execution instance", id })
    }

    async fn update_instance(&self, instance: &ExecutionInstance) -> Result<(), EngineError> {
        let mut state = self.lock();
        let stored = state
            .instances
            .get_mut(&instance.id)
            .ok_or(EngineError::NotFound { entity: "execution instance", id: instance.id })?;
        let cancel_requested = stored.cancel_requested;
        *stored = instance.clone();
        stored.cancel_requested = cancel_requested;
        Ok(())
    }

    async fn request_cancel(&self, id: Uuid) -> Result<bool, EngineError> {
        let mut state = self.lock();
        match state.instances.get_mut(&id) {
            Some(instance) if instance.status == ExecutionStatus::Running => {
                instance.cancel_requested = true;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(EngineError::NotFound { entity: "execution instance", id }),
        }
    }

    async fn claim_continuation(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<ExecutionInstance>, EngineError> {
        let mut state = self.lock();
        let Some(instance) = state.instances.get_mut(&id) else {
            return Ok(None);
        };
        let due = instance.status == ExecutionStatus::Running
            && instance.resume_at.is_some_and(|at| at <= now);
        if !due {
            return Ok(None);
        }
        instance.resume_at = None;
        Ok(Some(instance.clone()))
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>, EngineError> {
        let state = self.lock();
        let mut due: Vec<(DateTime<Utc>, Uuid)> = state
            .instances
            .values()
            .filter(|i| i.status == ExecutionStatus::Running)
            .filter_map(|i| i.resume_at.filter(|at| *at <= now).map(|at| (at, i.id)))
            .collect();
        due.sort();
        Ok(due.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    async fn append_log(&self, entry: LogEntry) -> Result<ExecutionLog, EngineError> {
        let mut state = self.lock();

        // Same rule as the database's foreign key: a node that no longer
        // exists in any workflow is recorded as absent.
        let node_id = entry.node_id.filter(|id| {
            state.workflows.values().any(|w| w.nodes.iter().any(|n| n.id == *id))
        });

        let rows = state.logs.entry(entry.instance_id).or_default();
        let log = ExecutionLog {
            id: Uuid::new_v4(),
            instance_id: entry.instance_id,
            sequence: rows.len() as i64 + 1,
            node_id,
            log_message: entry.log_message,
            branch: entry.branch,
            input_data: entry.input_data,
            output_data: entry.output_data,
            is_error: entry.is_error,
            executed_at: Utc::now(),
        };
        rows.push(log.clone());
        Ok(log)
    }

    async fn list_logs(&self, instance_id: Uuid) -> Result<Vec<ExecutionLog>, EngineError> {
        Ok(self.lock().logs.get(&instance_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Edge, Node};
    use nodes::{ActionOperation, NodeConfig};
    use serde_json::{json, Map};

    fn workflow(tenant_id: Uuid) -> Workflow {
        let trigger = Node::new(NodeConfig::Trigger { event_type: "lead.created".into() });
        let mut values = Map::new();
        values.insert("stage".into(), json!("new"));
        let action = Node::new(NodeConfig::Action { action: ActionOperation::SetFields { values } });
        let edges = vec![Edge::new(trigger.id, action.id)];
        Workflow::new(tenant_id, "wf", vec![trigger, action], edges)
    }

    #[tokio::test]
    async fn save_bumps_version() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let saved = store.save_workflow(workflow(tenant)).await.unwrap();
        assert_eq!(saved.version, 1);
        let again = store.save_workflow(saved).await.unwrap();
        assert_eq!(again.version, 2);
    }

    #[tokio::test]
    async fn foreign_tenant_is_rejected() {
        let store = MemoryStore::new();
        let saved = store.save_workflow(workflow(Uuid::new_v4())).await.unwrap();
        let err = store.get_workflow(Uuid::new_v4(), saved.id).await.unwrap_err();
        assert!(matches!(err, EngineError::TenantMismatch { .. }));

        let mut hijack = saved.clone();
        hijack.tenant_id = Uuid::new_v4();
        assert!(matches!(
            store.save_workflow(hijack).await,
            Err(EngineError::TenantMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn inactive_workflow_has_no_graph() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let mut wf = workflow(tenant);
        wf.is_active = false;
        let saved = store.save_workflow(wf).await.unwrap();
        assert!(store.list_active_workflows(tenant).await.unwrap().is_empty());
        assert!(matches!(
            store.load_graph(tenant, saved.id).await,
            Err(EngineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn delete_unknown_node_is_not_found() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let saved = store.save_workflow(workflow(tenant)).await.unwrap();
        assert!(matches!(
            store.delete_node(tenant, saved.id, Uuid::new_v4()).await,
            Err(EngineError::NotFound { entity: "node", .. })
        ));
    }

    #[tokio::test]
    async fn node_id_of_another_workflow_cannot_be_reused() {
        let store = MemoryStore::new();
        let owner = store.save_workflow(workflow(Uuid::new_v4())).await.unwrap();
        let owned = owner.nodes[1].clone();

        let mut other = workflow(Uuid::new_v4());
        let original = other.nodes[1].id;
        other.nodes[1].id = owned.id;
        for edge in &mut other.edges {
            if edge.target == original {
                edge.target = owned.id;
            }
        }
        let err = store.save_workflow(other).await.unwrap_err();
        assert!(matches!(err, EngineError::TenantMismatch { entity: "node", id, .. } if id == owned.id));

        let reloaded = store.get_workflow(owner.tenant_id, owner.id).await.unwrap();
        assert_eq!(reloaded.nodes[1], owned);
    }

    #[tokio::test]
    async fn delete_that_breaks_the_graph_is_rejected() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let saved = store.save_workflow(workflow(tenant)).await.unwrap();
        let only_trigger = saved.nodes[0].id;

        let err = store.delete_node(tenant, saved.id, only_trigger).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::GraphConfiguration);

        let reloaded = store.get_workflow(tenant, saved.id).await.unwrap();
        assert_eq!(reloaded.nodes.len(), 2);
        assert_eq!(reloaded.edges.len(), 1);
        assert_eq!(reloaded.version, saved.version);

        // Removing the action leaves a valid single-trigger workflow.
        let edited = store.delete_node(tenant, saved.id, saved.nodes[1].id).await.unwrap();
        assert_eq!(edited.nodes.len(), 1);
        assert!(edited.edges.is_empty());
        assert_eq!(edited.version, saved.version + 1);
    }
}
