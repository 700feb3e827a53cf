//! Workflow execution engine.
//!
//! `ExecutionEngine` drives one instance at a time through its graph
//! snapshot:
//! 1. Checks for an operator cancellation at every node boundary.
//! 2. Dispatches the node to the handler for its type.
//! 3. Resolves the next node from the outcome (branch label or the single
//!    unconditional edge).
//! 4. Appends a log row, then merges the node's patch into the context.
//! 5. On reaching a delay node, persists a continuation pointing at it and
//!    returns without logging; [`ExecutionEngine::resume`] later steps past
//!    the delay to the node that follows it.
//!
//! A run that fails is not an `Err`: the instance is marked `failed`, one
//! error log row is written, and the instance is returned. `Err` is
//! reserved for lookups that fail before an instance exists and for
//! storage failures.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use nodes::{ExecutionContext, Handlers, NodeKind, Outcome};

use crate::error::ErrorKind;
use crate::models::{ExecutionInstance, ExecutionLog, ExecutionStatus, GraphSnapshot, LogEntry, Node};
use crate::store::{ExecutionStore, GraphStore};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Most continuations resumed by one [`ExecutionEngine::resume_due`] call.
    pub resume_batch_size: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { resume_batch_size: 100 }
    }
}

// ---------------------------------------------------------------------------
// ExecutionEngine
// ---------------------------------------------------------------------------

pub struct ExecutionEngine {
    graphs: Arc<dyn GraphStore>,
    executions: Arc<dyn ExecutionStore>,
    handlers: Handlers,
    config: ExecutorConfig,
}

impl ExecutionEngine {
    pub fn new(
        graphs: Arc<dyn GraphStore>,
        executions: Arc<dyn ExecutionStore>,
        handlers: Handlers,
        config: ExecutorConfig,
    ) -> Self {
        Self { graphs, executions, handlers, config }
    }

    pub fn graphs(&self) -> &Arc<dyn GraphStore> {
        &self.graphs
    }

    /// Start a new instance at `entry_node_id` with `payload` as both its
    /// trigger context and initial context.
    ///
    /// # Errors
    /// - `NotFound` if the workflow is missing or inactive, or the node is
    ///   not in it.
    /// - `TenantMismatch` if the workflow belongs to another tenant.
    /// - `GraphConfiguration` if the node is not an entry trigger.
    #[instrument(skip(self, payload))]
    pub async fn start(
        &self,
        tenant_id: Uuid,
        workflow_id: Uuid,
        entry_node_id: Uuid,
        payload: Map<String, Value>,
    ) -> Result<ExecutionInstance, EngineError> {
        let graph = self.graphs.load_graph(tenant_id, workflow_id).await?;

        if graph.node(entry_node_id).is_none() {
            return Err(EngineError::NotFound { entity: "node", id: entry_node_id });
        }
        if !graph.find_entry_nodes().iter().any(|n| n.id == entry_node_id) {
            return Err(EngineError::GraphConfiguration(format!(
                "node '{entry_node_id}' is not an entry trigger"
            )));
        }

        let instance = ExecutionInstance {
            id: Uuid::new_v4(),
            workflow_id,
            tenant_id,
            status: ExecutionStatus::Running,
            trigger_context: payload.clone(),
            context: payload,
            graph,
            next_node: Some(entry_node_id),
            resume_at: None,
            cancel_requested: false,
            error_kind: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.executions.create_instance(&instance).await?;
        info!(instance_id = %instance.id, graph_version = instance.graph.version, "instance started");

        self.drive(instance, Some(entry_node_id), false).await
    }

    /// Continue a suspended instance whose resume time has passed.
    ///
    /// A no-op returning the current state when the instance is not due or
    /// another worker already claimed it.
    #[instrument(skip(self))]
    pub async fn resume(&self, instance_id: Uuid, now: DateTime<Utc>) -> Result<ExecutionInstance, EngineError> {
        let Some(instance) = self.executions.claim_continuation(instance_id, now).await? else {
            debug!("nothing to resume");
            return self.executions.get_instance(instance_id).await;
        };
        info!(next_node = ?instance.next_node, "resuming instance");
        let next = instance.next_node;
        self.drive(instance, next, true).await
    }

    /// Resume every continuation due at `now`, concurrently. Failures of
    /// individual resumes are logged and skipped.
    pub async fn resume_due(self: &Arc<Self>, now: DateTime<Utc>) -> Result<Vec<ExecutionInstance>, EngineError> {
        let due = self.executions.list_due(now, self.config.resume_batch_size).await?;
        if due.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = due.len(), "resuming due instances");

        let mut tasks = JoinSet::new();
        for id in due {
            let engine = Arc::clone(self);
            tasks.spawn(async move { (id, engine.resume(id, now).await) });
        }

        let mut resumed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(instance))) => resumed.push(instance),
                Ok((id, Err(e))) => error!(instance_id = %id, "resume failed: {e}"),
                Err(e) => error!("resume task panicked: {e}"),
            }
        }
        Ok(resumed)
    }

    /// Request cancellation. A suspended instance is failed immediately, the
    /// error row naming the delay it waited on; a running one stops at its
    /// next node boundary. Terminal instances are returned unchanged.
    #[instrument(skip(self))]
    pub async fn cancel(&self, tenant_id: Uuid, instance_id: Uuid) -> Result<ExecutionInstance, EngineError> {
        let instance = self.instance(tenant_id, instance_id).await?;
        if instance.status.is_terminal() {
            return Ok(instance);
        }

        if let Some(resume_at) = instance.resume_at {
            if let Some(claimed) = self.executions.claim_continuation(instance_id, resume_at).await? {
                let node_id = claimed.next_node;
                return self.fail(claimed, node_id, EngineError::Cancelled).await;
            }
        }

        self.executions.request_cancel(instance_id).await?;
        info!("cancellation requested");
        self.executions.get_instance(instance_id).await
    }

    /// Tenant-scoped instance lookup.
    pub async fn instance(&self, tenant_id: Uuid, instance_id: Uuid) -> Result<ExecutionInstance, EngineError> {
        let instance = self.executions.get_instance(instance_id).await?;
        if instance.tenant_id != tenant_id {
            return Err(EngineError::TenantMismatch {
                entity: "execution instance",
                id: instance_id,
                tenant_id,
            });
        }
        Ok(instance)
    }

    /// Tenant-scoped log listing, in execution order.
    pub async fn logs(&self, tenant_id: Uuid, instance_id: Uuid) -> Result<Vec<ExecutionLog>, EngineError> {
        self.instance(tenant_id, instance_id).await?;
        self.executions.list_logs(instance_id).await
    }

    // -----------------------------------------------------------------------
    // Internal: the node loop.
    // -----------------------------------------------------------------------

    /// Walk the graph from `start`. With `waited`, `start` is the delay node
    /// the instance was suspended on and is stepped over without running.
    #[instrument(skip(self, instance), fields(instance_id = %instance.id))]
    async fn drive(
        &self,
        mut instance: ExecutionInstance,
        start: Option<Uuid>,
        mut waited: bool,
    ) -> Result<ExecutionInstance, EngineError> {
        if instance.graph.tenant_id != instance.tenant_id {
            let err = EngineError::TenantMismatch {
                entity: "workflow",
                id: instance.workflow_id,
                tenant_id: instance.tenant_id,
            };
            return self.fail(instance, start, err).await;
        }

        let mut cursor = start;
        while let Some(node_id) = cursor {
            instance.next_node = Some(node_id);

            if self.executions.get_instance(instance.id).await?.cancel_requested {
                return self.fail(instance, Some(node_id), EngineError::Cancelled).await;
            }

            let Some(node) = instance.graph.node(node_id).cloned() else {
                let err = EngineError::GraphConfiguration(format!(
                    "node '{node_id}' is missing from the graph snapshot"
                ));
                return self.fail(instance, Some(node_id), err).await;
            };

            if std::mem::take(&mut waited) && node.kind() == NodeKind::Delay {
                cursor = match resolve_next(&instance.graph, &node, &Outcome::default()) {
                    Ok(next) => next,
                    Err(e) => return self.fail(instance, Some(node_id), e).await,
                };
                debug!(node_id = %node_id, "delay elapsed");
                continue;
            }

            let ctx = ExecutionContext {
                tenant_id: instance.tenant_id,
                workflow_id: instance.workflow_id,
                instance_id: instance.id,
                node_id,
                data: instance.context.clone(),
                now: Utc::now(),
            };

            let outcome = match self.handlers.for_kind(node.kind()).execute(&node.config, &ctx).await {
                Ok(outcome) => outcome,
                Err(e) => return self.fail(instance, Some(node_id), EngineError::from_node(node_id, e)).await,
            };

            if let Some(until) = outcome.suspend_until {
                return self.suspend(instance, node_id, until).await;
            }

            let next = match resolve_next(&instance.graph, &node, &outcome) {
                Ok(next) => next,
                Err(e) => return self.fail(instance, Some(node_id), e).await,
            };

            self.executions
                .append_log(LogEntry {
                    instance_id: instance.id,
                    node_id: Some(node_id),
                    log_message: describe(&node, &outcome),
                    branch: outcome.next_label.clone(),
                    input_data: Value::Object(ctx.data),
                    output_data: Value::Object(outcome.patch.clone()),
                    is_error: false,
                })
                .await?;
            debug!(node_id = %node_id, kind = %node.kind(), "node succeeded");

            instance.context.extend(outcome.patch);
            cursor = next;
        }

        instance.status = ExecutionStatus::Completed;
        instance.next_node = None;
        instance.resume_at = None;
        instance.finished_at = Some(Utc::now());
        self.executions.update_instance(&instance).await?;
        info!("instance completed");
        Ok(instance)
    }

    /// Park the instance on `delay_node` until `until`. A cancellation that
    /// arrived while the delay was being computed fails it right away.
    async fn suspend(
        &self,
        mut instance: ExecutionInstance,
        delay_node: Uuid,
        until: DateTime<Utc>,
    ) -> Result<ExecutionInstance, EngineError> {
        instance.next_node = Some(delay_node);
        instance.resume_at = Some(until);
        self.executions.update_instance(&instance).await?;

        if self.executions.get_instance(instance.id).await?.cancel_requested {
            return match self.executions.claim_continuation(instance.id, until).await? {
                Some(claimed) => self.fail(claimed, Some(delay_node), EngineError::Cancelled).await,
                // `cancel` claimed it first and already failed it.
                None => self.executions.get_instance(instance.id).await,
            };
        }

        info!(resume_at = %until, "instance suspended");
        Ok(instance)
    }

    /// Write the single error log row for `err` and mark the instance failed.
    async fn fail(
        &self,
        mut instance: ExecutionInstance,
        node_id: Option<Uuid>,
        err: EngineError,
    ) -> Result<ExecutionInstance, EngineError> {
        let kind = err.kind();
        let message = err.to_string();

        self.executions
            .append_log(LogEntry {
                instance_id: instance.id,
                node_id,
                log_message: message.clone(),
                branch: None,
                input_data: Value::Object(instance.context.clone()),
                output_data: json!({ "error": { "kind": kind, "message": message } }),
                is_error: true,
            })
            .await?;

        instance.status = ExecutionStatus::Failed;
        instance.error_kind = Some(kind);
        instance.resume_at = None;
        instance.finished_at = Some(Utc::now());
        self.executions.update_instance(&instance).await?;

        match kind {
            ErrorKind::Cancelled => warn!(instance_id = %instance.id, "instance cancelled"),
            _ => error!(instance_id = %instance.id, error_kind = kind.as_str(), "instance failed: {message}"),
        }
        Ok(instance)
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Pick the edge to follow after `node`; `None` means the instance ends.
fn resolve_next(graph: &GraphSnapshot, node: &Node, outcome: &Outcome) -> Result<Option<Uuid>, EngineError> {
    let edges = graph.outgoing_edges(node.id);

    if node.kind() == NodeKind::Condition {
        let label = outcome.next_label.as_deref().ok_or_else(|| {
            EngineError::GraphConfiguration(format!("condition node '{}' returned no branch", node.id))
        })?;
        let matching: Vec<_> = edges
            .iter()
            .filter(|e| e.condition_path.as_deref() == Some(label))
            .collect();
        return match matching.as_slice() {
            [edge] => Ok(Some(edge.target)),
            [] => Err(EngineError::GraphConfiguration(format!(
                "condition node '{}' has no '{label}' edge",
                node.id
            ))),
            _ => Err(EngineError::GraphConfiguration(format!(
                "condition node '{}' has more than one '{label}' edge",
                node.id
            ))),
        };
    }

    let unconditional: Vec<_> = edges.iter().filter(|e| e.condition_path.is_none()).collect();
    match unconditional.as_slice() {
        [] => Ok(None),
        [edge] => Ok(Some(edge.target)),
        _ => Err(EngineError::GraphConfiguration(format!(
            "node '{}' has more than one outgoing edge",
            node.id
        ))),
    }
}

fn describe(node: &Node, outcome: &Outcome) -> String {
    match (&outcome.next_label, &node.config) {
        (Some(label), _) => format!("{} node took '{label}'", node.kind()),
        (None, nodes::NodeConfig::Action { action }) => format!("action '{}' succeeded", action.name()),
        (None, _) => format!("{} node succeeded", node.kind()),
    }
}
