//! Event intake: [`TriggerAdapter`] queues domain events, [`TriggerDispatcher`]
//! turns them into execution instances.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use queue::{EventReceiver, EventSender, QueueError, QueuedEvent};

use crate::executor::ExecutionEngine;
use crate::models::{ExecutionInstance, GraphSnapshot};
use crate::EngineError;

/// Producer-facing side of the trigger pipeline.
#[derive(Clone)]
pub struct TriggerAdapter {
    sender: EventSender,
}

impl TriggerAdapter {
    pub fn new(sender: EventSender) -> Self {
        Self { sender }
    }

    /// Queue a domain event. Returns as soon as the event is queued; a full
    /// queue is reported rather than waited on.
    pub fn on_event(
        &self,
        event_type: &str,
        payload: Map<String, Value>,
        tenant_id: Uuid,
    ) -> Result<Uuid, QueueError> {
        let event = QueuedEvent::new(tenant_id, event_type, payload);
        let id = event.id;
        self.sender.enqueue(event)?;
        Ok(id)
    }
}

/// Matches queued events against active workflows and starts instances.
pub struct TriggerDispatcher {
    engine: Arc<ExecutionEngine>,
}

impl TriggerDispatcher {
    pub fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self { engine }
    }

    /// Start one instance per (active workflow, matching entry node) of the
    /// event's tenant. Instances start concurrently; a workflow that
    /// vanishes or fails to start is skipped.
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn dispatch(&self, event: &QueuedEvent) -> Result<Vec<ExecutionInstance>, EngineError> {
        let workflows = self.engine.graphs().list_active_workflows(event.tenant_id).await?;

        let mut tasks = JoinSet::new();
        for workflow in workflows.iter().filter(|w| w.tenant_id == event.tenant_id) {
            let graph = GraphSnapshot::from(workflow);
            for entry in graph.entry_nodes_for(&event.event_type) {
                let engine = Arc::clone(&self.engine);
                let (tenant_id, workflow_id, entry_id) = (event.tenant_id, workflow.id, entry.id);
                let payload = event.payload.clone();
                tasks.spawn(async move {
                    (workflow_id, engine.start(tenant_id, workflow_id, entry_id, payload).await)
                });
            }
        }

        if tasks.is_empty() {
            debug!("no workflow matched");
            return Ok(Vec::new());
        }

        let mut started = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(instance))) => started.push(instance),
                Ok((workflow_id, Err(EngineError::NotFound { .. }))) => {
                    debug!(%workflow_id, "workflow disappeared before start, skipping");
                }
                Ok((workflow_id, Err(e))) => error!(%workflow_id, "failed to start instance: {e}"),
                Err(e) => error!("start task panicked: {e}"),
            }
        }
        info!(count = started.len(), "event dispatched");
        Ok(started)
    }

    /// Consume the queue until it closes or `cancel` fires, dispatching each
    /// event on its own task.
    pub async fn run(self: Arc<Self>, mut receiver: EventReceiver, cancel: CancellationToken) {
        info!("trigger dispatcher started");
        let mut in_flight = JoinSet::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    receiver.close();
                    break;
                }
                next = receiver.recv() => {
                    let Some(event) = next else { break };
                    let dispatcher = Arc::clone(&self);
                    in_flight.spawn(async move {
                        if let Err(e) = dispatcher.dispatch(&event).await {
                            warn!(event_id = %event.id, "dispatch failed: {e}");
                        }
                    });
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }

        // Let already-dispatched events finish their current drive.
        while in_flight.join_next().await.is_some() {}
        info!("trigger dispatcher stopped");
    }
}
