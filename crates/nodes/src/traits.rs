//! The `NodeHandler` trait, the contract every node type must fulfil.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{NodeConfig, NodeError};

/// Shared context passed to every handler during execution.
///
/// Defined here (in the nodes crate) so both the engine and individual
/// handlers can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Tenant that owns the workflow being executed.
    pub tenant_id: Uuid,
    /// ID of the parent workflow.
    pub workflow_id: Uuid,
    /// ID of the current execution instance.
    pub instance_id: Uuid,
    /// ID of the node being executed.
    pub node_id: Uuid,
    /// Accumulated context: the trigger payload merged with every
    /// preceding node's patch.
    pub data: Map<String, Value>,
    /// Engine clock at dispatch time.
    pub now: DateTime<Utc>,
}

/// What a handler hands back to the engine after a successful run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    /// Edge label to follow. Only meaningful for condition nodes.
    pub next_label: Option<String>,
    /// Keys to merge into the execution context.
    pub patch: Map<String, Value>,
    /// When set, the engine suspends the instance until this instant.
    pub suspend_until: Option<DateTime<Utc>>,
}

impl Outcome {
    /// Continue with the given context patch.
    pub fn patch(patch: Map<String, Value>) -> Self {
        Self {
            patch,
            ..Self::default()
        }
    }

    /// Follow the edge labelled `label`.
    pub fn branch(label: impl Into<String>) -> Self {
        Self {
            next_label: Some(label.into()),
            ..Self::default()
        }
    }

    /// Suspend until `until`, then continue with the following node.
    pub fn suspend(until: DateTime<Utc>) -> Self {
        Self {
            suspend_until: Some(until),
            ..Self::default()
        }
    }
}

/// The core handler trait.
///
/// One implementation exists per node type; the engine picks it through
/// [`crate::Handlers::for_kind`].
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Execute a node with the given config against the current context.
    async fn execute(
        &self,
        config: &NodeConfig,
        ctx: &ExecutionContext,
    ) -> Result<Outcome, NodeError>;
}
