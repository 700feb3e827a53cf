//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow and its runs look
//! like in memory. Stores translate them to and from their own
//! representation (see `store::postgres` for the row mapping).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use nodes::{NodeConfig, NodeKind};

use crate::error::ErrorKind;

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Editor canvas coordinates. Irrelevant to execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier (referenced by edges and log rows).
    pub id: Uuid,
    /// Typed configuration; its variant is the node type.
    pub config: NodeConfig,
    #[serde(default)]
    pub position: Position,
}

impl Node {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            position: Position::default(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.config.kind()
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// Directed edge from one node to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub source: Uuid,
    pub target: Uuid,
    /// Branch label; only used on edges leaving a condition node.
    #[serde(default)]
    pub condition_path: Option<String>,
}

impl Edge {
    pub fn new(source: Uuid, target: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            target,
            condition_path: None,
        }
    }

    pub fn labelled(source: Uuid, target: Uuid, label: impl Into<String>) -> Self {
        Self {
            condition_path: Some(label.into()),
            ..Self::new(source, target)
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A complete, tenant-owned workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
    /// Assigned by the store; bumped on every save.
    #[serde(default)]
    pub version: i64,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn active_by_default() -> bool {
    true
}

impl Workflow {
    /// An active workflow with a fresh id.
    pub fn new(tenant_id: Uuid, name: impl Into<String>, nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.into(),
            is_active: true,
            version: 0,
            nodes,
            edges,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// GraphSnapshot
// ---------------------------------------------------------------------------

/// Immutable copy of a workflow's graph, taken when an instance starts and
/// carried by the instance for its whole life.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub workflow_id: Uuid,
    pub tenant_id: Uuid,
    pub version: i64,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl GraphSnapshot {
    pub fn node(&self, id: Uuid) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Trigger nodes with no incoming edges.
    pub fn find_entry_nodes(&self) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| n.kind() == NodeKind::Trigger)
            .filter(|n| !self.edges.iter().any(|e| e.target == n.id))
            .collect()
    }

    /// Entry nodes whose trigger listens for exactly `event_type`.
    pub fn entry_nodes_for(&self, event_type: &str) -> Vec<&Node> {
        self.find_entry_nodes()
            .into_iter()
            .filter(|n| matches!(&n.config, NodeConfig::Trigger { event_type: t } if t == event_type))
            .collect()
    }

    pub fn outgoing_edges(&self, node_id: Uuid) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.source == node_id).collect()
    }
}

impl From<&Workflow> for GraphSnapshot {
    fn from(workflow: &Workflow) -> Self {
        Self {
            workflow_id: workflow.id,
            tenant_id: workflow.tenant_id,
            version: workflow.version,
            nodes: workflow.nodes.clone(),
            edges: workflow.edges.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionInstance
// ---------------------------------------------------------------------------

/// Possible statuses for an execution instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"   => Ok(Self::Pending),
            "running"   => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed"    => Ok(Self::Failed),
            other       => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// One triggered run of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInstance {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub tenant_id: Uuid,
    pub status: ExecutionStatus,
    /// The event payload that started the run.
    pub trigger_context: Map<String, Value>,
    /// Trigger context plus every patch applied so far.
    pub context: Map<String, Value>,
    pub graph: GraphSnapshot,
    /// Node the run continues with. Set while running and while suspended.
    pub next_node: Option<Uuid>,
    /// Set only while suspended on a delay.
    pub resume_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
    pub error_kind: Option<ErrorKind>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionInstance {
    pub fn is_suspended(&self) -> bool {
        self.status == ExecutionStatus::Running && self.resume_at.is_some()
    }
}

// ---------------------------------------------------------------------------
// ExecutionLog
// ---------------------------------------------------------------------------

/// Immutable record of one step of an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: Uuid,
    pub instance_id: Uuid,
    /// 1-based position in the instance's execution order.
    pub sequence: i64,
    /// `None` once the node has been deleted from its workflow.
    pub node_id: Option<Uuid>,
    pub log_message: String,
    /// Label taken by a condition node.
    pub branch: Option<String>,
    /// Context as the node saw it.
    pub input_data: Value,
    /// The node's patch, or `{"error": {"kind", "message"}}`.
    pub output_data: Value,
    pub is_error: bool,
    pub executed_at: DateTime<Utc>,
}

/// A log row before the store assigns id, sequence and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub instance_id: Uuid,
    pub node_id: Option<Uuid>,
    pub log_message: String,
    pub branch: Option<String>,
    pub input_data: Value,
    pub output_data: Value,
    pub is_error: bool,
}
