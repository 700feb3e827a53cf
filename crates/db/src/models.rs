//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models; they carry no domain behaviour.
//! Domain types live in the `engine` crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// A persisted workflow header row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub is_active: bool,
    /// Bumped on every save of the graph.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// workflow_nodes / workflow_edges
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NodeRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Tagged node config (`{"type": "action", ...}`).
    pub config: serde_json::Value,
    pub position_x: f64,
    pub position_y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EdgeRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub source_node: Uuid,
    pub target_node: Uuid,
    pub condition_path: Option<String>,
}

// ---------------------------------------------------------------------------
// execution_instances
// ---------------------------------------------------------------------------

/// A persisted execution instance row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionInstanceRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub tenant_id: Uuid,
    pub status: String,
    pub trigger_context: serde_json::Value,
    pub context: serde_json::Value,
    /// Copy of the workflow graph taken when the instance started.
    pub graph: serde_json::Value,
    pub graph_version: i64,
    pub next_node: Option<Uuid>,
    pub resume_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
    pub error_kind: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// execution_logs
// ---------------------------------------------------------------------------

/// An append-only per-node log row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionLogRow {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub sequence: i64,
    /// Nulled by the database when the node is deleted.
    pub node_id: Option<Uuid>,
    pub log_message: String,
    pub branch: Option<String>,
    pub input_data: serde_json::Value,
    pub output_data: serde_json::Value,
    pub is_error: bool,
    pub executed_at: DateTime<Utc>,
}

/// Insert payload for [`ExecutionLogRow`]; `id`, `sequence` and
/// `executed_at` are assigned by the repository.
#[derive(Debug, Clone)]
pub struct NewExecutionLog {
    pub instance_id: Uuid,
    pub node_id: Option<Uuid>,
    pub log_message: String,
    pub branch: Option<String>,
    pub input_data: serde_json::Value,
    pub output_data: serde_json::Value,
    pub is_error: bool,
}
