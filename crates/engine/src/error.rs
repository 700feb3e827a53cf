//! Engine-level error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use nodes::NodeError;

/// Coarse error classification, persisted on failed instances and in error
/// log rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    GraphConfiguration,
    HandlerExecution,
    TenantMismatch,
    Cancelled,
    /// Persistence or serialization failure outside the taxonomy above.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::GraphConfiguration => "graph_configuration",
            Self::HandlerExecution => "handler_execution",
            Self::TenantMismatch => "tenant_mismatch",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_found"           => Ok(Self::NotFound),
            "graph_configuration" => Ok(Self::GraphConfiguration),
            "handler_execution"   => Ok(Self::HandlerExecution),
            "tenant_mismatch"     => Ok(Self::TenantMismatch),
            "cancelled"           => Ok(Self::Cancelled),
            "internal"            => Ok(Self::Internal),
            other                 => Err(format!("unknown error kind: {other}")),
        }
    }
}

/// Errors produced by the workflow engine (validation + execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Graph validation errors ------

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(Uuid),

    /// An edge references a node ID that doesn't exist in the workflow.
    #[error("edge references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference {
        node_id: Uuid,
        side: &'static str,
    },

    /// Topological sort detected a cycle.
    #[error("workflow graph contains a cycle")]
    CycleDetected,

    /// A node's config failed its own schema check.
    #[error("node '{node_id}' has an invalid config: {message}")]
    InvalidNodeConfig { node_id: Uuid, message: String },

    /// Any other malformed graph: bad fan-out, missing or ambiguous branch
    /// edge, trigger-less active workflow.
    #[error("graph configuration error: {0}")]
    GraphConfiguration(String),

    // ------ Lookup / access errors ------

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{entity} '{id}' does not belong to tenant '{tenant_id}'")]
    TenantMismatch {
        entity: &'static str,
        id: Uuid,
        tenant_id: Uuid,
    },

    // ------ Execution errors ------

    /// A handler failed; the instance is aborted.
    #[error("node '{node_id}' failed: {message}")]
    HandlerExecution { node_id: Uuid, message: String },

    /// Operator-initiated stop.
    #[error("execution cancelled by operator")]
    Cancelled,

    // ------ Infrastructure ------

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row that no longer maps onto the domain model.
    #[error("invalid stored record: {0}")]
    InvalidRecord(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateNodeId(_)
            | Self::UnknownNodeReference { .. }
            | Self::CycleDetected
            | Self::InvalidNodeConfig { .. }
            | Self::GraphConfiguration(_) => ErrorKind::GraphConfiguration,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::TenantMismatch { .. } => ErrorKind::TenantMismatch,
            Self::HandlerExecution { .. } => ErrorKind::HandlerExecution,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Database(_) | Self::Serialization(_) | Self::InvalidRecord(_) => ErrorKind::Internal,
        }
    }

    /// Classify a handler failure for the node that produced it.
    pub fn from_node(node_id: Uuid, err: NodeError) -> Self {
        match err {
            NodeError::Configuration(message) => {
                Self::GraphConfiguration(format!("node '{node_id}': {message}"))
            }
            NodeError::Fatal(message) | NodeError::Retryable(message) => {
                Self::HandlerExecution { node_id, message }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_errors_are_classified() {
        let id = Uuid::new_v4();
        assert_eq!(
            EngineError::from_node(id, NodeError::configuration("field 'value' is missing")).kind(),
            ErrorKind::GraphConfiguration
        );
        assert_eq!(
            EngineError::from_node(id, NodeError::fatal("smtp refused")).kind(),
            ErrorKind::HandlerExecution
        );
        assert_eq!(
            EngineError::from_node(id, NodeError::Retryable("timeout".into())).kind(),
            ErrorKind::HandlerExecution
        );
    }

    #[test]
    fn kind_strings_round_trip() {
        for kind in [
            ErrorKind::NotFound,
            ErrorKind::GraphConfiguration,
            ErrorKind::HandlerExecution,
            ErrorKind::TenantMismatch,
            ErrorKind::Cancelled,
            ErrorKind::Internal,
        ] {
            assert_eq!(kind.as_str().parse::<ErrorKind>().unwrap(), kind);
        }
    }
}
