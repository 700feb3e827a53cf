//! Node-level error type.

use thiserror::Error;

/// Errors returned by a handler's `execute` method.
///
/// The variant tells the engine how to classify the failure:
/// - `Retryable`     — transient collaborator failure; only ever seen inside
///   a handler's own retry loop, surfaced to the engine once exhausted.
/// - `Fatal`         — the handler failed; the instance is marked as failed.
/// - `Configuration` — the node's config cannot be applied to the current
///   context (e.g. a predicate over a missing field).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Transient failure; the handler may try again.
    #[error("retryable node error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal node error: {0}")]
    Fatal(String),

    /// The node is misconfigured for the data it was given.
    #[error("node configuration error: {0}")]
    Configuration(String),
}

impl NodeError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }
}
