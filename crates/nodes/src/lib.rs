//! `nodes` crate — the `NodeHandler` trait, typed node configs, and the
//! built-in handlers for each node type.
//!
//! The engine crate dispatches execution through [`Handlers::for_kind`];
//! the set of node types is closed (trigger, action, condition, delay).

pub mod ai;
pub mod config;
pub mod error;
pub mod handlers;
pub mod messaging;
pub mod mock;
pub mod predicate;
pub mod template;
pub mod traits;

pub use config::{ActionOperation, NodeConfig, NodeKind};
pub use error::NodeError;
pub use handlers::{Handlers, RetryPolicy, FALSE_PATH, TRUE_PATH};
pub use predicate::{CompareOp, Predicate};
pub use traits::{ExecutionContext, NodeHandler, Outcome};
