//! `engine` crate — domain models, graph validation, stores, and the
//! execution engine with its trigger and resume loops.

pub mod models;
pub mod error;
pub mod dag;
pub mod store;
pub mod executor;
pub mod trigger;
pub mod sweep;

pub use models::{Edge, ExecutionInstance, ExecutionLog, ExecutionStatus, GraphSnapshot, Node, Position, Workflow};
pub use error::{EngineError, ErrorKind};
pub use dag::validate_dag;
pub use store::{ExecutionStore, GraphStore, MemoryStore, PgStore};
pub use executor::{ExecutionEngine, ExecutorConfig};
pub use trigger::{TriggerAdapter, TriggerDispatcher};
pub use sweep::ResumeSweeper;
