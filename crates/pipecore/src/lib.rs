//! Core abstractions for the pipeline engine
//!
//! Workflow model, node-type catalogue, run-state records, events and the
//! executor contract. Everything the runtime and the executor crates share
//! lives here; nothing in this crate schedules work.

mod error;
pub mod events;
mod node;
mod node_type;
mod state;
mod validation;
mod value;
mod workflow;

pub use error::{FlowError, NodeError, WorkflowError};
pub use events::*;
pub use node::{ExecutorMetadata, NodeContext, NodeExecutor, NodeOutput};
pub use node_type::{ConnectionRules, NodeCategory, NodeType};
pub use state::{Checkpoint, ExecutionContext, ExecutionStatus, NodeExecutionState, NodeStatus};
pub use validation::{
    Severity, Suggestion, ValidationError, ValidationErrorKind, ValidationReport,
    ValidationWarning, WarningKind,
};
pub use value::Value;
pub use workflow::{
    Edge, EdgeKind, NodeData, NodeId, NodeSpec, Position, WorkflowDefinition, WorkflowId,
    WorkflowMetadata,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
