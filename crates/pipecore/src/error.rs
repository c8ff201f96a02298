use crate::{NodeType, ValidationReport};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Workflow failed validation with {} critical error(s)", .0.critical_count())]
    Validation(ValidationReport),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Runtime failure of a single node, as reported by its executor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Invalid workflow: {0}")]
    Invalid(String),

    #[error("Cyclic dependency detected between nodes: {}", .nodes.join(", "))]
    CyclicDependency { nodes: Vec<String> },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("No executor registered for node type '{node_type}' (node {node_id})")]
    MissingExecutor { node_id: String, node_type: NodeType },

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    #[error("Workflow timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Execution {0} cannot be resumed")]
    NotResumable(String),
}
