use crate::{events::EventEmitter, ExecutionId, NodeError, NodeId, NodeSpec, NodeType, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Capability contract every node executor implements.
///
/// The runtime only decides when a node runs; what it does is entirely up to
/// the executor registered for its type.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Node type this executor was written for.
    fn node_type(&self) -> NodeType;

    /// Self-description; the registry keys executors by type anyway.
    fn can_execute(&self, node_type: NodeType) -> bool {
        node_type == self.node_type()
    }

    /// Run the node once. Retries are the runtime's business.
    async fn execute(&self, node: &NodeSpec, ctx: NodeContext) -> Result<NodeOutput, NodeError>;

    /// Optional: configuration problems found at validation time
    fn validate(&self, _node: &NodeSpec) -> Vec<String> {
        Vec::new()
    }

    /// Optional: expected run time, used for critical-path estimates
    fn estimate_duration(&self, _node: &NodeSpec) -> Option<Duration> {
        None
    }

    /// Optional: description shown in node listings
    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: String::new(),
            category: format!("{:?}", self.node_type().category()).to_lowercase(),
        }
    }
}

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    pub execution_id: ExecutionId,

    pub node_id: NodeId,

    /// Snapshot of run variables overlaid with prior node results (keyed by
    /// node id), taken before the node started.
    pub inputs: HashMap<String, Value>,

    /// Ids of the nodes this one depends on.
    pub dependencies: Vec<NodeId>,

    /// 1-based attempt number; greater than 1 on retries.
    pub attempt: u32,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Cancelled when the run is cancelled; executors may watch it.
    pub cancellation: tokio_util::sync::CancellationToken,
}

impl NodeContext {
    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Results of this node's direct dependencies, in dependency order.
    pub fn upstream_results(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.dependencies
            .iter()
            .filter_map(|dep| self.inputs.get(dep).map(|v| (dep.as_str(), v)))
    }
}

impl NodeSpec {
    /// Get config value or return error
    pub fn require_config(&self, name: &str) -> Result<&Value, NodeError> {
        self.config(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", name)))
    }

    /// Get config with default
    pub fn get_config_or(&self, name: &str, default: Value) -> Value {
        self.config(name).cloned().unwrap_or(default)
    }
}

/// Output from node execution
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeOutput {
    /// Stored in the run's result map under the node id.
    pub result: Value,

    /// Variables to set on the run once the node settles.
    pub variables: HashMap<String, Value>,
}

impl NodeOutput {
    pub fn new(result: impl Into<Value>) -> Self {
        Self {
            result: result.into(),
            variables: HashMap::new(),
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }
}

/// Metadata about an executor, for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorMetadata {
    pub description: String,
    pub category: String,
}
