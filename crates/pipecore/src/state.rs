//! Plain, serializable run-state records.
//!
//! These carry no behaviour beyond small accessors; the runtime's tracker and
//! orchestrator own every transition.

use crate::{ExecutionId, FlowError, NodeId, Value, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeStatus {
    /// Completed, failed and skipped nodes never run again in this pass.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Mutable record of one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub workflow_id: WorkflowId,
    pub execution_id: ExecutionId,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default)]
    pub node_results: HashMap<NodeId, Value>,
    #[serde(default)]
    pub current_node: Option<NodeId>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub total_nodes: usize,
    #[serde(default)]
    pub completed_nodes: usize,
    #[serde(default)]
    pub failed_nodes: usize,
    #[serde(default)]
    pub skipped_nodes: usize,
}

impl ExecutionContext {
    pub fn settled_nodes(&self) -> usize {
        self.completed_nodes + self.failed_nodes + self.skipped_nodes
    }
}

/// Per-node state within one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionState {
    pub node_id: NodeId,
    pub status: NodeStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    pub max_retries: u32,
}

/// Immutable snapshot of a run, sufficient to resume it later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub timestamp: DateTime<Utc>,
    pub context_snapshot: ExecutionContext,
    pub node_states_snapshot: HashMap<NodeId, NodeExecutionState>,
    pub can_resume: bool,
}

impl Checkpoint {
    pub fn capture(
        context: &ExecutionContext,
        node_states: &HashMap<NodeId, NodeExecutionState>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            context_snapshot: context.clone(),
            node_states_snapshot: node_states.clone(),
            can_resume: !context.status.is_terminal(),
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.context_snapshot.execution_id
    }

    pub fn to_json(&self) -> Result<String, FlowError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, FlowError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), FlowError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn read_from(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}
