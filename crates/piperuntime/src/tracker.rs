//! Execution state tracking: context/node-state construction, counter
//! updates and progress.

use chrono::Utc;
use pipecore::{
    ExecutionContext, ExecutionId, ExecutionStatus, NodeExecutionState, NodeId, NodeStatus, Value,
};
use std::collections::HashMap;

/// How a node failure affects the run's status while it is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// The first failure fails the run.
    Halt,
    /// Failures are tallied; the run resolves once every node has settled.
    Continue,
}

pub fn create_context(
    workflow_id: impl Into<String>,
    execution_id: ExecutionId,
    total_nodes: usize,
) -> ExecutionContext {
    ExecutionContext {
        workflow_id: workflow_id.into(),
        execution_id,
        started_at: Utc::now(),
        variables: HashMap::new(),
        node_results: HashMap::new(),
        current_node: None,
        status: ExecutionStatus::Pending,
        error: None,
        total_nodes,
        completed_nodes: 0,
        failed_nodes: 0,
        skipped_nodes: 0,
    }
}

pub fn create_node_state(node_id: impl Into<String>, max_retries: u32) -> NodeExecutionState {
    NodeExecutionState {
        node_id: node_id.into(),
        status: NodeStatus::Pending,
        started_at: None,
        ended_at: None,
        duration_ms: None,
        result: None,
        error: None,
        retry_count: 0,
        max_retries,
    }
}

/// Record a node reaching a settled status.
///
/// Non-settled statuses are ignored. The settled total never exceeds
/// `total_nodes`, and a terminal run status is never overwritten.
pub fn update_context(
    context: &mut ExecutionContext,
    node_id: &str,
    result: Option<Value>,
    status: NodeStatus,
    policy: FailurePolicy,
) {
    if !status.is_settled() {
        return;
    }
    if context.settled_nodes() >= context.total_nodes {
        tracing::warn!(
            "Ignoring {:?} for node {}: all {} nodes already settled",
            status,
            node_id,
            context.total_nodes
        );
        return;
    }

    match status {
        NodeStatus::Completed => {
            context.completed_nodes += 1;
            if let Some(result) = result {
                context.node_results.insert(node_id.to_string(), result);
            }
        }
        NodeStatus::Failed => context.failed_nodes += 1,
        NodeStatus::Skipped => context.skipped_nodes += 1,
        NodeStatus::Pending | NodeStatus::Running => return,
    }

    if context.status.is_terminal() {
        return;
    }

    if status == NodeStatus::Failed && policy == FailurePolicy::Halt {
        context.status = ExecutionStatus::Failed;
        if context.error.is_none() {
            context.error = Some(format!("Node {} failed", node_id));
        }
    } else if context.settled_nodes() == context.total_nodes {
        resolve_final_status(context);
    }
}

/// Resolve the status of a run whose dispatch has finished.
///
/// Only non-terminal contexts change.
pub fn finalize(context: &mut ExecutionContext) {
    if !context.status.is_terminal() {
        resolve_final_status(context);
    }
}

fn resolve_final_status(context: &mut ExecutionContext) {
    if context.failed_nodes > 0 {
        context.status = ExecutionStatus::Failed;
        if context.error.is_none() {
            context.error = Some(format!("{} node(s) failed", context.failed_nodes));
        }
    } else {
        context.status = ExecutionStatus::Completed;
    }
}

/// Settled share of the run, 0..=100.
pub fn progress(context: &ExecutionContext) -> f64 {
    if context.total_nodes == 0 {
        return 100.0;
    }
    (context.settled_nodes() as f64 / context.total_nodes as f64) * 100.0
}

/// True iff every prerequisite of `node_id` has completed.
pub fn dependencies_satisfied(
    node_id: &str,
    dependencies: &HashMap<NodeId, Vec<NodeId>>,
    states: &HashMap<NodeId, NodeExecutionState>,
) -> bool {
    dependencies
        .get(node_id)
        .map(|deps| {
            deps.iter().all(|dep| {
                states
                    .get(dep)
                    .is_some_and(|state| state.status == NodeStatus::Completed)
            })
        })
        .unwrap_or(true)
}

/// First prerequisite that failed or was skipped, if any. Such a node can
/// never run in this pass.
pub fn blocking_dependency<'a>(
    node_id: &str,
    dependencies: &'a HashMap<NodeId, Vec<NodeId>>,
    states: &HashMap<NodeId, NodeExecutionState>,
) -> Option<&'a NodeId> {
    dependencies.get(node_id).and_then(|deps| {
        deps.iter().find(|dep| {
            states.get(*dep).is_some_and(|state| {
                matches!(state.status, NodeStatus::Failed | NodeStatus::Skipped)
            })
        })
    })
}
