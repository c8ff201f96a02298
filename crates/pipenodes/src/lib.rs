//! Standard node library
//!
//! Executors for every node type that runs outside a desktop session.
//! Desktop and OCR types have no executor here; hosts with a desktop bridge
//! register their own.

mod http;
mod logic;
mod storage;
pub mod template;
mod time;
mod trigger;

pub use http::HttpRequestNode;
pub use logic::{evaluate_condition, IfConditionNode, SetVariableNode};
pub use storage::{FileStorageNode, ResultsNode};
pub use time::DelayNode;
pub use trigger::{ManualTriggerNode, ScheduleTriggerNode, WebhookTriggerNode, PAYLOAD_KEY};

use piperuntime::ExecutorRegistry;
use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut ExecutorRegistry) {
    registry.register_executor(Arc::new(ManualTriggerNode));
    registry.register_executor(Arc::new(ScheduleTriggerNode));
    registry.register_executor(Arc::new(WebhookTriggerNode));
    registry.register_executor(Arc::new(HttpRequestNode::new()));
    registry.register_executor(Arc::new(DelayNode));
    registry.register_executor(Arc::new(IfConditionNode));
    registry.register_executor(Arc::new(SetVariableNode));
    registry.register_executor(Arc::new(FileStorageNode));
    registry.register_executor(Arc::new(ResultsNode));
    tracing::debug!("Registered {} standard executors", registry.list_registered().len());
}

/// A registry pre-loaded with the standard nodes.
pub fn standard_registry() -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    register_all(&mut registry);
    registry
}
