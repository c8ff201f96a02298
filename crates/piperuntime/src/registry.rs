use pipecore::{ExecutorMetadata, NodeExecutor, NodeType};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of executors, keyed by the node type they run.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<NodeType, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor for `node_type`, replacing any previous one.
    pub fn register(
        &mut self,
        node_type: NodeType,
        executor: Arc<dyn NodeExecutor>,
    ) -> Option<Arc<dyn NodeExecutor>> {
        if !executor.can_execute(node_type) {
            tracing::warn!(
                "Executor for {} does not claim node type {}",
                executor.node_type(),
                node_type
            );
        }
        tracing::info!("Registering executor for node type: {}", node_type);
        self.executors.insert(node_type, executor)
    }

    /// Register an executor under the type it reports for itself.
    pub fn register_executor(&mut self, executor: Arc<dyn NodeExecutor>) {
        let node_type = executor.node_type();
        self.register(node_type, executor);
    }

    pub fn unregister(&mut self, node_type: NodeType) -> Option<Arc<dyn NodeExecutor>> {
        let removed = self.executors.remove(&node_type);
        if removed.is_some() {
            tracing::info!("Unregistered executor for node type: {}", node_type);
        }
        removed
    }

    pub fn get(&self, node_type: NodeType) -> Option<&Arc<dyn NodeExecutor>> {
        self.executors.get(&node_type)
    }

    pub fn contains(&self, node_type: NodeType) -> bool {
        self.executors.contains_key(&node_type)
    }

    /// Registered node types in catalogue order.
    pub fn list_registered(&self) -> Vec<NodeType> {
        let mut types: Vec<NodeType> = self.executors.keys().copied().collect();
        types.sort();
        types
    }

    pub fn metadata(&self, node_type: NodeType) -> Option<ExecutorMetadata> {
        self.executors.get(&node_type).map(|e| e.metadata())
    }
}
