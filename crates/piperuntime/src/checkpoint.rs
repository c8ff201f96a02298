use pipecore::{Checkpoint, ExecutionId};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory store keeping the latest checkpoint of each execution.
#[derive(Default)]
pub struct CheckpointStore {
    latest: RwLock<HashMap<ExecutionId, Checkpoint>>,
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn save(&self, checkpoint: Checkpoint) {
        let execution_id = checkpoint.execution_id();
        tracing::debug!("Saving checkpoint for execution {}", execution_id);
        self.latest.write().await.insert(execution_id, checkpoint);
    }

    pub async fn latest(&self, execution_id: ExecutionId) -> Option<Checkpoint> {
        self.latest.read().await.get(&execution_id).cloned()
    }

    pub async fn remove(&self, execution_id: ExecutionId) -> Option<Checkpoint> {
        self.latest.write().await.remove(&execution_id)
    }
}
