use pipecore::{FlowError, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Per-run execution options. Durations are milliseconds on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionOptions {
    /// Log each node's inputs and results at debug level.
    pub debug_mode: bool,
    /// Pause after every batch; the run resumes on its own, which gives an
    /// external stepper a hook between batches.
    pub step_by_step: bool,
    pub max_concurrent_nodes: usize,
    /// Wall-clock budget for the whole run.
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,
    pub retry_failed_nodes: bool,
    pub continue_on_error: bool,
    pub save_checkpoints: bool,
    #[serde(rename = "checkpointInterval")]
    pub checkpoint_interval_ms: u64,
    /// Seed values for the run's variable map.
    pub variables: HashMap<String, Value>,
    /// Retry budget for nodes without a `max_retries` config entry.
    pub max_retries: u32,
    /// Base backoff; the n-th retry waits n times this.
    #[serde(rename = "retryDelay")]
    pub retry_delay_ms: u64,
    /// Optional budget for a single executor attempt.
    #[serde(rename = "nodeTimeout")]
    pub node_timeout_ms: Option<u64>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            debug_mode: false,
            step_by_step: false,
            max_concurrent_nodes: 3,
            timeout_ms: 300_000,
            retry_failed_nodes: true,
            continue_on_error: false,
            save_checkpoints: false,
            checkpoint_interval_ms: 30_000,
            variables: HashMap::new(),
            max_retries: 3,
            retry_delay_ms: 1_000,
            node_timeout_ms: None,
        }
    }
}

impl ExecutionOptions {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Batch size; zero is treated as one.
    pub fn batch_size(&self) -> usize {
        self.max_concurrent_nodes.max(1)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }

    pub fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout_ms.map(Duration::from_millis)
    }

    /// Backoff before retry number `retry` (1-based).
    pub fn retry_delay(&self, retry: u32) -> Duration {
        Duration::from_millis(self.retry_delay_ms.saturating_mul(u64::from(retry)))
    }
}
