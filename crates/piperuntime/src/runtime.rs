use crate::options::ExecutionOptions;
use crate::orchestrator::{ExecutionHandle, ExecutionStatusReport, Orchestrator, RunResult};
use crate::registry::ExecutorRegistry;
use pipecore::{
    Checkpoint, EventBus, ExecutionEvent, ExecutionId, FlowError, ValidationReport,
    WorkflowDefinition, WorkflowError, WorkflowId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Main runtime: a workflow registry in front of the orchestrator
pub struct PipelineRuntime {
    orchestrator: Arc<Orchestrator>,
    workflows: Arc<RwLock<HashMap<WorkflowId, WorkflowDefinition>>>,
    config: RuntimeConfig,
}

impl PipelineRuntime {
    /// Create a runtime with no executors registered
    pub fn new() -> Self {
        Self::with_registry(ExecutorRegistry::new(), RuntimeConfig::default())
    }

    /// Create a runtime around a pre-configured registry
    pub fn with_registry(registry: ExecutorRegistry, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let orchestrator = Arc::new(Orchestrator::new(Arc::new(registry), event_bus));

        Self {
            orchestrator,
            workflows: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn registry(&self) -> &Arc<ExecutorRegistry> {
        self.orchestrator.registry()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Execution options seeded from the runtime configuration
    pub fn default_options(&self) -> ExecutionOptions {
        self.config.default_options()
    }

    /// Register a workflow, replacing any with the same id
    pub async fn register_workflow(&self, workflow: WorkflowDefinition) {
        tracing::info!("Registering workflow {} ({})", workflow.id, workflow.name);
        self.workflows.write().await.insert(workflow.id.clone(), workflow);
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> Result<WorkflowDefinition, FlowError> {
        self.workflows
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()).into())
    }

    /// Registered workflows, sorted by id
    pub async fn list_workflows(&self) -> Vec<WorkflowDefinition> {
        let mut workflows: Vec<_> = self.workflows.read().await.values().cloned().collect();
        workflows.sort_by(|a, b| a.id.cmp(&b.id));
        workflows
    }

    pub async fn remove_workflow(&self, workflow_id: &str) -> Option<WorkflowDefinition> {
        self.workflows.write().await.remove(workflow_id)
    }

    pub fn validate(&self, workflow: &WorkflowDefinition) -> ValidationReport {
        self.orchestrator.validator().validate(workflow)
    }

    /// Execute a registered workflow by id
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        options: ExecutionOptions,
    ) -> Result<RunResult, FlowError> {
        let workflow = self.get_workflow(workflow_id).await?;
        self.orchestrator.execute_workflow(&workflow, options).await
    }

    /// Execute a workflow directly (without registration)
    pub async fn execute(
        &self,
        workflow: &WorkflowDefinition,
        options: ExecutionOptions,
    ) -> Result<RunResult, FlowError> {
        self.orchestrator.execute_workflow(workflow, options).await
    }

    /// Start a registered workflow in the background
    pub async fn spawn_workflow(
        &self,
        workflow_id: &str,
        options: ExecutionOptions,
    ) -> Result<ExecutionHandle, FlowError> {
        let workflow = self.get_workflow(workflow_id).await?;
        self.orchestrator.spawn_workflow(workflow, options).await
    }

    pub async fn pause_execution(&self, execution_id: ExecutionId) -> Result<bool, FlowError> {
        self.orchestrator.pause_execution(execution_id).await
    }

    pub async fn resume_execution(&self, execution_id: ExecutionId) -> Result<bool, FlowError> {
        self.orchestrator.resume_execution(execution_id).await
    }

    pub async fn cancel_execution(&self, execution_id: ExecutionId) -> Result<bool, FlowError> {
        self.orchestrator.cancel_execution(execution_id).await
    }

    pub async fn get_execution_status(
        &self,
        execution_id: ExecutionId,
    ) -> Result<ExecutionStatusReport, FlowError> {
        self.orchestrator.get_execution_status(execution_id).await
    }

    pub async fn checkpoint(&self, execution_id: ExecutionId) -> Result<Checkpoint, FlowError> {
        self.orchestrator.checkpoint(execution_id).await
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.orchestrator.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        self.orchestrator.event_bus()
    }
}

impl Default for PipelineRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub max_concurrent_nodes: usize,
    pub timeout_ms: u64,
    pub event_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_nodes: 3,
            timeout_ms: 300_000,
            event_buffer_size: 1000,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `PIPEFLOW_MAX_CONCURRENT_NODES`,
    /// `PIPEFLOW_TIMEOUT_MS` and `PIPEFLOW_EVENT_BUFFER`. Unparseable values
    /// are logged and ignored.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_nodes: env_or("PIPEFLOW_MAX_CONCURRENT_NODES", defaults.max_concurrent_nodes),
            timeout_ms: env_or("PIPEFLOW_TIMEOUT_MS", defaults.timeout_ms),
            event_buffer_size: env_or("PIPEFLOW_EVENT_BUFFER", defaults.event_buffer_size),
        }
    }

    pub fn default_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            max_concurrent_nodes: self.max_concurrent_nodes,
            timeout_ms: self.timeout_ms,
            ..ExecutionOptions::default()
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring {}={:?}: not a valid value", key, raw);
            default
        }),
        Err(_) => default,
    }
}
