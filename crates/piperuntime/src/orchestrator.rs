//! Level-by-level workflow execution.
//!
//! A run walks the resolver's levels in order. Each level's ready nodes are
//! dispatched in batches of at most `max_concurrent_nodes`; every node in a
//! batch runs as its own tokio task and the batch is awaited as a whole
//! before anything else starts. Control calls (pause/resume/cancel) flip the
//! run's status and are observed at batch boundaries.

use crate::checkpoint::CheckpointStore;
use crate::options::ExecutionOptions;
use crate::registry::ExecutorRegistry;
use crate::resolver::{self, ExecutionOrder};
use crate::tracker::{self, FailurePolicy};
use crate::validator::WorkflowValidator;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use pipecore::{
    Checkpoint, EventBus, ExecutionContext, ExecutionEvent, ExecutionId, ExecutionStatus,
    FlowError, NodeContext, NodeError, NodeExecutionState, NodeExecutor, NodeId, NodeOutput,
    NodeSpec, NodeStatus, ValidationWarning, Value, WorkflowDefinition, WorkflowError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Final record of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub success: bool,
    pub execution_id: ExecutionId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: ExecutionStatus,
    pub timed_out: bool,
    /// Dependency order the run followed.
    pub order: Vec<NodeId>,
    pub results: HashMap<NodeId, Value>,
    pub errors: Vec<String>,
    /// Warnings from pre-flight validation.
    pub warnings: Vec<ValidationWarning>,
    pub node_states: HashMap<NodeId, NodeExecutionState>,
    pub context: ExecutionContext,
}

/// Point-in-time view of a run for the control surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatusReport {
    pub execution_id: ExecutionId,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub progress: f64,
    pub current_node: Option<NodeId>,
    pub running_nodes: Vec<NodeId>,
    pub total_nodes: usize,
    pub completed_nodes: usize,
    pub failed_nodes: usize,
    pub skipped_nodes: usize,
    pub timed_out: bool,
    pub error: Option<String>,
}

/// Handle for a run started with [`Orchestrator::spawn_workflow`].
pub struct ExecutionHandle {
    pub execution_id: ExecutionId,
    task: JoinHandle<RunResult>,
}

impl ExecutionHandle {
    /// Wait for the run to finish.
    pub async fn wait(self) -> Result<RunResult, FlowError> {
        self.task
            .await
            .map_err(|e| FlowError::Execution(format!("Task join error: {}", e)))
    }
}

struct RunState {
    context: ExecutionContext,
    node_states: HashMap<NodeId, NodeExecutionState>,
    timed_out: bool,
}

impl RunState {
    fn report(&self) -> ExecutionStatusReport {
        let ctx = &self.context;
        let mut running_nodes: Vec<NodeId> = self
            .node_states
            .values()
            .filter(|s| s.status == NodeStatus::Running)
            .map(|s| s.node_id.clone())
            .collect();
        running_nodes.sort();

        ExecutionStatusReport {
            execution_id: ctx.execution_id,
            workflow_id: ctx.workflow_id.clone(),
            status: ctx.status,
            progress: tracker::progress(ctx),
            current_node: ctx.current_node.clone(),
            running_nodes,
            total_nodes: ctx.total_nodes,
            completed_nodes: ctx.completed_nodes,
            failed_nodes: ctx.failed_nodes,
            skipped_nodes: ctx.skipped_nodes,
            timed_out: self.timed_out,
            error: ctx.error.clone(),
        }
    }
}

/// Shared between the drive loop and the control surface.
struct ActiveRun {
    state: Mutex<RunState>,
    wake: Notify,
    cancel: CancellationToken,
}

/// What a node task reports back once it has settled.
struct NodeOutcome {
    node_id: NodeId,
    result: Result<NodeOutput, NodeError>,
    retry_count: u32,
    ended_at: DateTime<Utc>,
    duration_ms: u64,
}

/// One node's execution, retries included. Runs inside its own task.
struct NodeAttempt {
    executor: Arc<dyn NodeExecutor>,
    node: NodeSpec,
    ctx: NodeContext,
    retry_count: u32,
    max_retries: u32,
    retry_enabled: bool,
    options: ExecutionOptions,
    event_bus: Arc<EventBus>,
}

impl NodeAttempt {
    async fn run(mut self) -> NodeOutcome {
        let clock = Instant::now();

        let result = loop {
            let error = match self.call().await {
                Ok(output) => break Ok(output),
                Err(error) => error,
            };

            let exhausted = !self.retry_enabled || self.retry_count >= self.max_retries;
            if exhausted || error == NodeError::Cancelled || self.ctx.cancellation.is_cancelled() {
                break Err(error);
            }

            self.retry_count += 1;
            let delay = self.options.retry_delay(self.retry_count);
            tracing::warn!(
                "Node {} failed ({}); retry {}/{} in {}ms",
                self.node.id,
                error,
                self.retry_count,
                self.max_retries,
                delay.as_millis()
            );
            self.event_bus.emit(ExecutionEvent::NodeRetrying {
                execution_id: self.ctx.execution_id,
                node_id: self.node.id.clone(),
                attempt: self.retry_count,
                delay_ms: delay.as_millis() as u64,
                error: error.to_string(),
                timestamp: Utc::now(),
            });

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.ctx.cancellation.cancelled() => break Err(NodeError::Cancelled),
            }
            self.ctx.attempt += 1;
        };

        NodeOutcome {
            node_id: self.node.id.clone(),
            result,
            retry_count: self.retry_count,
            ended_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
        }
    }

    async fn call(&self) -> Result<NodeOutput, NodeError> {
        let execution = self.executor.execute(&self.node, self.ctx.clone());
        match self.options.node_timeout() {
            Some(limit) => tokio::time::timeout(limit, execution)
                .await
                .unwrap_or(Err(NodeError::Timeout {
                    ms: limit.as_millis() as u64,
                })),
            None => execution.await,
        }
    }
}

/// Drives workflow runs and owns their control surface.
pub struct Orchestrator {
    registry: Arc<ExecutorRegistry>,
    validator: WorkflowValidator,
    event_bus: Arc<EventBus>,
    runs: RwLock<HashMap<ExecutionId, Arc<ActiveRun>>>,
    checkpoints: CheckpointStore,
}

impl Orchestrator {
    pub fn new(registry: Arc<ExecutorRegistry>, event_bus: Arc<EventBus>) -> Self {
        Self {
            validator: WorkflowValidator::with_registry(Arc::clone(&registry)),
            registry,
            event_bus,
            runs: RwLock::new(HashMap::new()),
            checkpoints: CheckpointStore::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ExecutorRegistry> {
        &self.registry
    }

    pub fn validator(&self) -> &WorkflowValidator {
        &self.validator
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Validate, resolve and run a workflow to completion.
    ///
    /// `Err` means the run never started; a run that started and failed is an
    /// `Ok` result with `success == false`.
    pub async fn execute_workflow(
        &self,
        workflow: &WorkflowDefinition,
        options: ExecutionOptions,
    ) -> Result<RunResult, FlowError> {
        let (order, warnings) = self.preflight(workflow)?;
        let run = self.start_run(workflow, &options).await;
        Ok(self.drive(workflow, &order, run, &options, warnings).await)
    }

    /// Like [`execute_workflow`](Self::execute_workflow) but returns as soon
    /// as the run has started, so the caller can control it by id.
    pub async fn spawn_workflow(
        self: &Arc<Self>,
        workflow: WorkflowDefinition,
        options: ExecutionOptions,
    ) -> Result<ExecutionHandle, FlowError> {
        let (order, warnings) = self.preflight(&workflow)?;
        let run = self.start_run(&workflow, &options).await;
        let execution_id = run.state.lock().await.context.execution_id;

        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            this.drive(&workflow, &order, run, &options, warnings).await
        });

        Ok(ExecutionHandle { execution_id, task })
    }

    fn preflight(
        &self,
        workflow: &WorkflowDefinition,
    ) -> Result<(ExecutionOrder, Vec<ValidationWarning>), FlowError> {
        let report = self.validator.validate(workflow);
        if !report.is_valid {
            if let Err(cycle @ WorkflowError::CyclicDependency { .. }) = resolver::resolve(workflow) {
                tracing::error!("Workflow {}: {}", workflow.id, cycle);
                return Err(cycle.into());
            }
            tracing::error!(
                "Workflow {} failed validation with {} critical error(s)",
                workflow.id,
                report.critical_count()
            );
            return Err(FlowError::Validation(report));
        }
        let order = resolver::resolve(workflow)?;
        Ok((order, report.warnings))
    }

    async fn start_run(
        &self,
        workflow: &WorkflowDefinition,
        options: &ExecutionOptions,
    ) -> Arc<ActiveRun> {
        let execution_id = Uuid::new_v4();
        let mut context = tracker::create_context(&workflow.id, execution_id, workflow.nodes.len());
        context.variables = options.variables.clone();
        context.status = ExecutionStatus::Running;

        let node_states = workflow
            .nodes
            .iter()
            .map(|node| {
                let max_retries = node.max_retries().unwrap_or(options.max_retries);
                (node.id.clone(), tracker::create_node_state(&node.id, max_retries))
            })
            .collect();

        let run = Arc::new(ActiveRun {
            state: Mutex::new(RunState {
                context,
                node_states,
                timed_out: false,
            }),
            wake: Notify::new(),
            cancel: CancellationToken::new(),
        });
        self.runs.write().await.insert(execution_id, Arc::clone(&run));

        tracing::info!(
            "Starting workflow execution {} for workflow {}",
            execution_id,
            workflow.id
        );
        self.event_bus.emit(ExecutionEvent::WorkflowStarted {
            execution_id,
            workflow_id: workflow.id.clone(),
            total_nodes: workflow.nodes.len(),
            timestamp: Utc::now(),
        });

        run
    }

    async fn drive(
        &self,
        workflow: &WorkflowDefinition,
        order: &ExecutionOrder,
        run: Arc<ActiveRun>,
        options: &ExecutionOptions,
        warnings: Vec<ValidationWarning>,
    ) -> RunResult {
        let clock = Instant::now();
        let nodes = workflow.node_index();
        let policy = if options.continue_on_error {
            FailurePolicy::Continue
        } else {
            FailurePolicy::Halt
        };
        let mut last_checkpoint = Instant::now();

        'levels: for (level_index, level) in order.levels.iter().enumerate() {
            let ready = self.ready_nodes(&run, level, order, policy).await;
            tracing::debug!(
                "Level {}: {} of {} node(s) ready",
                level_index,
                ready.len(),
                level.len()
            );

            for batch in ready.chunks(options.batch_size()) {
                if !self.await_dispatch(&run, clock, options).await {
                    break 'levels;
                }
                self.run_batch(&run, batch, &nodes, order, options, policy).await;
                if self.after_batch(&run, clock, options, &mut last_checkpoint).await {
                    break 'levels;
                }
            }
        }

        self.finish(&run, order, clock, warnings, options).await
    }

    /// Skip nodes whose dependencies can no longer complete and return the
    /// pending ones that are ready.
    async fn ready_nodes(
        &self,
        run: &ActiveRun,
        level: &[NodeId],
        order: &ExecutionOrder,
        policy: FailurePolicy,
    ) -> Vec<NodeId> {
        let mut guard = run.state.lock().await;
        let state = &mut *guard;
        let mut ready = Vec::new();

        for node_id in level {
            let pending = state
                .node_states
                .get(node_id)
                .is_some_and(|s| s.status == NodeStatus::Pending);
            if !pending {
                continue;
            }

            if let Some(blocker) =
                tracker::blocking_dependency(node_id, &order.dependencies, &state.node_states).cloned()
            {
                self.skip_node(state, node_id, &blocker, policy);
            } else if tracker::dependencies_satisfied(node_id, &order.dependencies, &state.node_states) {
                ready.push(node_id.clone());
            }
        }

        ready
    }

    fn skip_node(&self, state: &mut RunState, node_id: &str, blocker: &str, policy: FailurePolicy) {
        let reason = format!("dependency {} did not complete", blocker);
        tracing::warn!("Skipping node {}: {}", node_id, reason);

        if let Some(node_state) = state.node_states.get_mut(node_id) {
            node_state.status = NodeStatus::Skipped;
            node_state.ended_at = Some(Utc::now());
            node_state.error = Some(reason.clone());
        }
        tracker::update_context(&mut state.context, node_id, None, NodeStatus::Skipped, policy);

        self.event_bus.emit(ExecutionEvent::NodeSkipped {
            execution_id: state.context.execution_id,
            node_id: node_id.to_string(),
            reason,
            timestamp: Utc::now(),
        });
    }

    /// Wait while paused; false once the run must not dispatch anything else.
    async fn await_dispatch(&self, run: &ActiveRun, clock: Instant, options: &ExecutionOptions) -> bool {
        loop {
            let mut state = run.state.lock().await;
            let status = state.context.status;
            match status {
                ExecutionStatus::Running | ExecutionStatus::Pending => {
                    if clock.elapsed() >= options.timeout() {
                        self.time_out(&mut state, options);
                        return false;
                    }
                    return true;
                }
                ExecutionStatus::Paused => {
                    drop(state);
                    let remaining = options.timeout().saturating_sub(clock.elapsed());
                    if tokio::time::timeout(remaining, run.wake.notified()).await.is_err() {
                        let mut state = run.state.lock().await;
                        self.time_out(&mut state, options);
                        return false;
                    }
                }
                ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled => {
                    return false;
                }
            }
        }
    }

    /// Marks the run failed on an exhausted budget. A run the tracker has
    /// just resolved to `Completed` is overridden; failed and cancelled runs
    /// keep their own outcome.
    fn time_out(&self, state: &mut RunState, options: &ExecutionOptions) {
        if matches!(
            state.context.status,
            ExecutionStatus::Failed | ExecutionStatus::Cancelled
        ) {
            return;
        }
        let error = WorkflowError::Timeout {
            ms: options.timeout_ms,
        };
        tracing::error!("Execution {}: {}", state.context.execution_id, error);
        state.context.status = ExecutionStatus::Failed;
        state.context.error = Some(error.to_string());
        state.timed_out = true;
    }

    async fn run_batch(
        &self,
        run: &ActiveRun,
        batch: &[NodeId],
        nodes: &HashMap<&str, &NodeSpec>,
        order: &ExecutionOrder,
        options: &ExecutionOptions,
        policy: FailurePolicy,
    ) {
        let mut running = FuturesUnordered::new();
        let mut settled = Vec::new();

        {
            let mut guard = run.state.lock().await;
            let state = &mut *guard;
            let execution_id = state.context.execution_id;

            // Every node in the batch sees the same snapshot.
            let mut inputs = state.context.variables.clone();
            inputs.extend(
                state
                    .context
                    .node_results
                    .iter()
                    .map(|(id, result)| (id.clone(), result.clone())),
            );

            for node_id in batch {
                let (Some(node), Some(node_state)) = (
                    nodes.get(node_id.as_str()).copied(),
                    state.node_states.get_mut(node_id),
                ) else {
                    continue;
                };

                node_state.status = NodeStatus::Running;
                node_state.started_at = Some(Utc::now());
                let retry_count = node_state.retry_count;
                let max_retries = node_state.max_retries;
                state.context.current_node = Some(node_id.clone());

                self.event_bus.emit(ExecutionEvent::NodeStarted {
                    execution_id,
                    node_id: node_id.clone(),
                    node_type: node.node_type,
                    timestamp: Utc::now(),
                });
                if options.debug_mode {
                    tracing::debug!(
                        "Node {} ({}) starting with inputs: {:?}",
                        node_id,
                        node.node_type,
                        inputs.keys().collect::<Vec<_>>()
                    );
                }

                let Some(executor) = self.registry.get(node.node_type).cloned() else {
                    let error = WorkflowError::MissingExecutor {
                        node_id: node_id.clone(),
                        node_type: node.node_type,
                    };
                    settled.push(NodeOutcome {
                        node_id: node_id.clone(),
                        result: Err(NodeError::Configuration(error.to_string())),
                        retry_count,
                        ended_at: Utc::now(),
                        duration_ms: 0,
                    });
                    continue;
                };

                let attempt = NodeAttempt {
                    executor,
                    node: node.clone(),
                    ctx: NodeContext {
                        execution_id,
                        node_id: node_id.clone(),
                        inputs: inputs.clone(),
                        dependencies: order.dependencies_of(node_id).to_vec(),
                        attempt: retry_count + 1,
                        events: self.event_bus.create_emitter(execution_id, node_id.clone()),
                        cancellation: run.cancel.child_token(),
                    },
                    retry_count,
                    max_retries,
                    retry_enabled: options.retry_failed_nodes,
                    options: options.clone(),
                    event_bus: Arc::clone(&self.event_bus),
                };

                let node_id = node_id.clone();
                let task = tokio::spawn(attempt.run());
                running.push(async move { (node_id, retry_count, task.await) });
            }
        }

        for outcome in settled {
            self.apply_outcome(run, outcome, options, policy).await;
        }

        // Barrier: the batch is done only when every task has settled.
        while let Some((node_id, retry_count, joined)) = running.next().await {
            let outcome = joined.unwrap_or_else(|e| NodeOutcome {
                node_id,
                result: Err(NodeError::ExecutionFailed(format!("Task join error: {}", e))),
                retry_count,
                ended_at: Utc::now(),
                duration_ms: 0,
            });
            self.apply_outcome(run, outcome, options, policy).await;
        }
    }

    async fn apply_outcome(
        &self,
        run: &ActiveRun,
        outcome: NodeOutcome,
        options: &ExecutionOptions,
        policy: FailurePolicy,
    ) {
        let mut guard = run.state.lock().await;
        let state = &mut *guard;
        let execution_id = state.context.execution_id;
        let node_id = outcome.node_id;

        let Some(node_state) = state.node_states.get_mut(&node_id) else {
            return;
        };
        node_state.ended_at = Some(outcome.ended_at);
        node_state.duration_ms = Some(outcome.duration_ms);
        node_state.retry_count = outcome.retry_count;

        match outcome.result {
            Ok(output) => {
                node_state.status = NodeStatus::Completed;
                node_state.result = Some(output.result.clone());

                if options.debug_mode {
                    tracing::debug!("Node {} result: {:?}", node_id, output.result);
                }
                tracing::info!("Node {} completed in {}ms", node_id, outcome.duration_ms);

                state.context.variables.extend(output.variables);
                // A null result leaves no entry in the result map.
                let recorded = (!output.result.is_null()).then(|| output.result.clone());
                tracker::update_context(
                    &mut state.context,
                    &node_id,
                    recorded,
                    NodeStatus::Completed,
                    policy,
                );

                self.event_bus.emit(ExecutionEvent::NodeCompleted {
                    execution_id,
                    node_id,
                    result: output.result,
                    duration_ms: outcome.duration_ms,
                    timestamp: Utc::now(),
                });
            }
            Err(error) => {
                node_state.status = NodeStatus::Failed;
                node_state.error = Some(error.to_string());

                tracing::error!(
                    "Node {} failed after {} retr{}: {}",
                    node_id,
                    outcome.retry_count,
                    if outcome.retry_count == 1 { "y" } else { "ies" },
                    error
                );

                if policy == FailurePolicy::Halt && state.context.error.is_none() {
                    state.context.error = Some(format!("Node {} failed: {}", node_id, error));
                }
                tracker::update_context(&mut state.context, &node_id, None, NodeStatus::Failed, policy);

                self.event_bus.emit(ExecutionEvent::NodeFailed {
                    execution_id,
                    node_id,
                    error: error.to_string(),
                    retry_count: outcome.retry_count,
                    timestamp: Utc::now(),
                });
            }
        }
    }

    /// Progress, checkpoint and step handling after a batch. Returns true
    /// when the run must stop dispatching.
    async fn after_batch(
        &self,
        run: &ActiveRun,
        clock: Instant,
        options: &ExecutionOptions,
        last_checkpoint: &mut Instant,
    ) -> bool {
        let (execution_id, percent, status) = {
            let mut state = run.state.lock().await;
            if clock.elapsed() >= options.timeout() {
                self.time_out(&mut state, options);
            }
            (
                state.context.execution_id,
                tracker::progress(&state.context),
                state.context.status,
            )
        };

        self.event_bus.emit(ExecutionEvent::Progress {
            execution_id,
            percent,
            timestamp: Utc::now(),
        });

        if options.save_checkpoints && last_checkpoint.elapsed() >= options.checkpoint_interval() {
            self.save_checkpoint(run).await;
            *last_checkpoint = Instant::now();
        }

        if status.is_terminal() {
            return true;
        }

        if options.step_by_step {
            self.step(run).await;
        }
        false
    }

    /// Pause between batches and immediately continue.
    async fn step(&self, run: &ActiveRun) {
        let mut state = run.state.lock().await;
        if state.context.status != ExecutionStatus::Running {
            return;
        }
        let execution_id = state.context.execution_id;

        state.context.status = ExecutionStatus::Paused;
        self.event_bus.emit(ExecutionEvent::WorkflowPaused {
            execution_id,
            timestamp: Utc::now(),
        });
        tracing::debug!("Execution {} stepped", execution_id);

        state.context.status = ExecutionStatus::Running;
        self.event_bus.emit(ExecutionEvent::WorkflowResumed {
            execution_id,
            timestamp: Utc::now(),
        });
    }

    async fn save_checkpoint(&self, run: &ActiveRun) {
        let checkpoint = {
            let state = run.state.lock().await;
            Checkpoint::capture(&state.context, &state.node_states)
        };
        let execution_id = checkpoint.execution_id();
        self.checkpoints.save(checkpoint).await;
        self.event_bus.emit(ExecutionEvent::CheckpointSaved {
            execution_id,
            timestamp: Utc::now(),
        });
    }

    async fn finish(
        &self,
        run: &ActiveRun,
        order: &ExecutionOrder,
        clock: Instant,
        warnings: Vec<ValidationWarning>,
        options: &ExecutionOptions,
    ) -> RunResult {
        let result = {
            let mut guard = run.state.lock().await;
            let state = &mut *guard;
            tracker::finalize(&mut state.context);
            state.context.current_node = None;

            let execution_id = state.context.execution_id;
            let duration_ms = clock.elapsed().as_millis() as u64;

            let mut errors: Vec<String> = state.context.error.iter().cloned().collect();
            for node_id in &order.order {
                if let Some(error) = state
                    .node_states
                    .get(node_id)
                    .filter(|s| s.status == NodeStatus::Failed)
                    .and_then(|s| s.error.as_ref())
                {
                    errors.push(format!("Node {}: {}", node_id, error));
                }
            }

            let status = state.context.status;
            match status {
                ExecutionStatus::Completed => {
                    tracing::info!("Workflow execution {} completed in {}ms", execution_id, duration_ms);
                    self.event_bus.emit(ExecutionEvent::WorkflowCompleted {
                        execution_id,
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                }
                ExecutionStatus::Cancelled => {
                    tracing::info!("Workflow execution {} cancelled after {}ms", execution_id, duration_ms);
                    self.event_bus.emit(ExecutionEvent::WorkflowCancelled {
                        execution_id,
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                }
                _ => {
                    tracing::error!("Workflow execution {} failed after {}ms", execution_id, duration_ms);
                    self.event_bus.emit(ExecutionEvent::WorkflowFailed {
                        execution_id,
                        error: errors.first().cloned().unwrap_or_default(),
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                }
            }

            RunResult {
                success: status == ExecutionStatus::Completed,
                execution_id,
                started_at: state.context.started_at,
                ended_at: Utc::now(),
                duration_ms,
                status,
                timed_out: state.timed_out,
                order: order.order.clone(),
                results: state.context.node_results.clone(),
                errors,
                warnings,
                node_states: state.node_states.clone(),
                context: state.context.clone(),
            }
        };

        if options.save_checkpoints {
            self.save_checkpoint(run).await;
        }
        result
    }

    async fn active_run(&self, execution_id: ExecutionId) -> Result<Arc<ActiveRun>, FlowError> {
        self.runs
            .read()
            .await
            .get(&execution_id)
            .cloned()
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()).into())
    }

    /// Pause a running execution before its next batch. Returns false if it
    /// was not running.
    pub async fn pause_execution(&self, execution_id: ExecutionId) -> Result<bool, FlowError> {
        let run = self.active_run(execution_id).await?;
        let mut state = run.state.lock().await;
        if state.context.status != ExecutionStatus::Running {
            return Ok(false);
        }
        state.context.status = ExecutionStatus::Paused;
        tracing::info!("Execution {} paused", execution_id);
        self.event_bus.emit(ExecutionEvent::WorkflowPaused {
            execution_id,
            timestamp: Utc::now(),
        });
        Ok(true)
    }

    /// Resume a paused execution. Returns false if it was not paused.
    pub async fn resume_execution(&self, execution_id: ExecutionId) -> Result<bool, FlowError> {
        let run = self.active_run(execution_id).await?;
        let mut state = run.state.lock().await;
        if state.context.status != ExecutionStatus::Paused {
            return Ok(false);
        }
        state.context.status = ExecutionStatus::Running;
        run.wake.notify_one();
        tracing::info!("Execution {} resumed", execution_id);
        self.event_bus.emit(ExecutionEvent::WorkflowResumed {
            execution_id,
            timestamp: Utc::now(),
        });
        Ok(true)
    }

    /// Cancel an execution. Nodes already running are left to settle; no new
    /// batch starts. Returns false if the run had already finished.
    pub async fn cancel_execution(&self, execution_id: ExecutionId) -> Result<bool, FlowError> {
        let run = self.active_run(execution_id).await?;
        let mut state = run.state.lock().await;
        if state.context.status.is_terminal() {
            return Ok(false);
        }
        state.context.status = ExecutionStatus::Cancelled;
        state.context.error = Some("Execution cancelled".to_string());
        run.cancel.cancel();
        run.wake.notify_one();
        tracing::info!("Execution {} cancelled", execution_id);
        Ok(true)
    }

    pub async fn get_execution_status(
        &self,
        execution_id: ExecutionId,
    ) -> Result<ExecutionStatusReport, FlowError> {
        let run = self.active_run(execution_id).await?;
        let state = run.state.lock().await;
        Ok(state.report())
    }

    pub async fn execution_ids(&self) -> Vec<ExecutionId> {
        self.runs.read().await.keys().copied().collect()
    }

    /// Snapshot an execution right now.
    pub async fn checkpoint(&self, execution_id: ExecutionId) -> Result<Checkpoint, FlowError> {
        let run = self.active_run(execution_id).await?;
        let state = run.state.lock().await;
        Ok(Checkpoint::capture(&state.context, &state.node_states))
    }

    /// Most recent checkpoint saved during the run, if checkpointing was on.
    pub async fn latest_checkpoint(&self, execution_id: ExecutionId) -> Option<Checkpoint> {
        self.checkpoints.latest(execution_id).await
    }

    /// Re-hydrate a run from a checkpoint. The run comes back paused; nodes
    /// that were in flight when the snapshot was taken go back to pending.
    pub async fn restore_from_checkpoint(
        &self,
        checkpoint: Checkpoint,
    ) -> Result<ExecutionId, FlowError> {
        let execution_id = checkpoint.execution_id();
        if !checkpoint.can_resume {
            return Err(WorkflowError::NotResumable(execution_id.to_string()).into());
        }

        let mut runs = self.runs.write().await;
        if let Some(existing) = runs.get(&execution_id) {
            if !existing.state.lock().await.context.status.is_terminal() {
                return Err(WorkflowError::Invalid(format!(
                    "Execution {} is still active",
                    execution_id
                ))
                .into());
            }
        }

        let mut context = checkpoint.context_snapshot;
        context.status = ExecutionStatus::Paused;
        context.current_node = None;

        let mut node_states = checkpoint.node_states_snapshot;
        for node_state in node_states.values_mut() {
            if node_state.status == NodeStatus::Running {
                node_state.status = NodeStatus::Pending;
                node_state.started_at = None;
            }
        }

        runs.insert(
            execution_id,
            Arc::new(ActiveRun {
                state: Mutex::new(RunState {
                    context,
                    node_states,
                    timed_out: false,
                }),
                wake: Notify::new(),
                cancel: CancellationToken::new(),
            }),
        );
        tracing::info!("Restored execution {} from checkpoint", execution_id);
        Ok(execution_id)
    }

    /// Continue a restored (or paused-and-abandoned) run to completion.
    /// Settled nodes are not run again.
    pub async fn continue_execution(
        &self,
        execution_id: ExecutionId,
        workflow: &WorkflowDefinition,
        options: ExecutionOptions,
    ) -> Result<RunResult, FlowError> {
        let run = self.active_run(execution_id).await?;
        let (order, warnings) = self.preflight(workflow)?;

        {
            let mut state = run.state.lock().await;
            if state.context.workflow_id != workflow.id {
                return Err(WorkflowError::Invalid(format!(
                    "Execution {} belongs to workflow {}, not {}",
                    execution_id, state.context.workflow_id, workflow.id
                ))
                .into());
            }
            if let Some(missing) = workflow
                .nodes
                .iter()
                .find(|n| !state.node_states.contains_key(&n.id))
            {
                return Err(WorkflowError::NodeNotFound(missing.id.clone()).into());
            }
            if !matches!(
                state.context.status,
                ExecutionStatus::Paused | ExecutionStatus::Pending
            ) {
                return Err(WorkflowError::NotResumable(execution_id.to_string()).into());
            }
            state.context.status = ExecutionStatus::Running;
        }

        self.event_bus.emit(ExecutionEvent::WorkflowResumed {
            execution_id,
            timestamp: Utc::now(),
        });
        Ok(self.drive(workflow, &order, run, &options, warnings).await)
    }

    /// Drop a finished run from the control table.
    pub async fn forget_execution(&self, execution_id: ExecutionId) -> bool {
        let mut runs = self.runs.write().await;
        let finished = match runs.get(&execution_id) {
            Some(run) => run.state.lock().await.context.status.is_terminal(),
            None => false,
        };
        if finished {
            runs.remove(&execution_id);
            self.checkpoints.remove(execution_id).await;
        }
        finished
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registered", &self.registry.list_registered())
            .finish()
    }
}

