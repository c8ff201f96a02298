//! Workflow execution runtime
//!
//! Dependency resolution, pre-flight validation, the executor registry and
//! the orchestrator that drives runs level by level with bounded
//! concurrency, retries, pause/resume/cancel and checkpoints.

mod checkpoint;
mod options;
mod orchestrator;
mod registry;
pub mod resolver;
mod runtime;
pub mod tracker;
mod validator;

pub use options::ExecutionOptions;
pub use orchestrator::{ExecutionHandle, ExecutionStatusReport, Orchestrator, RunResult};
pub use registry::ExecutorRegistry;
pub use resolver::{DependencyResolver, ExecutionOrder};
pub use runtime::{PipelineRuntime, RuntimeConfig};
pub use tracker::FailurePolicy;
pub use validator::WorkflowValidator;
