use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pipecore::{
    EdgeKind, ExecutionEvent, NodeEvent, NodeSpec, NodeType, Value, WorkflowDefinition,
    WorkflowMetadata,
};
use piperuntime::{resolver, ExecutionOptions, PipelineRuntime, RuntimeConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pipeflow")]
#[command(about = "Pipeline workflow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Run variables as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Execution options JSON file
        #[arg(short, long)]
        options: Option<PathBuf>,

        /// Write the final checkpoint to this file
        #[arg(long)]
        checkpoint_out: Option<PathBuf>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// Show execution levels and the critical path
    Plan {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn runtime() -> PipelineRuntime {
    PipelineRuntime::with_registry(pipenodes::standard_registry(), RuntimeConfig::from_env())
}

fn load_workflow(file: &Path) -> Result<WorkflowDefinition> {
    let workflow = WorkflowDefinition::from_file(file)
        .with_context(|| format!("Failed to load workflow from {}", file.display()))?;
    info!(
        "Loaded workflow {} ({} nodes, {} edges) from {}",
        workflow.id,
        workflow.nodes.len(),
        workflow.edges.len(),
        file.display()
    );
    Ok(workflow)
}

/// Parse `--input` into run variables.
fn parse_input(input: Option<String>) -> Result<HashMap<String, Value>> {
    let Some(raw) = input else {
        return Ok(HashMap::new());
    };
    let json: serde_json::Value = serde_json::from_str(&raw).context("--input is not valid JSON")?;
    match Value::from(json) {
        Value::Object(map) => Ok(map),
        _ => bail!("Input must be a JSON object"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            options,
            checkpoint_out,
            verbose,
        } => {
            init_logging(verbose);
            run_workflow(file, input, options, checkpoint_out).await?;
        }

        Commands::Validate { file } => {
            init_logging(false);
            validate_workflow(&file)?;
        }

        Commands::Plan { file } => {
            init_logging(false);
            plan_workflow(&file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }
    }

    Ok(())
}

fn print_event(event: ExecutionEvent) {
    match event {
        ExecutionEvent::WorkflowStarted { total_nodes, .. } => {
            println!("▶️  Workflow started ({} nodes)", total_nodes);
        }
        ExecutionEvent::NodeStarted { node_id, node_type, .. } => {
            println!("  ⚡ Starting node: {} ({})", node_id, node_type);
        }
        ExecutionEvent::NodeCompleted { node_id, duration_ms, .. } => {
            println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
        }
        ExecutionEvent::NodeFailed { node_id, error, retry_count, .. } => {
            println!("  ❌ Node {} failed after {} retries: {}", node_id, retry_count, error);
        }
        ExecutionEvent::NodeRetrying { node_id, attempt, delay_ms, error, .. } => {
            println!("  🔁 Node {} retry {} in {}ms ({})", node_id, attempt, delay_ms, error);
        }
        ExecutionEvent::NodeSkipped { node_id, reason, .. } => {
            println!("  ⏭️  Node {} skipped: {}", node_id, reason);
        }
        ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
            NodeEvent::Info { message } => {
                println!("     ℹ️  [{}] {}", node_id, message);
            }
            NodeEvent::Warning { message } => {
                println!("     ⚠️  [{}] {}", node_id, message);
            }
            NodeEvent::Progress { percent, message } => match message {
                Some(msg) => println!("     📊 [{}] {}% - {}", node_id, percent, msg),
                None => println!("     📊 [{}] {}%", node_id, percent),
            },
        },
        ExecutionEvent::WorkflowCompleted { duration_ms, .. } => {
            println!("✨ Workflow completed successfully in {}ms", duration_ms);
        }
        ExecutionEvent::WorkflowFailed { error, duration_ms, .. } => {
            println!("💥 Workflow failed after {}ms: {}", duration_ms, error);
        }
        ExecutionEvent::WorkflowCancelled { duration_ms, .. } => {
            println!("🛑 Workflow cancelled after {}ms", duration_ms);
        }
        ExecutionEvent::WorkflowPaused { .. }
        | ExecutionEvent::WorkflowResumed { .. }
        | ExecutionEvent::Progress { .. }
        | ExecutionEvent::CheckpointSaved { .. } => {}
    }
}

async fn run_workflow(
    file: PathBuf,
    input: Option<String>,
    options_file: Option<PathBuf>,
    checkpoint_out: Option<PathBuf>,
) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let workflow = load_workflow(&file)?;

    println!("📋 Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    println!();

    let runtime = runtime();

    let mut options = match options_file {
        Some(path) => ExecutionOptions::from_file(&path)
            .with_context(|| format!("Failed to load options from {}", path.display()))?,
        None => runtime.default_options(),
    };
    options.variables.extend(parse_input(input)?);

    // Subscribe to events for real-time output
    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(event);
        }
    });

    info!("Executing workflow {}", workflow.id);
    let result = runtime.execute(&workflow, options).await?;

    // Wait for events to finish printing
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", result.execution_id);
    println!("   Status: {:?}", result.status);
    println!(
        "   Completed: {}/{} nodes ({} failed, {} skipped)",
        result.context.completed_nodes,
        result.context.total_nodes,
        result.context.failed_nodes,
        result.context.skipped_nodes
    );
    println!("   Duration: {}ms", result.duration_ms);

    if !result.results.is_empty() {
        println!();
        println!("📤 Results:");
        for node_id in &result.order {
            if let Some(value) = result.results.get(node_id) {
                let rendered = serde_json::to_string(value).unwrap_or_default();
                println!("   {}: {}", node_id, rendered);
            }
        }
    }

    for warning in &result.warnings {
        println!("⚠️  {}", warning.message);
    }

    if let Some(path) = checkpoint_out {
        let checkpoint = runtime.checkpoint(result.execution_id).await?;
        checkpoint
            .write_to(&path)
            .with_context(|| format!("Failed to write checkpoint to {}", path.display()))?;
        println!("💾 Checkpoint written to {}", path.display());
    }

    if !result.success {
        error!(
            "Execution {} ended {:?}{}",
            result.execution_id,
            result.status,
            if result.timed_out { " (timed out)" } else { "" }
        );
        bail!("Workflow did not complete: {}", result.errors.join("; "));
    }
    info!("Execution {} completed", result.execution_id);
    Ok(())
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(file)?;
    let report = runtime().validate(&workflow);

    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());

    if !report.errors.is_empty() {
        println!();
        println!("Errors:");
        for error in &report.errors {
            let location = error
                .node_id
                .as_deref()
                .or(error.edge_id.as_deref())
                .map(|at| format!(" [{}]", at))
                .unwrap_or_default();
            println!("  ❌ {:?}/{:?}{}: {}", error.kind, error.severity, location, error.message);
            if let Some(fix) = &error.fix {
                println!("     fix: {}", fix);
            }
        }
    }
    if !report.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in &report.warnings {
            println!("  ⚠️  {}", warning.message);
        }
    }
    if !report.suggestions.is_empty() {
        println!();
        println!("Suggestions:");
        for suggestion in &report.suggestions {
            println!("  💡 {}", suggestion.message);
        }
    }

    println!();
    if report.is_valid {
        info!(
            "Workflow {} is valid ({} warning(s), {} suggestion(s))",
            workflow.id,
            report.warnings.len(),
            report.suggestions.len()
        );
        println!("✅ Workflow is valid");
        Ok(())
    } else {
        warn!("Workflow {} failed validation", workflow.id);
        bail!("Workflow is invalid ({} critical error(s))", report.critical_count())
    }
}

fn plan_workflow(file: &Path) -> Result<()> {
    let workflow = load_workflow(file)?;
    let order = resolver::resolve(&workflow)?;
    info!("Resolved {} level(s) for workflow {}", order.levels.len(), workflow.id);
    let registry = pipenodes::standard_registry();

    println!("🗺️  Execution plan for {}", workflow.name);
    for (index, level) in order.levels.iter().enumerate() {
        println!("   Level {}: {}", index, level.join(", "));
    }
    println!();
    println!("   Critical path: {}", order.critical_path.join(" -> "));
    println!(
        "   Estimated duration: {}ms",
        order.estimate_duration(&workflow, &registry).as_millis()
    );
    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = pipenodes::standard_registry();

    for node_type in NodeType::ALL {
        match registry.metadata(*node_type) {
            Some(metadata) => {
                println!("  • {} ({})", node_type, metadata.category);
                println!("    {}", metadata.description);
            }
            None => println!("  • {} (no executor registered)", node_type),
        }
        let required = node_type.required_config();
        if !required.is_empty() {
            println!("    required: {}", required.join(", "));
        }
    }
}

fn example_workflow() -> WorkflowDefinition {
    let mut workflow = WorkflowDefinition::new("example-http", "Example HTTP Workflow");
    workflow.metadata = Some(WorkflowMetadata {
        category: Some("example".to_string()),
        tags: vec!["http".to_string()],
        complexity: Some("simple".to_string()),
    });

    workflow.add_node(
        NodeSpec::new("start", NodeType::ManualTrigger)
            .with_label("Start")
            .with_position(0.0, 100.0),
    );
    workflow.add_node(
        NodeSpec::new("fetch", NodeType::HttpRequest)
            .with_label("Fetch Data")
            .with_config("url", "https://api.github.com/zen")
            .with_config("method", "GET")
            .with_position(200.0, 100.0),
    );
    workflow.add_node(
        NodeSpec::new("check", NodeType::IfCondition)
            .with_label("Succeeded?")
            .with_config("condition", "fetch.status == 200")
            .with_position(400.0, 100.0),
    );
    workflow.add_node(
        NodeSpec::new("save", NodeType::FileStorage)
            .with_label("Save Response")
            .with_config("path", "output/zen.json")
            .with_position(600.0, 100.0),
    );
    workflow.add_node(
        NodeSpec::new("done", NodeType::Results)
            .with_label("Results")
            .with_position(800.0, 100.0),
    );

    workflow.connect("start", "fetch");
    workflow.connect("fetch", "check");
    workflow.connect("check", "save").kind = EdgeKind::Conditional;
    workflow.connect("save", "done");
    workflow
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let workflow = example_workflow();
    std::fs::write(output, workflow.to_json_pretty()?)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  pipeflow run --file {}", output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_workflow_is_valid() {
        let report = runtime().validate(&example_workflow());
        assert!(report.is_valid, "{:?}", report.errors);
    }

    fn write_workflow(dir: &Path, workflow: &WorkflowDefinition) -> PathBuf {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let path = dir.join("workflow.json");
        std::fs::write(&path, workflow.to_json_pretty().unwrap()).unwrap();
        path
    }

    fn cyclic_workflow() -> WorkflowDefinition {
        let mut workflow = WorkflowDefinition::new("loop", "Loop");
        workflow.add_node(NodeSpec::new("start", NodeType::ManualTrigger).with_label("Start"));
        for id in ["a", "b"] {
            workflow.add_node(
                NodeSpec::new(id, NodeType::Delay)
                    .with_label("Wait a bit")
                    .with_config("duration_ms", 0.0),
            );
        }
        workflow.connect("start", "a");
        workflow.connect("a", "b");
        workflow.connect("b", "a");
        workflow
    }

    #[test]
    fn test_validate_and_plan_commands() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_workflow(dir.path(), &example_workflow());
        assert_eq!(load_workflow(&path).unwrap().id, "example-http");
        validate_workflow(&path).unwrap();
        plan_workflow(&path).unwrap();
    }

    #[test]
    fn test_invalid_workflow_fails_commands() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_workflow(dir.path(), &cyclic_workflow());

        let err = validate_workflow(&path).unwrap_err();
        assert!(err.to_string().contains("invalid"), "{}", err);
        assert!(plan_workflow(&path).is_err());
        assert!(load_workflow(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_parse_input() {
        let vars = parse_input(Some(r#"{"user": {"id": 3}}"#.to_string())).unwrap();
        assert_eq!(
            vars.get("user").and_then(Value::as_object).and_then(|u| u.get("id")),
            Some(&Value::from(3.0))
        );
        assert!(parse_input(Some("[1, 2]".to_string())).is_err());
        assert!(parse_input(None).unwrap().is_empty());
    }
}
