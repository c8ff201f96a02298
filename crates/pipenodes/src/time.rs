use async_trait::async_trait;
use pipecore::{
    ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeOutput, NodeSpec, NodeType, Value,
};
use std::collections::HashMap;
use tokio::time::{sleep, Duration};

/// Delay execution for a specified duration
pub struct DelayNode;

fn duration_ms(node: &NodeSpec) -> u64 {
    node.config("duration_ms")
        .and_then(Value::as_f64)
        .filter(|ms| *ms >= 0.0)
        .unwrap_or(1000.0) as u64
}

#[async_trait]
impl NodeExecutor for DelayNode {
    fn node_type(&self) -> NodeType {
        NodeType::Delay
    }

    async fn execute(&self, node: &NodeSpec, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let delay_ms = duration_ms(node);
        ctx.events.info(format!("Delaying for {}ms", delay_ms));

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => {}
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        }

        // Pass upstream results through unchanged
        let passed: HashMap<String, Value> = ctx
            .upstream_results()
            .map(|(id, value)| (id.to_string(), value.clone()))
            .collect();

        Ok(NodeOutput::new(Value::Object(passed)))
    }

    fn estimate_duration(&self, node: &NodeSpec) -> Option<Duration> {
        Some(Duration::from_millis(duration_ms(node)))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "action".to_string(),
        }
    }
}
