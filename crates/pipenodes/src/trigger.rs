use async_trait::async_trait;
use chrono::Utc;
use pipecore::{
    ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeOutput, NodeSpec, NodeType, Value,
};
use std::collections::HashMap;

/// Input key a caller seeds with the data that started the run.
pub const PAYLOAD_KEY: &str = "payload";

fn fire(kind: &str, node: &NodeSpec, ctx: &NodeContext, extra: &[&str]) -> NodeOutput {
    let mut out = HashMap::new();
    out.insert("trigger".to_string(), Value::from(kind));
    out.insert("triggeredAt".to_string(), Value::from(Utc::now().to_rfc3339()));
    for key in extra {
        if let Some(value) = node.config(key) {
            out.insert(key.to_string(), value.clone());
        }
    }
    if let Some(payload) = ctx.inputs.get(PAYLOAD_KEY) {
        out.insert(PAYLOAD_KEY.to_string(), payload.clone());
    }
    ctx.events.info(format!("{} trigger fired", kind));
    NodeOutput::new(Value::Object(out))
}

/// Started by hand from the editor, CLI or API
pub struct ManualTriggerNode;

#[async_trait]
impl NodeExecutor for ManualTriggerNode {
    fn node_type(&self) -> NodeType {
        NodeType::ManualTrigger
    }

    async fn execute(&self, node: &NodeSpec, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(fire("manual", node, &ctx, &[]))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Start a run on demand".to_string(),
            category: "trigger".to_string(),
        }
    }
}

/// Fired by an external scheduler; the run itself just records the schedule.
pub struct ScheduleTriggerNode;

#[async_trait]
impl NodeExecutor for ScheduleTriggerNode {
    fn node_type(&self) -> NodeType {
        NodeType::ScheduleTrigger
    }

    async fn execute(&self, node: &NodeSpec, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(fire("schedule", node, &ctx, &["schedule", "timezone"]))
    }

    fn validate(&self, node: &NodeSpec) -> Vec<String> {
        let Some(schedule) = node.config("schedule").and_then(Value::as_str) else {
            return Vec::new();
        };
        let schedule = schedule.trim();
        if schedule.is_empty() || schedule.starts_with('@') {
            return Vec::new();
        }
        let fields = schedule.split_whitespace().count();
        if (5..=6).contains(&fields) {
            Vec::new()
        } else {
            vec![format!(
                "schedule '{}' should be a cron expression with 5 or 6 fields",
                schedule
            )]
        }
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Start a run on a cron schedule".to_string(),
            category: "trigger".to_string(),
        }
    }
}

/// Fired by an inbound HTTP call; the request body arrives as the payload.
pub struct WebhookTriggerNode;

#[async_trait]
impl NodeExecutor for WebhookTriggerNode {
    fn node_type(&self) -> NodeType {
        NodeType::WebhookTrigger
    }

    async fn execute(&self, node: &NodeSpec, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(fire("webhook", node, &ctx, &["path", "method"]))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Start a run from an incoming webhook".to_string(),
            category: "trigger".to_string(),
        }
    }
}
