use crate::template;
use async_trait::async_trait;
use pipecore::{
    ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeOutput, NodeSpec, NodeType, Value,
};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

const FORMATS: &[&str] = &["json", "text"];

/// Upstream results keyed by dependency id.
fn collect_upstream(ctx: &NodeContext) -> HashMap<String, Value> {
    ctx.upstream_results()
        .map(|(id, value)| (id.to_string(), value.clone()))
        .collect()
}

/// Write data to a file
///
/// Writes `content` when configured, otherwise the upstream results. A single
/// upstream result is written as-is; several are written as an object keyed
/// by node id. Parent directories are created as needed.
pub struct FileStorageNode;

impl FileStorageNode {
    fn payload(node: &NodeSpec, ctx: &NodeContext) -> Value {
        if let Some(content) = node.config("content") {
            return template::render_value(content, &ctx.inputs);
        }
        let mut upstream = collect_upstream(ctx);
        if upstream.len() == 1 {
            upstream.drain().map(|(_, v)| v).next().unwrap_or_default()
        } else {
            Value::Object(upstream)
        }
    }
}

#[async_trait]
impl NodeExecutor for FileStorageNode {
    fn node_type(&self) -> NodeType {
        NodeType::FileStorage
    }

    async fn execute(&self, node: &NodeSpec, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let path = node
            .require_config("path")?
            .as_str()
            .map(|raw| template::render(raw, &ctx.inputs))
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| NodeError::Configuration("path must be a non-empty string".to_string()))?;
        let path = PathBuf::from(path);

        let format_value = node.get_config_or("format", Value::from("json"));
        let format = format_value.as_str().unwrap_or("json");
        let append = node.config("append").and_then(Value::as_bool).unwrap_or(false);

        let payload = Self::payload(node, &ctx);
        let mut data = match format {
            "json" => serde_json::to_string_pretty(&payload)
                .map_err(|e| NodeError::ExecutionFailed(format!("Failed to encode JSON: {}", e)))?,
            "text" => template::display(&payload),
            other => {
                return Err(NodeError::Configuration(format!("Unsupported format: {}", other)));
            }
        };
        if append {
            data.push('\n');
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                NodeError::ExecutionFailed(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to open {}: {}", path.display(), e)))?;
        file.write_all(data.as_bytes())
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to write {}: {}", path.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to write {}: {}", path.display(), e)))?;

        ctx.events.info(format!("Wrote {} bytes to {}", data.len(), path.display()));

        let mut result = HashMap::new();
        result.insert("path".to_string(), Value::from(path.display().to_string()));
        result.insert("bytes".to_string(), Value::from(data.len() as u64));
        result.insert("format".to_string(), Value::from(format));
        Ok(NodeOutput::new(Value::Object(result)))
    }

    fn validate(&self, node: &NodeSpec) -> Vec<String> {
        match node.config("format") {
            None => Vec::new(),
            Some(Value::String(f)) if FORMATS.contains(&f.as_str()) => Vec::new(),
            Some(other) => vec![format!(
                "format {} is not supported (expected one of: {})",
                template::display(other),
                FORMATS.join(", ")
            )],
        }
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Write upstream results or rendered content to a file".to_string(),
            category: "sink".to_string(),
        }
    }
}

/// Collects the results of every upstream node under its id.
pub struct ResultsNode;

#[async_trait]
impl NodeExecutor for ResultsNode {
    fn node_type(&self) -> NodeType {
        NodeType::Results
    }

    async fn execute(&self, _node: &NodeSpec, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let collected = collect_upstream(&ctx);
        ctx.events.info(format!("Collected {} result(s)", collected.len()));
        Ok(NodeOutput::new(Value::Object(collected)))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Gather upstream results as the run's output".to_string(),
            category: "sink".to_string(),
        }
    }
}
