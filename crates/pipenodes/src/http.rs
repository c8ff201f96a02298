use crate::template;
use async_trait::async_trait;
use pipecore::{
    ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeOutput, NodeSpec, NodeType, Value,
};
use std::collections::HashMap;
use std::time::Duration;

/// HTTP request node
///
/// `url`, `headers` and string `body` values may reference inputs with
/// `{{path}}`. Responses with status 400 and above fail the node so the
/// runtime's retry policy applies.
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for HttpRequestNode {
    fn node_type(&self) -> NodeType {
        NodeType::HttpRequest
    }

    async fn execute(&self, node: &NodeSpec, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let url = node
            .require_config("url")?
            .as_str()
            .map(|raw| template::render(raw, &ctx.inputs))
            .ok_or_else(|| NodeError::InvalidInputType {
                field: "url".to_string(),
                expected: "string".to_string(),
                actual: "other".to_string(),
            })?;
        let method_value = node.get_config_or("method", Value::from("GET"));
        let method = method_value.as_str().unwrap_or("GET").to_uppercase();

        ctx.events.info(format!("{} {}", method, url));

        let mut request = match method.as_str() {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "PATCH" => self.client.patch(&url),
            "DELETE" => self.client.delete(&url),
            _ => return Err(NodeError::Configuration(format!("Unsupported method: {}", method))),
        };

        if let Some(Value::Object(headers)) = node.config("headers") {
            for (key, value) in headers {
                request = request.header(key, template::display(&template::render_value(value, &ctx.inputs)));
            }
        }

        match node.config("body").map(|body| template::render_value(body, &ctx.inputs)) {
            Some(Value::Null) | None => {}
            Some(Value::String(text)) => request = request.body(text),
            Some(json) => request = request.json(&json),
        }

        if let Some(ms) = node.config("timeout_ms").and_then(Value::as_f64) {
            request = request.timeout(Duration::from_millis(ms as u64));
        }

        let response = tokio::select! {
            response = request.send() => response
                .map_err(|e| NodeError::ExecutionFailed(format!("HTTP request failed: {}", e)))?,
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        };

        let status = response.status().as_u16();
        let headers_map: HashMap<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(v.to_str().unwrap_or(""))))
            .collect();

        let body_text = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;

        ctx.events.info(format!("Response status: {}", status));

        if status >= 400 {
            return Err(NodeError::ExecutionFailed(format!(
                "{} {} returned status {}",
                method, url, status
            )));
        }

        let body = serde_json::from_str::<Value>(&body_text).unwrap_or(Value::String(body_text));

        let mut result = HashMap::new();
        result.insert("status".to_string(), Value::from(f64::from(status)));
        result.insert("body".to_string(), body);
        result.insert("headers".to_string(), Value::Object(headers_map));
        Ok(NodeOutput::new(Value::Object(result)))
    }

    fn validate(&self, node: &NodeSpec) -> Vec<String> {
        match node.config("headers") {
            None | Some(Value::Object(_)) => Vec::new(),
            Some(_) => vec!["headers must be an object of name/value pairs".to_string()],
        }
    }

    fn estimate_duration(&self, node: &NodeSpec) -> Option<Duration> {
        let ms = node.config("timeout_ms").and_then(Value::as_f64).unwrap_or(1_000.0);
        Some(Duration::from_millis(ms as u64))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Make HTTP requests".to_string(),
            category: "action".to_string(),
        }
    }
}
