use pipecore::{
    EventBus, ExecutionId, ExecutionStatus, NodeContext, NodeError, NodeExecutor, NodeSpec,
    NodeType, Value, WorkflowDefinition,
};
use pipenodes::{
    standard_registry, DelayNode, FileStorageNode, HttpRequestNode, IfConditionNode,
    ManualTriggerNode, ResultsNode, ScheduleTriggerNode, SetVariableNode,
};
use piperuntime::{ExecutionOptions, PipelineRuntime, RuntimeConfig};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

// Helper function to create a test context
fn create_test_context(node_id: &str, inputs: HashMap<String, Value>, deps: &[&str]) -> NodeContext {
    let event_bus = EventBus::new(100);
    let execution_id = ExecutionId::new_v4();

    NodeContext {
        execution_id,
        node_id: node_id.to_string(),
        inputs,
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
        attempt: 1,
        events: event_bus.create_emitter(execution_id, node_id.to_string()),
        cancellation: tokio_util::sync::CancellationToken::new(),
    }
}

fn object(pairs: &[(&str, Value)]) -> Value {
    Value::Object(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
}

/// Minimal HTTP server: `/missing` answers 404, anything else echoes the
/// request line back as JSON.
async fn spawn_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let request_line = request.lines().next().unwrap_or_default().to_string();
                let has_token = request.to_lowercase().contains("x-token: abc");

                let (status, body) = if request_line.contains("/missing") {
                    ("404 Not Found", "{\"error\":\"missing\"}".to_string())
                } else {
                    (
                        "200 OK",
                        serde_json::json!({ "requestLine": request_line, "authorized": has_token, "id": 7 })
                            .to_string(),
                    )
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{}", addr)
}

#[tokio::test]
async fn test_manual_trigger_passes_payload() {
    let mut inputs = HashMap::new();
    inputs.insert("payload".to_string(), object(&[("name", Value::from("ada"))]));
    let ctx = create_test_context("start", inputs, &[]);

    let output = ManualTriggerNode
        .execute(&NodeSpec::new("start", NodeType::ManualTrigger), ctx)
        .await
        .unwrap();

    let result = output.result.as_object().unwrap();
    assert_eq!(result.get("trigger"), Some(&Value::from("manual")));
    assert!(result.contains_key("triggeredAt"));
    assert_eq!(result.get("payload"), Some(&object(&[("name", Value::from("ada"))])));
}

#[test]
fn test_schedule_trigger_validation() {
    let node = |schedule: &str| {
        NodeSpec::new("cron", NodeType::ScheduleTrigger).with_config("schedule", schedule)
    };
    assert!(ScheduleTriggerNode.validate(&node("*/5 * * * *")).is_empty());
    assert!(ScheduleTriggerNode.validate(&node("@daily")).is_empty());
    assert_eq!(ScheduleTriggerNode.validate(&node("every minute")).len(), 1);
}

#[tokio::test]
async fn test_http_request_renders_and_parses_json() {
    let base = spawn_server().await;
    let node = NodeSpec::new("fetch", NodeType::HttpRequest)
        .with_config("url", format!("{}/users/{{{{user.id}}}}", base))
        .with_config("method", "get")
        .with_config("headers", object(&[("x-token", Value::from("{{token}}"))]));

    let mut inputs = HashMap::new();
    inputs.insert("user".to_string(), object(&[("id", Value::from(42.0))]));
    inputs.insert("token".to_string(), Value::from("abc"));
    let ctx = create_test_context("fetch", inputs, &[]);

    let output = HttpRequestNode::new().execute(&node, ctx).await.unwrap();
    let result = output.result.as_object().unwrap();

    assert_eq!(result.get("status"), Some(&Value::from(200.0)));
    let body = result.get("body").and_then(Value::as_object).unwrap();
    assert_eq!(body.get("id"), Some(&Value::from(7.0)));
    assert_eq!(body.get("authorized"), Some(&Value::Bool(true)));
    assert_eq!(
        body.get("requestLine"),
        Some(&Value::from("GET /users/42 HTTP/1.1"))
    );
}

#[tokio::test]
async fn test_http_error_status_fails_node() {
    let base = spawn_server().await;
    let node = NodeSpec::new("fetch", NodeType::HttpRequest)
        .with_config("url", format!("{}/missing", base))
        .with_config("method", "GET");

    let err = HttpRequestNode::new()
        .execute(&node, create_test_context("fetch", HashMap::new(), &[]))
        .await
        .unwrap_err();

    match err {
        NodeError::ExecutionFailed(message) => assert!(message.contains("404"), "{}", message),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_http_unsupported_method() {
    let node = NodeSpec::new("fetch", NodeType::HttpRequest)
        .with_config("url", "http://127.0.0.1:9/")
        .with_config("method", "FETCH");

    let err = HttpRequestNode::new()
        .execute(&node, create_test_context("fetch", HashMap::new(), &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::Configuration(_)));
}

#[tokio::test]
async fn test_delay_passes_upstream_through() {
    let node = NodeSpec::new("wait", NodeType::Delay).with_config("duration_ms", 20.0);
    let mut inputs = HashMap::new();
    inputs.insert("fetch".to_string(), Value::from(1.0));
    inputs.insert("unrelated".to_string(), Value::from(2.0));
    let ctx = create_test_context("wait", inputs, &["fetch"]);

    let started = Instant::now();
    let output = DelayNode.execute(&node, ctx).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_eq!(output.result, object(&[("fetch", Value::from(1.0))]));
    assert_eq!(DelayNode.estimate_duration(&node), Some(Duration::from_millis(20)));
}

#[tokio::test]
async fn test_delay_observes_cancellation() {
    let node = NodeSpec::new("wait", NodeType::Delay).with_config("duration_ms", 60_000.0);
    let ctx = create_test_context("wait", HashMap::new(), &[]);
    let token = ctx.cancellation.clone();

    let handle = tokio::spawn(async move { DelayNode.execute(&node, ctx).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    assert_eq!(result.unwrap_err(), NodeError::Cancelled);
}

#[tokio::test]
async fn test_if_condition_branches() {
    let node = NodeSpec::new("check", NodeType::IfCondition)
        .with_config("condition", "fetch.status >= 400 || fetch.body contains 'error'");

    let mut inputs = HashMap::new();
    inputs.insert(
        "fetch".to_string(),
        object(&[("status", Value::from(200.0)), ("body", Value::from("no error here"))]),
    );
    let output = IfConditionNode
        .execute(&node, create_test_context("check", inputs, &["fetch"]))
        .await
        .unwrap();

    assert_eq!(
        output.result,
        object(&[("result", Value::Bool(true)), ("branch", Value::from("true"))])
    );
}

#[tokio::test]
async fn test_if_condition_rejects_bad_expression() {
    let node = NodeSpec::new("check", NodeType::IfCondition).with_config("condition", "status == 'open");

    assert_eq!(IfConditionNode.validate(&node).len(), 1);
    let err = IfConditionNode
        .execute(&node, create_test_context("check", HashMap::new(), &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::Configuration(_)));
}

#[tokio::test]
async fn test_set_variable_keeps_type() {
    let node = NodeSpec::new("set", NodeType::SetVariable)
        .with_config("name", "retries")
        .with_config("value", "{{fetch.count}}");
    let mut inputs = HashMap::new();
    inputs.insert("fetch".to_string(), object(&[("count", Value::from(3.0))]));

    let output = SetVariableNode
        .execute(&node, create_test_context("set", inputs, &["fetch"]))
        .await
        .unwrap();

    assert_eq!(output.result, Value::from(3.0));
    assert_eq!(output.variables.get("retries"), Some(&Value::from(3.0)));
}

#[tokio::test]
async fn test_set_variable_requires_name() {
    let node = NodeSpec::new("set", NodeType::SetVariable)
        .with_config("name", "  ")
        .with_config("value", 1.0);
    let err = SetVariableNode
        .execute(&node, create_test_context("set", HashMap::new(), &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::Configuration(_)));
}

#[tokio::test]
async fn test_file_storage_writes_upstream_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/out/{{run}}.json");
    let node = NodeSpec::new("save", NodeType::FileStorage)
        .with_config("path", path.to_string_lossy().to_string());

    let mut inputs = HashMap::new();
    inputs.insert("run".to_string(), Value::from("first"));
    inputs.insert("fetch".to_string(), object(&[("id", Value::from(7.0))]));
    let output = FileStorageNode
        .execute(&node, create_test_context("save", inputs, &["fetch"]))
        .await
        .unwrap();

    let written = dir.path().join("nested/out/first.json");
    let text = std::fs::read_to_string(&written).unwrap();
    let parsed: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, object(&[("id", Value::from(7.0))]));

    let result = output.result.as_object().unwrap();
    assert_eq!(result.get("bytes"), Some(&Value::from(text.len() as u64)));
    assert_eq!(
        result.get("path"),
        Some(&Value::from(written.display().to_string()))
    );
}

#[tokio::test]
async fn test_file_storage_appends_text() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.txt");
    let node = NodeSpec::new("log", NodeType::FileStorage)
        .with_config("path", path.to_string_lossy().to_string())
        .with_config("format", "text")
        .with_config("append", true)
        .with_config("content", "status={{code}}");

    for code in [200.0, 404.0] {
        let mut inputs = HashMap::new();
        inputs.insert("code".to_string(), Value::from(code));
        FileStorageNode
            .execute(&node, create_test_context("log", inputs, &[]))
            .await
            .unwrap();
    }

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "status=200\nstatus=404\n");
}

#[test]
fn test_file_storage_validates_format() {
    let node = NodeSpec::new("save", NodeType::FileStorage)
        .with_config("path", "out.csv")
        .with_config("format", "csv");
    assert_eq!(FileStorageNode.validate(&node).len(), 1);
}

#[tokio::test]
async fn test_results_collects_dependencies() {
    let mut inputs = HashMap::new();
    inputs.insert("a".to_string(), Value::from(1.0));
    inputs.insert("b".to_string(), Value::from("two"));
    inputs.insert("var".to_string(), Value::from("ignored"));

    let output = ResultsNode
        .execute(
            &NodeSpec::new("out", NodeType::Results),
            create_test_context("out", inputs, &["a", "b"]),
        )
        .await
        .unwrap();

    assert_eq!(
        output.result,
        object(&[("a", Value::from(1.0)), ("b", Value::from("two"))])
    );
}

#[test]
fn test_standard_registry_covers_non_desktop_types() {
    let registry = standard_registry();
    for node_type in NodeType::ALL {
        let expected = !matches!(
            node_type.category(),
            pipecore::NodeCategory::Interface | pipecore::NodeCategory::Unknown
        );
        assert_eq!(registry.contains(*node_type), expected, "{}", node_type);
    }
}

#[tokio::test]
async fn test_pipeline_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("{{name}}.json");

    let mut workflow = WorkflowDefinition::new("greet", "Greeting pipeline");
    workflow.add_node(NodeSpec::new("t", NodeType::ManualTrigger));
    workflow.add_node(
        NodeSpec::new("v", NodeType::SetVariable)
            .with_config("name", "name")
            .with_config("value", "{{t.payload.name}}"),
    );
    workflow.add_node(
        NodeSpec::new("c", NodeType::IfCondition).with_config("condition", "v == 'ada'"),
    );
    workflow.add_node(
        NodeSpec::new("f", NodeType::FileStorage)
            .with_config("path", target.to_string_lossy().to_string()),
    );
    workflow.add_node(NodeSpec::new("r", NodeType::Results));
    workflow.connect("t", "v");
    workflow.connect("v", "c");
    workflow.connect("c", "f");
    workflow.connect("f", "r");

    let runtime = PipelineRuntime::with_registry(standard_registry(), RuntimeConfig::default());
    let report = runtime.validate(&workflow);
    assert!(report.is_valid, "{:?}", report.errors);

    let options = ExecutionOptions::default()
        .with_variable("payload", object(&[("name", Value::from("ada"))]));
    let result = runtime.execute(&workflow, options).await.unwrap();

    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.order, vec!["t", "v", "c", "f", "r"]);
    assert_eq!(result.results.get("v"), Some(&Value::from("ada")));
    assert_eq!(result.context.variables.get("name"), Some(&Value::from("ada")));

    let saved = std::fs::read_to_string(dir.path().join("ada.json")).unwrap();
    let saved: Value = serde_json::from_str(&saved).unwrap();
    assert_eq!(
        saved,
        object(&[("result", Value::Bool(true)), ("branch", Value::from("true"))])
    );

    let collected = result.results.get("r").and_then(Value::as_object).unwrap();
    assert!(collected.contains_key("f"));
}
