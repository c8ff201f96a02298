use pipecore::{
    Checkpoint, EdgeKind, ExecutionContext, ExecutionEvent, ExecutionStatus, NodeCategory,
    NodeExecutionState, NodeStatus, NodeType, Value, WorkflowDefinition,
};
use std::collections::HashMap;
use uuid::Uuid;

const WORKFLOW: &str = r#"{
    "id": "invoice-ocr",
    "name": "Invoice OCR",
    "version": "2.1.0",
    "nodes": [
        { "id": "start", "type": "manual_trigger", "position": { "x": 10, "y": 20 },
          "data": { "label": "Start" } },
        { "id": "shot", "type": "screenshot", "data": { "label": "Capture screen" } },
        { "id": "read", "type": "ocr_extract",
          "data": { "label": "Read text", "config": { "language": "eng", "confidence": 0.8 } } },
        { "id": "warp", "type": "warp_drive", "data": { "label": "Unknown" } }
    ],
    "edges": [
        { "id": "e1", "source": "start", "target": "shot" },
        { "id": "e2", "source": "shot", "target": "read", "type": "conditional",
          "sourceHandle": "out", "targetHandle": "in" }
    ],
    "metadata": { "category": "finance", "tags": ["ocr"] }
}"#;

#[test]
fn test_workflow_parses_editor_json() {
    let wf = WorkflowDefinition::from_json(WORKFLOW).unwrap();

    assert_eq!(wf.id, "invoice-ocr");
    assert_eq!(wf.version, "2.1.0");
    assert_eq!(wf.nodes.len(), 4);
    assert_eq!(wf.nodes[0].position.x, 10.0);
    assert_eq!(wf.nodes[2].node_type, NodeType::OcrExtract);
    assert_eq!(wf.nodes[2].config("language"), Some(&Value::from("eng")));
    assert_eq!(wf.nodes[2].config("confidence").and_then(Value::as_f64), Some(0.8));
    assert_eq!(wf.nodes[3].node_type, NodeType::Unknown);

    assert_eq!(wf.edges[0].kind, EdgeKind::Default);
    assert_eq!(wf.edges[1].kind, EdgeKind::Conditional);
    assert_eq!(wf.edges[1].source_handle.as_deref(), Some("out"));

    let triggers: Vec<_> = wf.trigger_nodes().map(|n| n.id.as_str()).collect();
    assert_eq!(triggers, vec!["start"]);
}

#[test]
fn test_workflow_serializes_camel_case() {
    let mut wf = WorkflowDefinition::new("wf", "Demo");
    wf.add_node(pipecore::NodeSpec::new("t", NodeType::WebhookTrigger).with_config("path", "/hook"));
    wf.connect("t", "t2").source_handle = Some("main".to_string());

    let json: serde_json::Value = serde_json::from_str(&wf.to_json_pretty().unwrap()).unwrap();
    assert_eq!(json["nodes"][0]["type"], "webhook_trigger");
    assert_eq!(json["nodes"][0]["data"]["config"]["path"], "/hook");
    assert_eq!(json["edges"][0]["id"], "t->t2");
    assert_eq!(json["edges"][0]["sourceHandle"], "main");
    assert_eq!(json["edges"][0]["type"], "default");
    assert!(json.get("metadata").is_none());
}

#[test]
fn test_node_catalogue() {
    assert_eq!(NodeType::ALL.len(), 15);
    assert!(NodeType::ALL.iter().all(|t| *t != NodeType::Unknown));
    assert_eq!(NodeType::ScheduleTrigger.category(), NodeCategory::Trigger);
    assert_eq!(NodeType::OcrRegion.category(), NodeCategory::Interface);
    assert_eq!(NodeType::IfCondition.category(), NodeCategory::Logic);
    assert!(NodeType::Results.is_terminal());
    assert_eq!(NodeType::HttpRequest.required_config(), ["url", "method"]);
    assert_eq!(NodeType::TypeText.to_string(), "type_text");

    let rules = NodeType::OcrExtract.rules();
    assert!(rules.allows_source(NodeType::Screenshot));
    assert!(!rules.allows_source(NodeType::HttpRequest));
    assert!(!NodeType::Results.rules().allows_target(NodeType::FileStorage));
    assert!(!NodeType::HttpRequest.rules().allows_target(NodeType::ManualTrigger));
}

#[test]
fn test_value_conversions_and_truthiness() {
    let json = serde_json::json!({ "n": 3, "items": [true, null, "x"] });
    let value = Value::from(json);

    let object = value.as_object().unwrap();
    assert_eq!(object["n"], Value::Number(3.0));
    assert_eq!(
        object["items"],
        Value::Array(vec![Value::Bool(true), Value::Null, Value::from("x")])
    );

    assert!(Value::from("yes").is_truthy());
    assert!(!Value::from("false").is_truthy());
    assert!(!Value::from(0.0).is_truthy());
    assert!(Value::from("  ").is_blank());
    assert!(!Value::from(false).is_blank());
}

fn sample_checkpoint(status: ExecutionStatus) -> Checkpoint {
    let execution_id = Uuid::new_v4();
    let mut variables = HashMap::new();
    variables.insert("customer".to_string(), Value::from("acme"));
    let mut node_results = HashMap::new();
    node_results.insert("fetch".to_string(), Value::from(200.0));

    let context = ExecutionContext {
        workflow_id: "wf".to_string(),
        execution_id,
        started_at: chrono::Utc::now(),
        variables,
        node_results,
        current_node: Some("store".to_string()),
        status,
        error: None,
        total_nodes: 2,
        completed_nodes: 1,
        failed_nodes: 0,
        skipped_nodes: 0,
    };

    let mut states = HashMap::new();
    for (id, node_status) in [("fetch", NodeStatus::Completed), ("store", NodeStatus::Running)] {
        states.insert(
            id.to_string(),
            NodeExecutionState {
                node_id: id.to_string(),
                status: node_status,
                started_at: Some(chrono::Utc::now()),
                ended_at: None,
                duration_ms: None,
                result: None,
                error: None,
                retry_count: 0,
                max_retries: 3,
            },
        );
    }

    Checkpoint::capture(&context, &states)
}

#[test]
fn test_checkpoint_json_shape() {
    let checkpoint = sample_checkpoint(ExecutionStatus::Running);
    assert!(checkpoint.can_resume);

    let json: serde_json::Value = serde_json::from_str(&checkpoint.to_json().unwrap()).unwrap();
    for key in ["timestamp", "contextSnapshot", "nodeStatesSnapshot", "canResume"] {
        assert!(json.get(key).is_some(), "missing {}", key);
    }
    assert_eq!(json["contextSnapshot"]["status"], "running");
    assert_eq!(json["contextSnapshot"]["nodeResults"]["fetch"], 200.0);
    assert_eq!(json["nodeStatesSnapshot"]["store"]["maxRetries"], 3);
}

#[test]
fn test_checkpoint_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.checkpoint.json");

    let checkpoint = sample_checkpoint(ExecutionStatus::Paused);
    checkpoint.write_to(&path).unwrap();
    let restored = Checkpoint::read_from(&path).unwrap();

    assert_eq!(restored, checkpoint);
    assert_eq!(restored.execution_id(), checkpoint.execution_id());
}

#[test]
fn test_terminal_checkpoint_cannot_resume() {
    assert!(!sample_checkpoint(ExecutionStatus::Completed).can_resume);
    assert!(!sample_checkpoint(ExecutionStatus::Cancelled).can_resume);
}

#[test]
fn test_events_are_tagged() {
    let id = Uuid::new_v4();
    let event = ExecutionEvent::NodeSkipped {
        execution_id: id,
        node_id: "after".to_string(),
        reason: "dependency bad did not complete".to_string(),
        timestamp: chrono::Utc::now(),
    };

    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "NodeSkipped");
    assert_eq!(event.execution_id(), id);
}

#[tokio::test]
async fn test_event_bus_broadcasts_node_events() {
    let bus = pipecore::EventBus::new(16);
    let mut rx = bus.subscribe();
    let id = Uuid::new_v4();

    bus.create_emitter(id, "n1".to_string()).info("halfway");

    match rx.recv().await.unwrap() {
        ExecutionEvent::NodeEvent { node_id, event, .. } => {
            assert_eq!(node_id, "n1");
            assert!(matches!(event, pipecore::NodeEvent::Info { message } if message == "halfway"));
        }
        other => panic!("unexpected event {:?}", other),
    }
}
