use actix_cors::Cors;
use actix_web::{
    get, post, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult,
};
use actix_ws::Message;
use pipecore::{FlowError, NodeType, Value, WorkflowDefinition, WorkflowError};
use piperuntime::{ExecutionOptions, PipelineRuntime, RuntimeConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Application state shared across handlers
struct AppState {
    runtime: Arc<PipelineRuntime>,
}

/// Request body for workflow execution; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExecuteRequest {
    /// Seed variables, merged over `options.variables`.
    inputs: HashMap<String, serde_json::Value>,
    options: Option<ExecutionOptions>,
}

/// Response for workflow creation
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowResponse {
    id: String,
    message: String,
    valid: bool,
}

/// Response for a started execution
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionResponse {
    execution_id: Uuid,
    workflow_id: String,
}

/// Response for pause/resume/cancel
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ControlResponse {
    execution_id: Uuid,
    action: &'static str,
    /// False when the run was not in a state the action applies to.
    applied: bool,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
struct EventFilter {
    execution_id: Option<Uuid>,
}

fn error_response(err: FlowError) -> HttpResponse {
    let message = err.to_string();
    match err {
        FlowError::Validation(report) => HttpResponse::UnprocessableEntity().json(serde_json::json!({
            "error": message,
            "report": report,
        })),
        FlowError::Workflow(WorkflowError::NotFound(_) | WorkflowError::ExecutionNotFound(_)) => {
            HttpResponse::NotFound().json(ErrorResponse { error: message })
        }
        FlowError::Workflow(_) => HttpResponse::BadRequest().json(ErrorResponse { error: message }),
        _ => {
            error!("Request failed: {}", message);
            HttpResponse::InternalServerError().json(ErrorResponse { error: message })
        }
    }
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "pipeflow"
    }))
}

/// List all workflows
#[get("/api/workflows")]
async fn list_workflows(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let workflow_list: Vec<_> = data
        .runtime
        .list_workflows()
        .await
        .iter()
        .map(|w| {
            serde_json::json!({
                "id": w.id,
                "name": w.name,
                "version": w.version,
                "nodes": w.nodes.len(),
                "edges": w.edges.len(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(workflow_list))
}

/// Create a new workflow
///
/// Invalid workflows are stored too so an editor can save work in progress;
/// they are rejected when executed.
#[post("/api/workflows")]
async fn create_workflow(
    data: web::Data<AppState>,
    workflow: web::Json<WorkflowDefinition>,
) -> ActixResult<impl Responder> {
    let mut workflow = workflow.into_inner();
    if workflow.id.trim().is_empty() {
        workflow.id = Uuid::new_v4().to_string();
    }
    let workflow_id = workflow.id.clone();
    let valid = data.runtime.validate(&workflow).is_valid;

    info!("Creating workflow: {} ({})", workflow.name, workflow_id);
    data.runtime.register_workflow(workflow).await;

    Ok(HttpResponse::Created().json(WorkflowResponse {
        id: workflow_id,
        message: "Workflow created successfully".to_string(),
        valid,
    }))
}

/// Get a specific workflow
#[get("/api/workflows/{id}")]
async fn get_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    Ok(match data.runtime.get_workflow(&path.into_inner()).await {
        Ok(workflow) => HttpResponse::Ok().json(workflow),
        Err(e) => error_response(e),
    })
}

/// Delete a workflow
#[actix_web::delete("/api/workflows/{id}")]
async fn delete_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();

    match data.runtime.remove_workflow(&workflow_id).await {
        Some(_) => {
            info!("Deleted workflow: {}", workflow_id);
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "message": "Workflow deleted successfully"
            })))
        }
        None => Ok(HttpResponse::NotFound().json(ErrorResponse {
            error: format!("Workflow {} not found", workflow_id),
        })),
    }
}

/// Validate a stored workflow
#[post("/api/workflows/{id}/validate")]
async fn validate_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    Ok(match data.runtime.get_workflow(&path.into_inner()).await {
        Ok(workflow) => HttpResponse::Ok().json(data.runtime.validate(&workflow)),
        Err(e) => error_response(e),
    })
}

/// Start a workflow; the run continues in the background.
#[post("/api/workflows/{id}/execute")]
async fn execute_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
    req: Option<web::Json<ExecuteRequest>>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();
    let req = req.map(web::Json::into_inner).unwrap_or_default();

    let mut options = req.options.unwrap_or_else(|| data.runtime.default_options());
    options
        .variables
        .extend(req.inputs.into_iter().map(|(k, v)| (k, Value::from(v))));

    info!("Executing workflow: {}", workflow_id);

    match data.runtime.spawn_workflow(&workflow_id, options).await {
        Ok(handle) => {
            let execution_id = handle.execution_id;
            let logged_id = workflow_id.clone();
            tokio::spawn(async move {
                match handle.wait().await {
                    Ok(result) => info!(
                        "Workflow {} execution {} finished: {:?} ({}/{} nodes)",
                        logged_id,
                        result.execution_id,
                        result.status,
                        result.context.completed_nodes,
                        result.context.total_nodes
                    ),
                    Err(e) => error!("Workflow {} execution task failed: {}", logged_id, e),
                }
            });

            Ok(HttpResponse::Accepted().json(ExecutionResponse {
                execution_id,
                workflow_id,
            }))
        }
        Err(e) => {
            error!("Workflow {} could not start: {}", workflow_id, e);
            Ok(error_response(e))
        }
    }
}

#[get("/api/executions/{id}")]
async fn execution_status(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    Ok(match data.runtime.get_execution_status(path.into_inner()).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => error_response(e),
    })
}

/// Pause, resume or cancel a run
#[post("/api/executions/{id}/{action}")]
async fn control_execution(
    data: web::Data<AppState>,
    path: web::Path<(Uuid, String)>,
) -> ActixResult<impl Responder> {
    let (execution_id, action) = path.into_inner();
    let outcome = match action.as_str() {
        "pause" => data.runtime.pause_execution(execution_id).await.map(|ok| ("pause", ok)),
        "resume" => data.runtime.resume_execution(execution_id).await.map(|ok| ("resume", ok)),
        "cancel" => data.runtime.cancel_execution(execution_id).await.map(|ok| ("cancel", ok)),
        other => {
            return Ok(HttpResponse::NotFound().json(ErrorResponse {
                error: format!("Unknown action: {}", other),
            }))
        }
    };

    Ok(match outcome {
        Ok((action, applied)) => {
            info!("{} execution {}: applied={}", action, execution_id, applied);
            HttpResponse::Ok().json(ControlResponse {
                execution_id,
                action,
                applied,
            })
        }
        Err(e) => error_response(e),
    })
}

#[get("/api/executions/{id}/checkpoint")]
async fn execution_checkpoint(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    Ok(match data.runtime.checkpoint(path.into_inner()).await {
        Ok(checkpoint) => HttpResponse::Ok().json(checkpoint),
        Err(e) => error_response(e),
    })
}

/// WebSocket endpoint for real-time events
///
/// `?execution_id=<uuid>` limits the stream to one run.
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    filter: web::Query<EventFilter>,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;
    let only = filter.into_inner().execution_id;

    info!("WebSocket client connected");

    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if only.is_some_and(|id| id != event.execution_id()) {
                                continue;
                            }
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("WebSocket client lagged, {} events dropped", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }

                // Handle incoming WebSocket messages (ping/pong)
                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

/// List the node catalogue with executor availability
#[get("/api/nodes")]
async fn list_node_types(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.runtime.registry();

    let nodes: Vec<_> = NodeType::ALL
        .iter()
        .map(|node_type| {
            let metadata = registry.metadata(*node_type);
            serde_json::json!({
                "type": node_type,
                "category": node_type.category(),
                "registered": metadata.is_some(),
                "description": metadata.map(|m| m.description).unwrap_or_default(),
                "requiredConfig": node_type.required_config(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(nodes))
}

fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(list_workflows)
        .service(create_workflow)
        .service(get_workflow)
        .service(delete_workflow)
        .service(validate_workflow)
        .service(execute_workflow)
        .service(execution_checkpoint)
        .service(execution_status)
        .service(control_execution)
        .service(websocket_events)
        .service(list_node_types);
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("🚀 Starting pipeline server");

    let runtime = PipelineRuntime::with_registry(pipenodes::standard_registry(), RuntimeConfig::from_env());

    info!("✅ Runtime initialized with standard nodes");

    let app_state = web::Data::new(AppState {
        runtime: Arc::new(runtime),
    });

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("🌐 Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(configure)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test};
    use pipecore::NodeSpec;
    use std::time::Duration;

    fn state() -> web::Data<AppState> {
        web::Data::new(AppState {
            runtime: Arc::new(PipelineRuntime::with_registry(
                pipenodes::standard_registry(),
                RuntimeConfig::default(),
            )),
        })
    }

    fn workflow(id: &str) -> WorkflowDefinition {
        let mut workflow = WorkflowDefinition::new(id, "Collect");
        workflow.add_node(NodeSpec::new("start", NodeType::ManualTrigger));
        workflow.add_node(
            NodeSpec::new("wait", NodeType::Delay).with_config("duration_ms", 10.0),
        );
        workflow.add_node(NodeSpec::new("done", NodeType::Results));
        workflow.connect("start", "wait");
        workflow.connect("wait", "done");
        workflow
    }

    #[actix_web::test]
    async fn test_health() {
        let app = test::init_service(App::new().configure(configure)).await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "healthy");
    }

    #[actix_web::test]
    async fn test_workflow_crud() {
        let app = test::init_service(App::new().app_data(state()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/workflows")
            .set_json(workflow("collect"))
            .to_request();
        let created: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(created["id"], "collect");
        assert_eq!(created["valid"], true);

        let list: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/workflows").to_request()).await;
        assert_eq!(list[0]["nodes"], 3);

        let report: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post().uri("/api/workflows/collect/validate").to_request(),
        )
        .await;
        assert_eq!(report["isValid"], true);

        let resp = test::call_service(
            &app,
            test::TestRequest::delete().uri("/api/workflows/collect").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/workflows/collect").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_execute_and_poll_status() {
        let app = test::init_service(App::new().app_data(state()).configure(configure)).await;
        test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/workflows")
                .set_json(workflow("collect"))
                .to_request(),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/workflows/collect/execute")
            .set_json(serde_json::json!({ "inputs": { "payload": { "user": "ada" } } }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let started: serde_json::Value = test::read_body_json(resp).await;
        let execution_id = started["executionId"].as_str().unwrap().to_string();

        let mut status = serde_json::Value::Null;
        for _ in 0..100 {
            status = test::call_and_read_body_json(
                &app,
                test::TestRequest::get()
                    .uri(&format!("/api/executions/{}", execution_id))
                    .to_request(),
            )
            .await;
            if status["status"] == "completed" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(status["status"], "completed");
        assert_eq!(status["completedNodes"], 3);

        let checkpoint: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get()
                .uri(&format!("/api/executions/{}/checkpoint", execution_id))
                .to_request(),
        )
        .await;
        assert_eq!(checkpoint["canResume"], false);
        assert_eq!(checkpoint["contextSnapshot"]["variables"]["payload"]["user"], "ada");

        let control: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post()
                .uri(&format!("/api/executions/{}/pause", execution_id))
                .to_request(),
        )
        .await;
        assert_eq!(control["applied"], false);
    }

    #[actix_web::test]
    async fn test_execute_errors() {
        let app = test::init_service(App::new().app_data(state()).configure(configure)).await;

        let resp = test::call_service(
            &app,
            test::TestRequest::post().uri("/api/workflows/missing/execute").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let mut invalid = workflow("broken");
        invalid.nodes.retain(|n| n.node_type != NodeType::ManualTrigger);
        invalid.edges.retain(|e| e.source != "start");
        test::call_service(
            &app,
            test::TestRequest::post().uri("/api/workflows").set_json(invalid).to_request(),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::post().uri("/api/workflows/broken/execute").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["report"]["isValid"], false);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri(&format!("/api/executions/{}", Uuid::new_v4()))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_list_nodes() {
        let app = test::init_service(App::new().app_data(state()).configure(configure)).await;
        let nodes: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/nodes").to_request()).await;
        let nodes = nodes.as_array().unwrap();
        let http = nodes.iter().find(|n| n["type"] == "http_request").unwrap();
        assert_eq!(http["registered"], true);
        let click = nodes.iter().find(|n| n["type"] == "click").unwrap();
        assert_eq!(click["registered"], false);
    }
}
