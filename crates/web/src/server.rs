//! Control API server
//!
//! Starts runs in the background and exposes their status, logs and
//! persisted results over HTTP and a per-run websocket.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use chrono::Local;
use flowcheck_common::{
    AppConfig, CaseDetails, DefaultPaths, Environment, RunParameters, TriggerInfo,
};
use flowcheck_core::{EmailNotifier, Notifier, ResultStore};
use flowcheck_driver::{SessionFactory, WorkflowSpec};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::events::RunEvent;
use crate::loghub::LogHub;
use crate::registry::{RunRegistry, WebhookAttach};
use crate::runner::{playwright_factory, Launcher};
use crate::webhook::WebhookConfig;

/// Shared server state
pub struct AppState {
    pub launcher: Launcher,
}

impl AppState {
    fn registry(&self) -> &RunRegistry {
        self.launcher.registry()
    }

    fn store(&self) -> &ResultStore {
        self.launcher.store()
    }

    fn defaults(&self) -> &DefaultPaths {
        &self.launcher.config().defaults
    }
}

/// Wire the registry, log hub, result store and launcher together
pub async fn build_state(
    config: AppConfig,
    workflow: WorkflowSpec,
    factory: Arc<dyn SessionFactory>,
) -> anyhow::Result<Arc<AppState>> {
    let store = ResultStore::new(&config.results_dir).await?;
    if config.save_screenshots_to_disk {
        tokio::fs::create_dir_all(&config.screenshots_dir).await?;
    }

    let config = Arc::new(config);
    let registry = {
        let config = config.clone();
        Arc::new(
            RunRegistry::new().with_notifiers(move |params: &RunParameters| -> Arc<dyn Notifier> {
                Arc::new(EmailNotifier::from_config(
                    &config.environment(params.env).smtp,
                ))
            }),
        )
    };
    let (hub, _dispatcher) = LogHub::spawn(registry.clone());

    let launcher = Launcher::new(
        config,
        Arc::new(workflow),
        factory,
        registry,
        store,
        hub,
    );
    Ok(Arc::new(AppState { launcher }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/run-test", post(run_test_handler))
        .route("/api/github-webhook", post(github_webhook_handler))
        .route("/api/test-status/:test_id", get(test_status_handler))
        .route("/api/active-tests", get(active_tests_handler))
        .route("/api/test-results", get(list_results_handler))
        .route("/api/test-results/:test_id", get(get_result_handler))
        .route("/api/test-webhook/:test_id", post(register_webhook_handler))
        .route("/ws/test-logs/:test_id", get(test_logs_ws_handler))
        .fallback(not_found_handler)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Load the workflow, validate the environments and serve until shutdown
pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = config.listen.parse()?;
    let workflow = WorkflowSpec::from_file(&config.workflow_path)?;
    info!(
        "Loaded workflow '{}' ({} phases) from {}",
        workflow.name,
        workflow.phases.len(),
        config.workflow_path.display()
    );

    for env in Environment::ALL {
        let env_config = config.environment(env);
        match env_config.validate() {
            Ok(()) => info!("Configuration for {}:\n{}", env, env_config.summary()),
            Err(e) => warn!("Environment {} is not usable: {}", env, e),
        }
    }

    let factory = Arc::new(playwright_factory(&config, &workflow));
    let state = build_state(config, workflow, factory).await?;

    info!("Control API starting on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Deserialize)]
struct EnvQuery {
    env: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunTestRequest {
    #[serde(default)]
    pub case_details: Option<CaseDetails>,
    #[serde(default)]
    pub notes_file_path: Option<String>,
    #[serde(default)]
    pub notes_folder_path: Option<String>,
    #[serde(default)]
    pub imaging_file_path: Option<String>,
    #[serde(default)]
    pub imaging_folder_path: Option<String>,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

impl RunTestRequest {
    /// Parameter snapshot with unset upload sources taken from `defaults`
    pub fn into_parameters(self, env: Environment, defaults: &DefaultPaths) -> RunParameters {
        let or_default = |value: Option<String>, default: &str| {
            Some(value.unwrap_or_else(|| default.to_string()))
        };
        RunParameters {
            env,
            case_details: self.case_details,
            notes_file_path: or_default(self.notes_file_path, &defaults.notes_file_path),
            notes_folder_path: or_default(self.notes_folder_path, &defaults.notes_folder_path),
            imaging_file_path: or_default(self.imaging_file_path, &defaults.imaging_file_path),
            imaging_folder_path: or_default(
                self.imaging_folder_path,
                &defaults.imaging_folder_path,
            ),
            ..Default::default()
        }
    }
}

fn started(test_id: String) -> Json<Value> {
    Json(json!({
        "status": "success",
        "message": format!("Test started with ID: {}", test_id),
        "test_id": test_id,
    }))
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": Local::now().to_rfc3339(),
        "version": flowcheck_common::VERSION,
    }))
}

async fn run_test_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EnvQuery>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let env: Environment = query
        .env
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid environment specified".to_string()))?;

    let request: RunTestRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RunTestRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))?
    };
    if let Some(webhook) = &request.webhook {
        webhook.validate().map_err(ApiError::BadRequest)?;
    }

    let webhook = request.webhook.clone();
    let parameters = request.into_parameters(env, state.defaults());
    let test_id = state.launcher.start(parameters, "run", webhook);
    Ok(started(test_id))
}

async fn github_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let payload: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON payload: {}", e)))?
    };
    let payload = payload
        .as_object()
        .filter(|object| !object.is_empty())
        .ok_or_else(|| ApiError::BadRequest("No JSON payload provided".to_string()))?;

    let text = |value: Option<&Value>| value.and_then(Value::as_str).map(str::to_string);

    let repository = text(payload.get("repository").and_then(|r| r.get("full_name")))
        .unwrap_or_else(|| "unknown".to_string());
    let sender = text(payload.get("sender").and_then(|s| s.get("login")))
        .unwrap_or_else(|| "unknown".to_string());
    let event_type = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    info!("Received GitHub webhook: {} from {}", event_type, repository);

    let env = match payload.get("env") {
        None | Some(Value::Null) => Environment::Dev,
        Some(raw) => raw
            .as_str()
            .and_then(|s| s.parse::<Environment>().ok())
            .unwrap_or_else(|| {
                warn!(
                    "Invalid environment specified in GitHub webhook: {}, defaulting to 'dev'",
                    raw
                );
                Environment::Dev
            }),
    };

    let case_details = match payload.get("case_details") {
        None | Some(Value::Null) => None,
        Some(raw) => match serde_json::from_value::<CaseDetails>(raw.clone()) {
            Ok(details) => Some(details),
            Err(e) => {
                warn!("Ignoring invalid case_details in GitHub webhook: {}", e);
                None
            }
        },
    };

    let webhook = match payload.get("webhook") {
        None | Some(Value::Null) => None,
        Some(raw) => match serde_json::from_value::<WebhookConfig>(raw.clone())
            .map_err(|e| e.to_string())
            .and_then(|w| w.validate().map(|_| w))
        {
            Ok(webhook) => Some(webhook),
            Err(e) => {
                error!("Error parsing webhook configuration: {}", e);
                None
            }
        },
    };

    let request = RunTestRequest {
        case_details,
        notes_file_path: text(payload.get("notes_file_path")),
        notes_folder_path: text(payload.get("notes_folder_path")),
        imaging_file_path: text(payload.get("imaging_file_path")),
        imaging_folder_path: text(payload.get("imaging_folder_path")),
        webhook: None,
    };
    let mut parameters = request.into_parameters(env, state.defaults());
    parameters.trigger = Some(TriggerInfo {
        repository,
        event_type,
        sender,
    });

    let test_id = state.launcher.start(parameters, "github", webhook);
    Ok(started(test_id))
}

async fn test_status_handler(
    State(state): State<Arc<AppState>>,
    Path(test_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let view = state
        .registry()
        .view(&test_id)
        .ok_or_else(|| ApiError::RunNotFound(test_id.clone()))?;

    Ok(Json(json!({
        "status": "success",
        "test_id": test_id,
        "test_status": view.state,
        "start_time": view.start_time,
        "result": view.snapshot,
        "logs": view.logs,
    })))
}

async fn active_tests_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let tests: Vec<Value> = state
        .registry()
        .list()
        .into_iter()
        .map(|view| {
            json!({
                "test_id": view.test_id,
                "status": view.state,
                "start_time": view.start_time,
                "end_time": view.end_time,
                "has_webhook": view.has_webhook,
            })
        })
        .collect();

    Json(json!({
        "status": "success",
        "count": tests.len(),
        "tests": tests,
    }))
}

async fn list_results_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let results = state.store().list().await?;
    if results.is_empty() {
        return Ok(Json(json!({
            "status": "success",
            "message": "No test results found",
            "count": 0,
            "results": [],
        })));
    }

    Ok(Json(json!({
        "status": "success",
        "count": results.len(),
        "results": results,
    })))
}

async fn get_result_handler(
    State(state): State<Arc<AppState>>,
    Path(test_id): Path<String>,
) -> ApiResult<Json<Value>> {
    // entries stay in the registry after they finish
    if let Some(view) = state.registry().view(&test_id) {
        return Ok(Json(json!({
            "status": "success",
            "message": format!("Test {} is still running or has not been saved yet", test_id),
            "test_id": test_id,
            "test_status": view.state,
            "start_time": view.start_time,
            "result": view.snapshot,
            "is_running": true,
        })));
    }

    let document = state.store().load(&test_id).await?;
    Ok(Json(json!({
        "status": "success",
        "test_id": test_id,
        "result": document,
        "is_running": false,
    })))
}

async fn register_webhook_handler(
    State(state): State<Arc<AppState>>,
    Path(test_id): Path<String>,
    Json(webhook): Json<WebhookConfig>,
) -> ApiResult<Json<Value>> {
    webhook.validate().map_err(ApiError::BadRequest)?;

    let live = state.registry().contains(&test_id);
    if !live && !state.store().exists(&test_id).await {
        return Err(ApiError::RunNotFound(test_id));
    }

    if live {
        // a finished run gets its end event from here, a running one from its task
        if let Some(WebhookAttach::Finished(event)) =
            state.registry().set_webhook(&test_id, webhook.clone())
        {
            let sender = state.launcher.webhooks().clone();
            let id = test_id.clone();
            tokio::spawn(async move {
                sender.send(&webhook, &id, &event).await;
            });
        }
    }

    Ok(Json(json!({
        "status": "success",
        "message": format!("Webhook registered for test ID: {}", test_id),
        "test_id": test_id,
    })))
}

async fn not_found_handler() -> impl IntoResponse {
    (
        axum::http::StatusCode::NOT_FOUND,
        Json(json!({ "detail": "Not Found" })),
    )
}

// ============================================================================
// Log streaming
// ============================================================================

async fn test_logs_ws_handler(
    ws: WebSocketUpgrade,
    Path(test_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_test_logs(socket, state, test_id))
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<RunEvent>>,
) -> Result<RunEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        // persisted-only runs never produce events
        None => std::future::pending().await,
    }
}

fn is_ping(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(Value::as_str).map(|t| t == "ping"))
        .unwrap_or(false)
}

async fn stream_test_logs(socket: WebSocket, state: Arc<AppState>, test_id: String) {
    let (mut sink, mut stream) = socket.split();

    // subscribe before reading the buffer so no line falls in between
    let mut events = state.registry().subscribe(&test_id);
    if events.is_none() && !state.store().exists(&test_id).await {
        let event = RunEvent::Error {
            message: format!("Test ID {} not found", test_id),
        };
        let _ = sink.send(Message::Text(event.to_json())).await;
        let _ = sink.close().await;
        return;
    }

    if let Some(view) = state.registry().view(&test_id) {
        let initial = RunEvent::InitialLogs {
            test_id: test_id.clone(),
            logs: view.logs,
            status: view.state,
        };
        if sink.send(Message::Text(initial.to_json())).await.is_err() {
            return;
        }
    }
    debug!("Log subscriber connected for {}", test_id);

    loop {
        tokio::select! {
            event = next_event(&mut events) => match event {
                Ok(event) => {
                    if sink.send(Message::Text(event.to_json())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Log subscriber for {} skipped {} events", test_id, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if is_ping(&text)
                        && sink
                            .send(Message::Text(json!({"type": "pong"}).to_string()))
                            .await
                            .is_err()
                    {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("WebSocket error for {}: {}", test_id, e);
                    break;
                }
            },
        }
    }

    debug!("Log subscriber disconnected for {}", test_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_detection() {
        assert!(is_ping(r#"{"type":"ping"}"#));
        assert!(!is_ping(r#"{"type":"hello"}"#));
        assert!(!is_ping("ping"));
    }

    #[test]
    fn test_request_fills_default_paths() {
        let request: RunTestRequest =
            serde_json::from_str(r#"{"notes_file_path": "/data/notes.pdf"}"#).unwrap();
        let params = request.into_parameters(Environment::Staging, &DefaultPaths::default());

        assert_eq!(params.env, Environment::Staging);
        assert_eq!(params.notes_file_path.as_deref(), Some("/data/notes.pdf"));
        assert_eq!(
            params.imaging_folder_path.as_deref(),
            Some("./sample_data/imaging_folder")
        );
        assert!(params.case_details.is_none());
    }
}
