//! HTTP API for the task gateway
//!
//! Routes mirror the task service this gateway replaces:
//! `POST /api/tasks/execute`, `POST /api/tasks/browser`,
//! `GET /api/tasks/status/{task_id}`, `POST /api/tasks/cancel/{task_id}`,
//! plus task listing, stats and `/health`.

use std::str::FromStr;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::{
        header::{
            AUTHORIZATION, CONTENT_TYPE, REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS,
            X_DNS_PREFETCH_CONTROL, X_FRAME_OPTIONS,
        },
        HeaderName, HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use taskgate_foundation::{Error, ServerConfig};
use taskgate_task::{GatewayStats, Task, TaskGateway, TaskId, TaskRequest};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{error, info, warn};

/// Error response body: `{ "error": ..., "message": ... }`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: &'static str,
    message: String,
}

impl ApiError {
    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: "InvalidRequest",
            message: message.into(),
        }
    }

    fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: "Internal server error",
            message: "An unexpected error occurred".to_string(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        if !err.is_user_facing() {
            error!("Request failed: {}", err);
            return Self::internal();
        }

        let status = match &err {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::QueueFull(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            error: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            error: "InvalidRequest",
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "error": self.error, "message": self.message })),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Success envelope: `{ "status": "success", "data": ... }`
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    status: &'static str,
    data: T,
}

fn success<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        status: "success",
        data,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submitted {
    task_id: TaskId,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    command: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserRequest {
    browser_task: Option<Value>,
}

/// Hardening headers added to every response
const SECURITY_HEADERS: [(HeaderName, &str); 4] = [
    (X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (X_FRAME_OPTIONS, "SAMEORIGIN"),
    (REFERRER_POLICY, "no-referrer"),
    (X_DNS_PREFETCH_CONTROL, "off"),
];

/// Build the router
///
/// # Errors
///
/// Returns an error if the configured CORS origin is not a valid header value.
pub fn router(gateway: TaskGateway, server: &ServerConfig) -> anyhow::Result<Router> {
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/stats", get(task_stats))
        .route("/api/tasks/execute", post(execute_command))
        .route("/api/tasks/browser", post(execute_browser))
        .route("/api/tasks/status/{task_id}", get(task_status))
        .route("/api/tasks/cancel/{task_id}", post(cancel_task))
        .with_state(gateway)
        .layer(DefaultBodyLimit::max(server.max_request_bytes));

    if let Some(origin) = &server.cors_origin {
        let origin = HeaderValue::from_str(origin)
            .map_err(|e| anyhow::anyhow!("invalid CORS origin '{}': {}", origin, e))?;
        app = app.layer(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_headers([CONTENT_TYPE, AUTHORIZATION]),
        );
    }

    for (name, value) in SECURITY_HEADERS {
        app = app.layer(SetResponseHeaderLayer::if_not_present(
            name,
            HeaderValue::from_static(value),
        ));
    }

    Ok(app.layer(TraceLayer::new_for_http()))
}

/// Start the HTTP API server and run until Ctrl-C
///
/// Active tasks are cancelled once the server stops accepting requests.
///
/// # Errors
///
/// Returns an error if the server fails to bind or start.
pub async fn serve(gateway: TaskGateway, server: &ServerConfig) -> anyhow::Result<()> {
    let app = router(gateway.clone(), server)?;

    let addr = server.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "starting HTTP API server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let cancelled = gateway.shutdown().await;
    info!("Server stopped, {} active tasks cancelled", cancelled.len());
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    }))
}

async fn execute_command(
    State(gateway): State<TaskGateway>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> ApiResult<Envelope<Submitted>> {
    let Json(request) = payload?;
    let command = request
        .command
        .ok_or_else(|| ApiError::invalid_request("Command is required"))?;

    let task_id = gateway.submit(TaskRequest::Command(command))?;
    Ok(success(Submitted { task_id }))
}

async fn execute_browser(
    State(gateway): State<TaskGateway>,
    payload: Result<Json<BrowserRequest>, JsonRejection>,
) -> ApiResult<Envelope<Submitted>> {
    let Json(request) = payload?;
    let instruction = request
        .browser_task
        .ok_or_else(|| ApiError::invalid_request("Browser task is required"))?;

    let task_id = gateway.submit(TaskRequest::Browser(instruction))?;
    Ok(success(Submitted { task_id }))
}

async fn task_status(
    State(gateway): State<TaskGateway>,
    Path(task_id): Path<String>,
) -> ApiResult<Task> {
    let task_id = TaskId::from_str(&task_id)?;
    Ok(Json(gateway.status(task_id)?))
}

async fn cancel_task(
    State(gateway): State<TaskGateway>,
    Path(task_id): Path<String>,
) -> ApiResult<Envelope<Task>> {
    let task_id = TaskId::from_str(&task_id)?;
    let task = gateway.cancel(task_id).await?;
    Ok(success(task))
}

async fn list_tasks(State(gateway): State<TaskGateway>) -> Json<Envelope<Vec<Task>>> {
    success(gateway.list())
}

async fn task_stats(State(gateway): State<TaskGateway>) -> Json<Envelope<GatewayStats>> {
    success(gateway.stats())
}
