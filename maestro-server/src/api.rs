//! HTTP API for the orchestrator.
//!
//! A thin request/response surface over the task manager: every
//! request authenticates against the shared-secret `X-API-Key` header,
//! state changes go through the manager, and internal errors never
//! leak stack traces. Method, path and source are logged per request.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use maestro::Error;
use maestro::manager::{Task, TaskContext, TaskFilter, TaskId, TaskManager, TaskStats, TaskStatus};

/// Shared state behind every handler.
pub struct AppState {
    /// The task manager.
    pub manager: TaskManager,
    /// Shared API secret.
    pub api_key: String,
    /// Service start time, for uptime reporting.
    pub started_at: Instant,
    /// Users allowed to submit commands; empty allows everyone.
    pub allowed_users: Vec<String>,
    /// Minimum interval between commands per user.
    pub min_message_interval: Duration,
    /// Last-command timestamps per user.
    last_command: Mutex<HashMap<String, Instant>>,
    /// Sink name submissions are routed to.
    pub sink_name: String,
}

impl AppState {
    /// Create the API state.
    #[must_use]
    pub fn new(
        manager: TaskManager,
        api_key: String,
        allowed_users: Vec<String>,
        min_message_interval: Duration,
        sink_name: String,
    ) -> Self {
        Self {
            manager,
            api_key,
            started_at: Instant::now(),
            allowed_users,
            min_message_interval,
            last_command: Mutex::new(HashMap::new()),
            sink_name,
        }
    }
}

/// API-level errors, mapped onto status codes without internals.
#[derive(Debug)]
enum ApiError {
    Unauthorized,
    Validation(String),
    NotFound(String),
    Capacity(String),
    RateLimited,
    Internal,
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        match error {
            Error::Validation { message } => Self::Validation(message),
            Error::UnknownTask(id) => Self::NotFound(id.to_string()),
            Error::Capacity { .. } => Self::Capacity(error.to_string()),
            _ => {
                warn!(%error, "internal error surfaced to API");
                Self::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "invalid or missing API key".to_owned()),
            Self::Validation(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(id) => (StatusCode::NOT_FOUND, format!("no such task: {id}")),
            Self::Capacity(message) => (StatusCode::TOO_MANY_REQUESTS, message),
            Self::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "too many commands, slow down".to_owned(),
            ),
            Self::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_owned(),
            ),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/command", post(submit_command))
        .route("/task/{id}", get(task_status))
        .route("/task/{id}/cancel", post(cancel_task))
        .route("/tasks", get(list_tasks))
        .route("/agents", get(active_agents))
        .route("/agent/{id}", delete(terminate_agent))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            authenticate,
        ))
        .with_state(state)
}

/// Shared-secret authentication plus request logging.
async fn authenticate(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let source = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_owned(), |c| c.0.to_string());
    debug!(%method, %path, %source, "api request");

    let presented = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());
    if presented != Some(state.api_key.as_str()) {
        warn!(%method, %path, %source, "rejected request with bad api key");
        return ApiError::Unauthorized.into_response();
    }
    next.run(request).await
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
    active_agents: usize,
    task_stats: TaskStats,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (_, stats) = state.manager.list(&TaskFilter::default()).await;
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.started_at.elapsed().as_secs(),
        active_agents: state.manager.running_count().await,
        task_stats: stats,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandContext {
    user_id: String,
    scope_id: String,
    channel_id: String,
    #[serde(default)]
    created_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandRequest {
    command: String,
    context: CommandContext,
    #[serde(default)]
    #[allow(dead_code)]
    priority: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandResponse {
    success: bool,
    task_id: String,
    message: String,
}

async fn submit_command(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CommandRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let user_id = request.context.user_id.clone();

    if !state.allowed_users.is_empty() && !state.allowed_users.contains(&user_id) {
        return Err(ApiError::Validation(format!(
            "user {user_id} is not allowed to submit commands"
        )));
    }

    // Per-user back-pressure on text commands.
    {
        let mut last = state.last_command.lock().await;
        let now = Instant::now();
        if let Some(previous) = last.get(&user_id) {
            if now.duration_since(*previous) < state.min_message_interval {
                return Err(ApiError::RateLimited);
            }
        }
        last.insert(user_id, now);
    }

    let context = TaskContext {
        user_id: request.context.user_id,
        scope_id: request.context.scope_id,
        channel_id: request.context.channel_id,
        created_at: request.context.created_at.unwrap_or_else(chrono::Utc::now),
    };

    let task_id = state
        .manager
        .submit(&request.command, context, Some(state.sink_name.clone()))
        .await?;

    Ok(Json(CommandResponse {
        success: true,
        task_id: task_id.to_string(),
        message: "task accepted, agent starting".to_owned(),
    }))
}

async fn task_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let id = TaskId::parse(&id)?;
    Ok(Json(state.manager.status(id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    scope_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    tasks: Vec<Task>,
    stats: TaskStats,
    total: usize,
}

fn parse_status(raw: &str) -> Result<TaskStatus, ApiError> {
    match raw {
        "pending" => Ok(TaskStatus::Pending),
        "running" => Ok(TaskStatus::Running),
        "completed" => Ok(TaskStatus::Completed),
        "failed" => Ok(TaskStatus::Failed),
        "cancelled" => Ok(TaskStatus::Cancelled),
        other => Err(ApiError::Validation(format!("unknown status: {other}"))),
    }
}

async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let status = query.status.as_deref().map(parse_status).transpose()?;
    let filter = TaskFilter {
        scope_id: query.scope_id,
        user_id: query.user_id,
        channel_id: query.channel_id,
        status,
    };
    let (tasks, stats) = state.manager.list(&filter).await;
    let total = tasks.len();
    Ok(Json(ListResponse {
        tasks,
        stats,
        total,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelResponse {
    success: bool,
}

async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let id = TaskId::parse(&id)?;
    let success = state.manager.cancel(id).await;
    Ok(Json(CancelResponse { success }))
}

async fn active_agents(State(state): State<Arc<AppState>>) -> Json<ListResponse> {
    let filter = TaskFilter {
        status: Some(TaskStatus::Running),
        ..TaskFilter::default()
    };
    let (tasks, stats) = state.manager.list(&filter).await;
    let total = tasks.len();
    Json(ListResponse {
        tasks,
        stats,
        total,
    })
}

async fn terminate_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let id = TaskId::parse(&id)?;
    let success = state.manager.cancel(id).await;
    Ok(Json(CancelResponse { success }))
}
