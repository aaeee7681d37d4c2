//! Task lifecycle management.
//!
//! The manager owns the task registry: it creates one isolated agent
//! per submitted task, enforces the concurrency cap, tracks status,
//! forwards agent events to notification sinks and supports
//! cooperative cancellation. Tasks are exclusively mutated by their
//! driver while non-terminal; terminal states are immutable.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, Semaphore, mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{AgentEvent, AgentRuntime, ErrorPayload, RuntimeConfig, TaskResultPayload};
use crate::error::{Error, Result};
use crate::provider::ModelProvider;
use crate::router::ModelRouter;
use crate::tool::ToolRegistry;

/// Unique task identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Allocate a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an id from its string form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for malformed ids.
    pub fn parse(raw: &str) -> Result<Self> {
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|_| Error::validation(format!("invalid task id: {raw}")))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Accepted, waiting for a slot.
    Pending,
    /// An agent is executing it.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// String form for payloads and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Where a task came from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskContext {
    /// Submitting user.
    pub user_id: String,
    /// Tenant/workspace scope.
    pub scope_id: String,
    /// Originating channel.
    pub channel_id: String,
    /// Submission time.
    pub created_at: DateTime<Utc>,
}

/// One user-submitted request and its lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique id.
    pub id: TaskId,
    /// What the user asked for.
    pub description: String,
    /// Submission context.
    pub context: TaskContext,
    /// Current status.
    pub status: TaskStatus,
    /// Result payload, for completed tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResultPayload>,
    /// Structured error, for failed tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When the task reached a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Total wall-clock duration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Counts of tasks per status.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TaskStats {
    /// Pending tasks.
    pub pending: usize,
    /// Running tasks.
    pub running: usize,
    /// Completed tasks.
    pub completed: usize,
    /// Failed tasks.
    pub failed: usize,
    /// Cancelled tasks.
    pub cancelled: usize,
    /// All tasks.
    pub total: usize,
}

/// Filter for task listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskFilter {
    /// Match this scope.
    pub scope_id: Option<String>,
    /// Match this user.
    pub user_id: Option<String>,
    /// Match this channel.
    pub channel_id: Option<String>,
    /// Match this status.
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    fn matches(&self, task: &Task) -> bool {
        self.scope_id
            .as_ref()
            .is_none_or(|s| *s == task.context.scope_id)
            && self
                .user_id
                .as_ref()
                .is_none_or(|u| *u == task.context.user_id)
            && self
                .channel_id
                .as_ref()
                .is_none_or(|c| *c == task.context.channel_id)
            && self.status.is_none_or(|s| s == task.status)
    }
}

/// What to do with submissions beyond the concurrency cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Park submissions until a slot frees up.
    #[default]
    Queue,
    /// Fail fast with a capacity error.
    Reject,
}

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Maximum concurrently running agents.
    pub max_concurrent_agents: usize,
    /// Behavior beyond the cap.
    pub overflow: OverflowPolicy,
    /// Per-agent runtime configuration template.
    pub runtime: RuntimeConfig,
    /// Model tier configurations; each agent gets its own router over
    /// these.
    pub tiers: Vec<crate::router::ModelConfig>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: 5,
            overflow: OverflowPolicy::Queue,
            runtime: RuntimeConfig::default(),
            tiers: crate::router::default_tiers(),
        }
    }
}

/// Sink error type; sink failures are logged and swallowed.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// An external handler for task notifications. Must tolerate concurrent
/// emission and interleaving across tasks.
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification line for a task.
    async fn notify(&self, task_id: TaskId, message: String) -> std::result::Result<(), SinkError>;
}

struct TaskHandle {
    task: Task,
    cancel: watch::Sender<bool>,
    sink: Option<String>,
}

struct ManagerInner {
    config: ManagerConfig,
    provider: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    tasks: RwLock<HashMap<TaskId, TaskHandle>>,
    sinks: RwLock<HashMap<String, Arc<dyn NotificationSink>>>,
    slots: Arc<Semaphore>,
}

/// Creates, tracks and cancels task agents.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<ManagerInner>,
}

impl fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskManager")
            .field("max_concurrent", &self.inner.config.max_concurrent_agents)
            .finish_non_exhaustive()
    }
}

impl TaskManager {
    /// Create a manager over a provider and tool registry.
    #[must_use]
    pub fn new(
        config: ManagerConfig,
        provider: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent_agents.max(1)));
        Self {
            inner: Arc::new(ManagerInner {
                config,
                provider,
                tools,
                tasks: RwLock::new(HashMap::new()),
                sinks: RwLock::new(HashMap::new()),
                slots,
            }),
        }
    }

    /// Register a named notification sink.
    pub async fn register_sink(&self, name: impl Into<String>, sink: Arc<dyn NotificationSink>) {
        self.inner.sinks.write().await.insert(name.into(), sink);
    }

    /// Submit a task. Returns the task id synchronously; the agent runs
    /// in the background.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Capacity`] when the cap is reached and the
    /// overflow policy is [`OverflowPolicy::Reject`], or
    /// [`Error::Validation`] for an empty command.
    pub async fn submit(
        &self,
        command: &str,
        context: TaskContext,
        sink: Option<String>,
    ) -> Result<TaskId> {
        if command.trim().is_empty() {
            return Err(Error::validation("command must not be empty"));
        }

        // Reject fast when configured to; queued submissions park on
        // the semaphore inside the driver instead.
        let permit = match self.inner.config.overflow {
            OverflowPolicy::Reject => match Arc::clone(&self.inner.slots).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    let running = self.running_count().await;
                    return Err(Error::Capacity {
                        running,
                        cap: self.inner.config.max_concurrent_agents,
                    });
                }
            },
            OverflowPolicy::Queue => None,
        };

        let id = TaskId::new();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = Task {
            id,
            description: command.to_owned(),
            context,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
        };

        self.inner.tasks.write().await.insert(
            id,
            TaskHandle {
                task,
                cancel: cancel_tx,
                sink: sink.clone(),
            },
        );
        info!(task = %id, "task submitted");

        let manager = self.clone();
        let command = command.to_owned();
        tokio::spawn(async move {
            manager.drive(id, command, cancel_rx, permit).await;
        });

        Ok(id)
    }

    /// Snapshot of a task.
    pub async fn status(&self, id: TaskId) -> Result<Task> {
        self.inner
            .tasks
            .read()
            .await
            .get(&id)
            .map(|h| h.task.clone())
            .ok_or(Error::UnknownTask(id))
    }

    /// List tasks matching a filter, newest first, plus stats over the
    /// filtered set.
    pub async fn list(&self, filter: &TaskFilter) -> (Vec<Task>, TaskStats) {
        let tasks = self.inner.tasks.read().await;
        let mut matched: Vec<Task> = tasks
            .values()
            .filter(|h| filter.matches(&h.task))
            .map(|h| h.task.clone())
            .collect();
        matched.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        let mut stats = TaskStats::default();
        for task in &matched {
            stats.total += 1;
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        (matched, stats)
    }

    /// Number of currently running agents.
    pub async fn running_count(&self) -> usize {
        self.inner
            .tasks
            .read()
            .await
            .values()
            .filter(|h| h.task.status == TaskStatus::Running)
            .count()
    }

    /// Request cancellation. Returns `true` when the task existed and
    /// was not yet terminal. Idempotent: a second call on a terminal
    /// task returns `false` and changes nothing.
    pub async fn cancel(&self, id: TaskId) -> bool {
        let tasks = self.inner.tasks.read().await;
        let Some(handle) = tasks.get(&id) else {
            return false;
        };
        if handle.task.status.is_terminal() {
            return false;
        }
        let _ = handle.cancel.send(true);
        info!(task = %id, "cancellation requested");
        true
    }

    /// Send a notification line for a task through its registered sink.
    /// Sink errors are logged and never propagate.
    pub async fn notify(&self, id: TaskId, message: String) {
        let sink_name = {
            let tasks = self.inner.tasks.read().await;
            tasks.get(&id).and_then(|h| h.sink.clone())
        };
        let sinks = self.inner.sinks.read().await;
        let targets: Vec<Arc<dyn NotificationSink>> = match &sink_name {
            Some(name) => sinks.get(name).cloned().into_iter().collect(),
            None => sinks.values().cloned().collect(),
        };
        drop(sinks);
        for sink in targets {
            if let Err(e) = sink.notify(id, message.clone()).await {
                warn!(task = %id, error = %e, "sink notification failed");
            }
        }
    }

    /// Drive one task: wait for a slot, run the agent, record the
    /// terminal state, send the final summary notification.
    async fn drive(
        &self,
        id: TaskId,
        command: String,
        mut cancel_rx: watch::Receiver<bool>,
        permit: Option<tokio::sync::OwnedSemaphorePermit>,
    ) {
        // Hold a slot for the whole run; queued tasks park here.
        let _permit = match permit {
            Some(permit) => permit,
            None => {
                let acquired = tokio::select! {
                    permit = Arc::clone(&self.inner.slots).acquire_owned() => permit,
                    _ = cancel_rx.changed() => {
                        self.finalize(id, Err(Error::Cancelled)).await;
                        return;
                    }
                };
                match acquired {
                    Ok(permit) => permit,
                    Err(_) => {
                        self.finalize(id, Err(Error::invariant("semaphore closed"))).await;
                        return;
                    }
                }
            }
        };

        if *cancel_rx.borrow() {
            self.finalize(id, Err(Error::Cancelled)).await;
            return;
        }

        self.set_status(id, TaskStatus::Running).await;

        // Event channel: the forwarder holds only the task id, never
        // the agent. It stops at the terminal event.
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<AgentEvent>();
        let forwarder = {
            let manager = self.clone();
            tokio::spawn(async move {
                while let Some(event) = events_rx.recv().await {
                    if event.is_terminal() {
                        break;
                    }
                    if let Some(message) = render_event(&event) {
                        manager.notify(event.task_id(), message).await;
                    }
                }
            })
        };

        let runtime = AgentRuntime::new(
            id,
            command,
            Arc::clone(&self.inner.provider),
            Arc::clone(&self.inner.tools),
            ModelRouter::new(self.inner.config.tiers.clone()),
            events_tx,
            cancel_rx,
            self.inner.config.runtime.clone(),
        );

        let result = runtime.run().await;
        let _ = forwarder.await;
        self.finalize(id, result).await;
    }

    async fn set_status(&self, id: TaskId, status: TaskStatus) {
        let mut tasks = self.inner.tasks.write().await;
        if let Some(handle) = tasks.get_mut(&id) {
            if !handle.task.status.is_terminal() {
                debug!(task = %id, status = status.as_str(), "status transition");
                handle.task.status = status;
            }
        }
    }

    /// Record the terminal state and emit exactly one summary
    /// notification.
    async fn finalize(&self, id: TaskId, result: Result<TaskResultPayload>) {
        let summary = {
            let mut tasks = self.inner.tasks.write().await;
            let Some(handle) = tasks.get_mut(&id) else {
                return;
            };
            if handle.task.status.is_terminal() {
                return;
            }
            let now = Utc::now();
            let duration_ms = u64::try_from(
                now.signed_duration_since(handle.task.started_at)
                    .num_milliseconds()
                    .max(0),
            )
            .unwrap_or(u64::MAX);
            handle.task.completed_at = Some(now);
            handle.task.duration_ms = Some(duration_ms);

            match result {
                Ok(payload) => {
                    handle.task.status = TaskStatus::Completed;
                    let line = format!(
                        "status=completed duration={}ms iterations={} tool_calls={}",
                        duration_ms, payload.iterations, payload.tool_calls
                    );
                    handle.task.result = Some(payload);
                    line
                }
                Err(Error::Cancelled) => {
                    handle.task.status = TaskStatus::Cancelled;
                    format!("status=cancelled duration={duration_ms}ms")
                }
                Err(error) => {
                    handle.task.status = TaskStatus::Failed;
                    let payload = ErrorPayload::from_error(&error);
                    let line = format!(
                        "status=failed duration={duration_ms}ms error={}",
                        payload.first_line()
                    );
                    handle.task.error = Some(payload);
                    line
                }
            }
        };
        self.notify(id, summary).await;
    }
}

/// Render a non-terminal event as a notification line.
fn render_event(event: &AgentEvent) -> Option<String> {
    match event {
        AgentEvent::PlanReady {
            approach,
            phases,
            confidence,
            ..
        } => Some(format!(
            "plan ready: {approach} ({phases} phases, confidence {confidence:.2})"
        )),
        AgentEvent::PlanFallback { .. } => {
            Some("warning: planner output unusable, using fallback plan".to_owned())
        }
        AgentEvent::Pivot { reason, .. } => Some(format!("pivoting: {reason}")),
        AgentEvent::Warning { message, .. } => Some(format!("warning: {message}")),
        AgentEvent::PhaseStarted { name, .. } => Some(format!("phase started: {name}")),
        AgentEvent::PhaseCompleted {
            phase_id, outcome, ..
        } => Some(format!("phase {phase_id}: {outcome:?}")),
        // Tool calls are high-volume; surfaced via logs, not the sink.
        AgentEvent::ToolCall { .. }
        | AgentEvent::TaskCompleted { .. }
        | AgentEvent::TaskFailed { .. }
        | AgentEvent::TaskCancelled { .. } => None,
    }
}
