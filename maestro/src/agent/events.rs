//! Typed events emitted during agent execution.
//!
//! Events are sent by value over a channel owned by the task manager;
//! subscribers never hold a reference to the agent. Within one task,
//! events arrive in program order.

use serde::{Deserialize, Serialize};

use crate::agent::result::{ErrorPayload, TaskResultPayload};
use crate::manager::TaskId;

/// How a phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseOutcome {
    /// The phase met its completion condition.
    Completed,
    /// The phase used up its iteration allowance.
    TimedOut,
    /// The runtime skipped the phase.
    Skipped,
}

/// An observable moment in a task's execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
#[non_exhaustive]
pub enum AgentEvent {
    /// The strategic plan is ready.
    PlanReady {
        /// Owning task.
        task_id: TaskId,
        /// Selected approach name.
        approach: String,
        /// Number of planned phases.
        phases: usize,
        /// Planner confidence in \[0, 1\].
        confidence: f64,
    },
    /// The planner produced unusable output and the fallback plan is in
    /// effect. Surfaced as a user-visible warning.
    PlanFallback {
        /// Owning task.
        task_id: TaskId,
    },
    /// A phase began.
    PhaseStarted {
        /// Owning task.
        task_id: TaskId,
        /// Phase id.
        phase_id: String,
        /// Phase name.
        name: String,
    },
    /// A phase ended.
    PhaseCompleted {
        /// Owning task.
        task_id: TaskId,
        /// Phase id.
        phase_id: String,
        /// How it ended.
        outcome: PhaseOutcome,
    },
    /// A tool call finished.
    ToolCall {
        /// Owning task.
        task_id: TaskId,
        /// Tool name.
        tool: String,
        /// Whether the call succeeded.
        success: bool,
        /// Wall-clock duration.
        duration_ms: u64,
    },
    /// The monitor requested an approach change.
    Pivot {
        /// Owning task.
        task_id: TaskId,
        /// Why the pivot happened.
        reason: String,
    },
    /// A non-fatal warning (soft cap, degraded behavior).
    Warning {
        /// Owning task.
        task_id: TaskId,
        /// Warning text.
        message: String,
    },
    /// The task finished successfully.
    TaskCompleted {
        /// Owning task.
        task_id: TaskId,
        /// Result payload.
        result: TaskResultPayload,
    },
    /// The task failed.
    TaskFailed {
        /// Owning task.
        task_id: TaskId,
        /// Structured error.
        error: ErrorPayload,
    },
    /// The task was cancelled.
    TaskCancelled {
        /// Owning task.
        task_id: TaskId,
    },
}

impl AgentEvent {
    /// The task this event belongs to.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        match self {
            Self::PlanReady { task_id, .. }
            | Self::PlanFallback { task_id }
            | Self::PhaseStarted { task_id, .. }
            | Self::PhaseCompleted { task_id, .. }
            | Self::ToolCall { task_id, .. }
            | Self::Pivot { task_id, .. }
            | Self::Warning { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. }
            | Self::TaskCancelled { task_id } => *task_id,
        }
    }

    /// Whether this event is terminal for its task.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::TaskCompleted { .. } | Self::TaskFailed { .. } | Self::TaskCancelled { .. }
        )
    }
}
