//! Error types for the maestro engine.
//!
//! Every boundary in the engine crosses with a typed error. Tool handler
//! failures are deliberately NOT represented here; they are returned
//! in-band as [`ToolFailure`](crate::tool::ToolFailure) so the model can
//! react to them. This enum covers the failures that end or redirect an
//! iteration instead.

use crate::manager::TaskId;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for engine operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A request or payload failed validation.
    #[error("validation error: {message}")]
    Validation {
        /// What was invalid.
        message: String,
    },

    /// The model provider returned an error.
    #[error("model error: {message}")]
    Model {
        /// The provider's error message.
        message: String,
        /// Whether a retry (possibly after escalation) may succeed.
        retryable: bool,
    },

    /// The transcript could not be fit into the model budget, even after
    /// the aggressive truncation pass.
    #[error("context overflow: transcript exceeds {budget} token budget")]
    ContextOverflow {
        /// The budget that could not be met.
        budget: usize,
    },

    /// The planner failed to produce a usable plan and the fallback also
    /// could not be applied.
    #[error("planning failed: {message}")]
    Planning {
        /// Why planning failed.
        message: String,
    },

    /// The self-monitor aborted or stalled the task.
    #[error("execution policy: {message}")]
    Policy {
        /// The monitor's reason.
        message: String,
    },

    /// The concurrency cap was reached and the overflow policy rejects.
    #[error("capacity: {running} agents running, cap is {cap}")]
    Capacity {
        /// Currently running agents.
        running: usize,
        /// Configured maximum.
        cap: usize,
    },

    /// No task with the given id exists.
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    /// The task was cancelled cooperatively.
    #[error("task was cancelled")]
    Cancelled,

    /// Invalid engine configuration.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration issue.
        message: String,
    },

    /// An internal invariant was violated (broken pairing, impossible
    /// state transition). Always a bug; the task transitions to failed.
    #[error("invariant violation: {message}")]
    Invariant {
        /// The broken invariant.
        message: String,
    },

    /// I/O error from environment reads or audit writes.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a retryable model error (rate limit, 5xx, timeout).
    #[must_use]
    pub fn model_transient(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable model error.
    #[must_use]
    pub fn model_fatal(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
            retryable: false,
        }
    }

    /// Create a planning error.
    #[must_use]
    pub fn planning(message: impl Into<String>) -> Self {
        Self::Planning {
            message: message.into(),
        }
    }

    /// Create a policy error.
    #[must_use]
    pub fn policy(message: impl Into<String>) -> Self {
        Self::Policy {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invariant-violation error.
    #[must_use]
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }

    /// Whether a retry of the failing operation may succeed.
    ///
    /// Context overflows are retryable because the runtime retries them
    /// after an aggressive truncation pass.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Model {
                retryable: true,
                ..
            } | Self::ContextOverflow { .. }
        )
    }

    /// Short machine-readable kind, used in terminal notifications and
    /// audit records.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Model { .. } => "model",
            Self::ContextOverflow { .. } => "context_overflow",
            Self::Planning { .. } => "planning",
            Self::Policy { .. } => "policy",
            Self::Capacity { .. } => "capacity",
            Self::UnknownTask(_) => "unknown_task",
            Self::Cancelled => "cancelled",
            Self::Configuration { .. } => "configuration",
            Self::Invariant { .. } => "invariant",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }
}
