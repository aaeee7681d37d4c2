//! Task result and error payloads.

use serde::{Deserialize, Serialize};

use crate::usage::ModelUsage;

/// Payload carried by a successful task completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResultPayload {
    /// Iterations across all phases.
    pub iterations: u32,
    /// Number of tool calls executed.
    pub tool_calls: usize,
    /// Facts discovered during execution.
    #[serde(default)]
    pub discoveries: Vec<String>,
    /// Approach name from the plan.
    pub approach: String,
    /// Planner confidence in \[0, 1\].
    pub confidence: f64,
    /// The model's final answer text.
    #[serde(default)]
    pub summary: String,
    /// Model usage accounting.
    #[serde(default)]
    pub model_usage: ModelUsage,
}

/// Structured error carried by a failed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Machine-readable error kind.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorPayload {
    /// Build a payload from an engine error.
    #[must_use]
    pub fn from_error(error: &crate::error::Error) -> Self {
        Self {
            kind: error.kind().to_owned(),
            message: error.to_string(),
        }
    }

    /// First line of the message, for compact notifications.
    #[must_use]
    pub fn first_line(&self) -> &str {
        self.message.lines().next().unwrap_or(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn payload_from_error() {
        let payload = ErrorPayload::from_error(&Error::policy("stalled\nmore detail"));
        assert_eq!(payload.kind, "policy");
        assert_eq!(payload.first_line(), "execution policy: stalled");
    }
}
