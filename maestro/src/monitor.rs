//! Execution self-monitoring: progress, stalls, continuation decisions.
//!
//! The monitor owns the per-task [`ExecutionState`] and answers one
//! question each time it is consulted: keep going, pivot, ask the user,
//! complete, or abort. The decision ladder is fixed; the numeric limits
//! are configurable and can be pre-suggested from the task text.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::context::canonical_input_prefix;

/// How many leading characters of the canonical input participate in a
/// tool signature.
const SIGNATURE_PREFIX_LEN: usize = 48;

/// Completion signals required before the monitor declares completion.
const COMPLETION_SIGNAL_THRESHOLD: u32 = 2;

/// Iteration limits for one task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Warmup floor: always continue below this.
    pub min_iterations: u32,
    /// Iterations without progress before asking the user.
    pub max_stall_iterations: u32,
    /// Soft cap: continue with a warning when reached.
    pub soft_cap: u32,
    /// Hard cap: abort at or beyond.
    pub hard_cap: u32,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            min_iterations: 2,
            max_stall_iterations: 5,
            soft_cap: 15,
            hard_cap: 30,
        }
    }
}

impl ExecutionLimits {
    /// Suggest limits from free task text.
    ///
    /// A rough size read of the task: short single-clause requests get
    /// tight caps, long multi-step requests get room to work.
    #[must_use]
    pub fn for_task(description: &str) -> Self {
        let text = description.to_lowercase();
        let words = text.split_whitespace().count();
        let steps = ["then", "after", "finally", "step", "and"]
            .iter()
            .filter(|m| text.contains(*m))
            .count();

        match words + steps * 5 {
            n if n < 8 => Self {
                min_iterations: 1,
                max_stall_iterations: 3,
                soft_cap: 5,
                hard_cap: 10,
            },
            n if n < 30 => Self::default(),
            _ => Self {
                min_iterations: 3,
                max_stall_iterations: 8,
                soft_cap: 25,
                hard_cap: 50,
            },
        }
    }
}

/// Coarse phase of the reasoning loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionPhase {
    /// Gathering information.
    Exploring,
    /// Organizing an approach.
    Planning,
    /// Doing the work.
    Executing,
    /// Wrapping up.
    Completing,
}

/// A trackable unit of work inside a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    /// Stable id.
    pub id: String,
    /// What the milestone covers.
    pub description: String,
    /// Whether it is done.
    pub completed: bool,
}

/// Record of one tool invocation, append-only per task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Tool name.
    pub tool: String,
    /// Input the model supplied.
    pub input: Value,
    /// Captured output or failure text.
    pub output: String,
    /// Whether the call succeeded.
    pub success: bool,
    /// When the call completed.
    pub timestamp: DateTime<Utc>,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// Insights the tool reported.
    #[serde(default)]
    pub insights: Vec<String>,
}

/// Mutable execution state owned by the monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Iterations so far.
    pub iteration: u32,
    /// All tool calls, in order.
    pub tool_calls: Vec<ToolCallRecord>,
    /// Unique progress markers seen.
    pub progress_markers: HashSet<String>,
    /// Iteration at which progress last advanced.
    pub last_progress_iter: u32,
    /// Completion signals observed.
    pub completion_signals: u32,
    /// Stall indicators recorded.
    pub stall_indicators: u32,
    /// Milestones, when the plan defined any.
    pub milestones: Vec<Milestone>,
    /// Current coarse phase.
    pub phase: ExecutionPhase,
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self {
            iteration: 0,
            tool_calls: Vec::new(),
            progress_markers: HashSet::new(),
            last_progress_iter: 0,
            completion_signals: 0,
            stall_indicators: 0,
            milestones: Vec::new(),
            phase: ExecutionPhase::Exploring,
        }
    }
}

/// What the loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Keep iterating.
    Continue,
    /// Keep iterating but change approach.
    Pivot,
    /// Stop and ask the user for direction.
    AskUser,
    /// The work is done.
    Complete,
    /// Stop; the loop is out of budget.
    Abort,
}

/// One continuation decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the loop should keep running.
    pub should_continue: bool,
    /// Why this decision was made.
    pub reason: String,
    /// The recommended action.
    pub suggested_action: SuggestedAction,
    /// Optional warning to surface alongside a continue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl Decision {
    fn new(
        should_continue: bool,
        action: SuggestedAction,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            should_continue,
            reason: reason.into(),
            suggested_action: action,
            warning: None,
        }
    }

    fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }
}

/// Tracks iterations, progress and stalls for one task and decides
/// whether to continue.
#[derive(Debug, Clone)]
pub struct SelfMonitor {
    state: ExecutionState,
    limits: ExecutionLimits,
    signatures: Vec<String>,
}

impl SelfMonitor {
    /// Create a monitor with the given limits.
    #[must_use]
    pub fn new(limits: ExecutionLimits) -> Self {
        Self {
            state: ExecutionState::default(),
            limits,
            signatures: Vec::new(),
        }
    }

    /// Read-only view of the execution state.
    #[must_use]
    pub const fn state(&self) -> &ExecutionState {
        &self.state
    }

    /// The configured limits.
    #[must_use]
    pub const fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    /// Seed milestones from the plan.
    pub fn set_milestones(&mut self, milestones: Vec<Milestone>) {
        self.state.milestones = milestones;
    }

    /// Move to a new coarse phase.
    pub const fn set_phase(&mut self, phase: ExecutionPhase) {
        self.state.phase = phase;
    }

    /// Count a new iteration.
    pub const fn record_iteration(&mut self) {
        self.state.iteration += 1;
    }

    /// Record a completed tool call and its signature.
    pub fn record_tool_call(&mut self, record: ToolCallRecord) {
        let signature = format!(
            "{}:{}",
            record.tool,
            canonical_input_prefix(&record.input, SIGNATURE_PREFIX_LEN)
        );
        self.signatures.push(signature);
        self.state.tool_calls.push(record);
    }

    /// Record a unique progress marker. Duplicates are ignored.
    pub fn mark_progress(&mut self, marker: impl Into<String>) {
        if self.state.progress_markers.insert(marker.into()) {
            self.state.last_progress_iter = self.state.iteration;
        }
    }

    /// Record a completion signal from the model's output.
    pub const fn record_completion_signal(&mut self) {
        self.state.completion_signals += 1;
    }

    /// Record an externally observed stall.
    pub fn record_stall(&mut self, reason: &str) {
        debug!(reason, "stall recorded");
        self.state.stall_indicators += 1;
    }

    /// Mark a milestone completed. Returns whether it existed.
    pub fn complete_milestone(&mut self, id: &str) -> bool {
        for milestone in &mut self.state.milestones {
            if milestone.id == id {
                milestone.completed = true;
                self.mark_progress(format!("milestone:{id}"));
                return true;
            }
        }
        false
    }

    /// Whether the last three tool signatures are identical.
    fn repeated_signature(&self) -> bool {
        let n = self.signatures.len();
        n >= 3 && self.signatures[n - 1] == self.signatures[n - 2]
            && self.signatures[n - 2] == self.signatures[n - 3]
    }

    /// Whether the last four signatures oscillate ABAB.
    fn oscillating_signature(&self) -> bool {
        let n = self.signatures.len();
        n >= 4
            && self.signatures[n - 1] == self.signatures[n - 3]
            && self.signatures[n - 2] == self.signatures[n - 4]
            && self.signatures[n - 1] != self.signatures[n - 2]
    }

    /// Whether completion has been detected.
    fn completion_detected(&self) -> bool {
        if self.state.completion_signals >= COMPLETION_SIGNAL_THRESHOLD {
            return true;
        }
        !self.state.milestones.is_empty()
            && self.state.milestones.iter().all(|m| m.completed)
    }

    /// Decide whether to continue. First matching rule wins.
    #[must_use]
    pub fn decide(&mut self) -> Decision {
        let iteration = self.state.iteration;
        let limits = self.limits;

        // 1. Warmup.
        if iteration < limits.min_iterations {
            return Decision::new(true, SuggestedAction::Continue, "warming up");
        }

        // 2. Completion.
        if self.completion_detected() {
            return Decision::new(
                false,
                SuggestedAction::Complete,
                "completion detected from signals or milestones",
            );
        }

        // 3. Stall: repetition or oscillation.
        if self.repeated_signature() {
            self.record_stall("last three tool calls identical");
            return Decision::new(
                true,
                SuggestedAction::Pivot,
                "Execution stalled: the same tool call repeated three times",
            );
        }
        if self.oscillating_signature() {
            self.record_stall("tool calls oscillating between two signatures");
            return Decision::new(
                true,
                SuggestedAction::Pivot,
                "Execution stalled: tool calls are oscillating",
            );
        }

        // 4. No progress for too long.
        if iteration.saturating_sub(self.state.last_progress_iter) > limits.max_stall_iterations {
            return Decision::new(
                false,
                SuggestedAction::AskUser,
                format!(
                    "no new progress in {} iterations",
                    iteration - self.state.last_progress_iter
                ),
            );
        }

        // 5. Hard cap.
        if iteration >= limits.hard_cap {
            return Decision::new(
                false,
                SuggestedAction::Abort,
                format!("hard iteration cap of {} reached", limits.hard_cap),
            );
        }

        // 6. Soft cap warning.
        if iteration == limits.soft_cap {
            return Decision::new(true, SuggestedAction::Continue, "soft cap reached")
                .with_warning(format!(
                    "{iteration} iterations used; {} remain before abort",
                    limits.hard_cap - iteration
                ));
        }

        // 7. Default.
        Decision::new(true, SuggestedAction::Continue, "making progress")
    }
}

impl Default for SelfMonitor {
    fn default() -> Self {
        Self::new(ExecutionLimits::default())
    }
}
