//! The agent execution engine for one task.
//!
//! The runtime drives a task end to end: gather environment, obtain a
//! strategic plan, then loop per phase: prepare the transcript under
//! the model budget, call the routed model, execute requested tools,
//! consult the monitor, and emit events. The loop is strictly
//! sequential: one outstanding model call and one outstanding tool call
//! at a time. Cancellation is cooperative and observed at every
//! suspension point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::context::{ContextConfig, Transcript, canonical_input_prefix};
use crate::error::{Error, Result};
use crate::manager::TaskId;
use crate::message::Entry;
use crate::monitor::{
    ExecutionLimits, ExecutionPhase, Milestone, SelfMonitor, SuggestedAction, ToolCallRecord,
};
use crate::planner::{Phase, PhaseKind, PhaseStatus, Planner, StrategicPlan};
use crate::provider::{ModelProvider, ModelRequest, ModelResponse, StopReason};
use crate::router::{ComplexityAnalysis, ModelConfig, ModelRouter, ModelTier, SelectionContext};
use crate::tool::{ToolDescriptor, ToolRegistry};
use crate::usage::ModelUsage;

use super::environment;
use super::events::{AgentEvent, PhaseOutcome};
use super::result::{ErrorPayload, TaskResultPayload};

/// Characters of canonical input used for progress markers.
const MARKER_PREFIX_LEN: usize = 48;

/// System prompt for the execution loop.
const SYSTEM_PROMPT: &str = "You are an autonomous task agent. Work toward the task using the \
    available tools. Keep tool inputs small and specific. When the task is done, stop calling \
    tools and state the outcome, including the phrase 'task complete'.";

/// Runtime configuration for one agent.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Directory the agent works in.
    pub working_dir: PathBuf,
    /// Iteration limits; pre-analyzed from the task text when `None`.
    pub limits: Option<ExecutionLimits>,
    /// Upper bound on iterations inside a single phase.
    pub max_iterations_per_phase: u32,
    /// Monitor consultation interval, in iterations.
    pub progress_check_interval: u32,
    /// Phrases that count as completion signals in model text.
    pub completion_phrases: Vec<String>,
    /// Transcript truncation tuning.
    pub context: ContextConfig,
    /// Prior conversation context to include in the framing entry.
    pub conversation_history: Option<String>,
    /// Tokens reserved under the context window beyond the output cap.
    pub budget_headroom_tokens: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            limits: None,
            max_iterations_per_phase: 10,
            progress_check_interval: 3,
            completion_phrases: vec![
                "task complete".to_owned(),
                "task is complete".to_owned(),
                "all done".to_owned(),
                "successfully completed".to_owned(),
            ],
            context: ContextConfig::default(),
            conversation_history: None,
            budget_headroom_tokens: 1024,
        }
    }
}

/// Runs one task end to end.
pub struct AgentRuntime {
    task_id: TaskId,
    description: String,
    provider: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    router: ModelRouter,
    monitor: SelfMonitor,
    transcript: Transcript,
    events: mpsc::UnboundedSender<AgentEvent>,
    cancel: watch::Receiver<bool>,
    config: RuntimeConfig,
    usage: ModelUsage,
    pending_steer: Option<String>,
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntime")
            .field("task_id", &self.task_id)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl AgentRuntime {
    /// Wire up a runtime for one task.
    #[must_use]
    pub fn new(
        task_id: TaskId,
        description: impl Into<String>,
        provider: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        router: ModelRouter,
        events: mpsc::UnboundedSender<AgentEvent>,
        cancel: watch::Receiver<bool>,
        config: RuntimeConfig,
    ) -> Self {
        let description = description.into();
        let limits = config
            .limits
            .unwrap_or_else(|| ExecutionLimits::for_task(&description));
        Self {
            task_id,
            description,
            provider,
            tools,
            router,
            monitor: SelfMonitor::new(limits),
            transcript: Transcript::new(ContextConfig::default()),
            events,
            cancel,
            config,
            usage: ModelUsage::default(),
            pending_steer: None,
        }
    }

    /// Execute the task to a terminal state, emitting events throughout
    /// including exactly one terminal event.
    pub async fn run(mut self) -> Result<TaskResultPayload> {
        let span = info_span!("agent", task.id = %self.task_id, task.description = %self.description);
        async move {
            self.transcript = Transcript::new(self.config.context.clone());
            let result = self.execute().await;
            match &result {
                Ok(payload) => {
                    info!(
                        iterations = payload.iterations,
                        tool_calls = payload.tool_calls,
                        "task completed"
                    );
                    self.emit(AgentEvent::TaskCompleted {
                        task_id: self.task_id,
                        result: payload.clone(),
                    });
                }
                Err(Error::Cancelled) => {
                    info!("task cancelled");
                    self.emit(AgentEvent::TaskCancelled {
                        task_id: self.task_id,
                    });
                }
                Err(error) => {
                    warn!(%error, "task failed");
                    self.emit(AgentEvent::TaskFailed {
                        task_id: self.task_id,
                        error: ErrorPayload::from_error(error),
                    });
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn execute(&mut self) -> Result<TaskResultPayload> {
        self.check_cancelled()?;

        // 1. Environment snapshot (read-only) and tool catalog.
        let environment = environment::gather(&self.config.working_dir).await;
        let catalog = self.tools.descriptors();

        // 2. Strategic plan.
        let powerful = self.tier_config(ModelTier::Powerful);
        let balanced = self.tier_config(ModelTier::Balanced);
        let outcome = Planner
            .plan(
                self.provider.as_ref(),
                &powerful,
                &balanced,
                &self.description,
                &environment,
                &catalog,
            )
            .await;
        let mut plan = outcome.plan;
        if outcome.fallback_used {
            self.emit(AgentEvent::PlanFallback {
                task_id: self.task_id,
            });
        }
        self.emit(AgentEvent::PlanReady {
            task_id: self.task_id,
            approach: plan.approach.name.clone(),
            phases: plan.phases.len(),
            confidence: plan.approach.confidence,
        });

        self.monitor.set_milestones(
            plan.phases
                .iter()
                .map(|p| Milestone {
                    id: p.id.clone(),
                    description: p.description.clone(),
                    completed: false,
                })
                .collect(),
        );

        // 3. Seed the transcript with the framing entry.
        self.transcript
            .append(Entry::user(self.framing_text(&environment, &plan)))?;

        // 4. Phase loop. Completion flags are the only mutable part of
        // the plan.
        let mut final_text = String::new();
        let phases = plan.phases.clone();
        for (index, phase) in phases.iter().enumerate() {
            self.check_cancelled()?;
            plan.phases[index].status = PhaseStatus::Active;
            self.emit(AgentEvent::PhaseStarted {
                task_id: self.task_id,
                phase_id: phase.id.clone(),
                name: phase.name.clone(),
            });

            let outcome = self.run_phase(phase, &catalog, &mut final_text).await?;
            plan.phases[index].status = match outcome {
                PhaseOutcome::Completed => PhaseStatus::Complete,
                PhaseOutcome::Skipped => PhaseStatus::Skipped,
                PhaseOutcome::TimedOut => PhaseStatus::Failed,
            };
            self.emit(AgentEvent::PhaseCompleted {
                task_id: self.task_id,
                phase_id: phase.id.clone(),
                outcome,
            });

            self.monitor.complete_milestone(&phase.id);
            if outcome == PhaseOutcome::Skipped {
                debug!(phase = %phase.id, "remaining phases skipped, task already complete");
                break;
            }
        }

        Ok(self.payload(&plan, final_text))
    }

    /// Run a single phase. Returns how the phase ended.
    async fn run_phase(
        &mut self,
        phase: &Phase,
        catalog: &[ToolDescriptor],
        final_text: &mut String,
    ) -> Result<PhaseOutcome> {
        self.monitor.set_phase(match phase.kind() {
            PhaseKind::Exploration => ExecutionPhase::Exploring,
            PhaseKind::Planning => ExecutionPhase::Planning,
            PhaseKind::Execution => ExecutionPhase::Executing,
            PhaseKind::Verification | PhaseKind::Reporting => ExecutionPhase::Completing,
        });

        let limits = *self.monitor.limits();
        let phase_cap = phase
            .estimated_iterations
            .saturating_mul(2)
            .min(self.config.max_iterations_per_phase);
        let interval = self.config.progress_check_interval.max(1);

        for _ in 0..phase_cap {
            self.check_cancelled()?;

            // Global cap, independent of the consultation interval.
            if self.monitor.state().iteration >= limits.hard_cap {
                return Err(Error::policy(format!(
                    "hard iteration cap of {} reached",
                    limits.hard_cap
                )));
            }

            self.monitor.record_iteration();
            let iteration = self.monitor.state().iteration;

            // Periodic self-assessment.
            if iteration % interval == 0 {
                let decision = self.monitor.decide();
                match decision.suggested_action {
                    SuggestedAction::Complete => {
                        debug!("monitor declared completion");
                        return Ok(PhaseOutcome::Skipped);
                    }
                    SuggestedAction::Abort => return Err(Error::policy(decision.reason)),
                    SuggestedAction::AskUser => {
                        return Err(Error::policy(format!(
                            "waiting on user input: {}",
                            decision.reason
                        )));
                    }
                    SuggestedAction::Pivot => {
                        if self.monitor.state().stall_indicators >= 2 {
                            return Err(Error::policy(decision.reason));
                        }
                        self.emit(AgentEvent::Pivot {
                            task_id: self.task_id,
                            reason: decision.reason.clone(),
                        });
                        self.pending_steer = Some(format!(
                            "{}. Stop repeating that call and try a different approach.",
                            decision.reason
                        ));
                    }
                    SuggestedAction::Continue => {
                        if let Some(warning) = decision.warning {
                            self.emit(AgentEvent::Warning {
                                task_id: self.task_id,
                                message: warning,
                            });
                        }
                    }
                }
            }

            // Route the model for this phase and iteration.
            let selection = SelectionContext {
                phase: Some(phase.kind()),
                prior_failures: self.router.escalate_count(),
                needs_delegation: phase.can_delegate,
            };
            let (analysis, model) = self.router.select_for_task(&self.description, &selection);

            // Keep alternation: the model is always called on a
            // transcript ending with a user entry.
            if self
                .transcript
                .entries()
                .last()
                .is_some_and(|e| e.role == crate::message::Role::Assistant)
            {
                let nudge = self.pending_steer.take().unwrap_or_else(|| {
                    format!("Continue the '{}' phase. {}", phase.name, phase.completion_criteria)
                });
                self.transcript.append(Entry::user(nudge))?;
            }

            let response = self.call_model(&model, catalog, &analysis).await?;

            // Handle the response.
            let tool_uses = response.tool_uses();
            if tool_uses.is_empty() {
                let text = response.text();
                let stop_reason = response.stop_reason;
                self.transcript.append(response.into_entry())?;

                if stop_reason == StopReason::EndTurn {
                    final_text.clear();
                    final_text.push_str(&text);
                    // A natural ending counts as completion only when it
                    // carries a completion phrase. Without one the phase
                    // keeps iterating; the next turn appends a user nudge
                    // to restore alternation.
                    if self.contains_completion_phrase(&text) {
                        self.monitor.record_completion_signal();
                        return Ok(PhaseOutcome::Completed);
                    }
                }
            } else {
                self.handle_tool_turn(response, tool_uses).await?;
            }
        }

        Ok(PhaseOutcome::TimedOut)
    }

    /// Execute the tool uses of one assistant turn sequentially and
    /// append the exchange atomically.
    async fn handle_tool_turn(
        &mut self,
        response: ModelResponse,
        tool_uses: Vec<crate::provider::ToolUseRequest>,
    ) -> Result<()> {
        let mut result_blocks = Vec::with_capacity(tool_uses.len());
        for tool_use in &tool_uses {
            // A cancel observed here still finishes the current tool
            // call; the next suspension point exits.
            let invocation = self.tools.invoke(&tool_use.name, tool_use.input.clone()).await;

            let record = ToolCallRecord {
                tool: tool_use.name.clone(),
                input: tool_use.input.clone(),
                output: match &invocation.outcome {
                    Ok(output) => output.content.clone(),
                    Err(failure) => failure.to_string(),
                },
                success: invocation.is_success(),
                timestamp: chrono::Utc::now(),
                duration_ms: u64::try_from(invocation.duration.as_millis()).unwrap_or(u64::MAX),
                insights: invocation.insights().to_vec(),
            };

            self.emit(AgentEvent::ToolCall {
                task_id: self.task_id,
                tool: record.tool.clone(),
                success: record.success,
                duration_ms: record.duration_ms,
            });

            if record.success {
                self.monitor.mark_progress(format!(
                    "{}:{}",
                    record.tool,
                    canonical_input_prefix(&record.input, MARKER_PREFIX_LEN)
                ));
                for insight in &record.insights {
                    self.transcript.record_fact(insight.clone());
                }
            }

            result_blocks.push(invocation.result_block(&tool_use.id));
            self.monitor.record_tool_call(record);
        }

        self.transcript
            .append_exchange(response.into_entry(), Entry::tool_results(result_blocks))
    }

    /// One model call with the recovery ladder: context overflows get
    /// one aggressive-truncation retry; transient provider errors get
    /// one escalated retry. At most one escalation per iteration.
    async fn call_model(
        &mut self,
        model: &ModelConfig,
        catalog: &[ToolDescriptor],
        analysis: &ComplexityAnalysis,
    ) -> Result<ModelResponse> {
        let request = self.build_request(model, catalog, false)?;
        let started = Instant::now();

        match self.complete_cancellable(&request).await {
            Ok(response) => {
                self.record_success(model, analysis, started, &response);
                Ok(response)
            }
            Err(Error::ContextOverflow { .. }) => {
                debug!("context overflow, retrying with aggressive truncation");
                let request = self.build_request(model, catalog, true)?;
                let response = self.complete_cancellable(&request).await?;
                self.record_success(model, analysis, started, &response);
                Ok(response)
            }
            Err(error) if error.is_retryable() => {
                warn!(%error, "model call failed, escalating and retrying");
                self.router.report_failure();
                self.usage.record_escalation();
                let escalated = self.tier_config(self.router.current_tier().escalated());
                let request = self.build_request(&escalated, catalog, false)?;
                let response = self.complete_cancellable(&request).await?;
                self.record_success(&escalated, analysis, started, &response);
                Ok(response)
            }
            Err(error) => Err(error),
        }
    }

    fn build_request(
        &self,
        model: &ModelConfig,
        catalog: &[ToolDescriptor],
        aggressive: bool,
    ) -> Result<ModelRequest> {
        let budget = model
            .context_window_tokens
            .saturating_sub(model.max_output_tokens as usize + self.config.budget_headroom_tokens);
        let messages = if aggressive {
            self.transcript.prepare_aggressive(budget)?
        } else {
            match self.transcript.prepare(budget) {
                Ok(messages) => messages,
                Err(Error::ContextOverflow { .. }) => self.transcript.prepare_aggressive(budget)?,
                Err(e) => return Err(e),
            }
        };
        Ok(ModelRequest::new(&model.id, messages)
            .max_output_tokens(model.max_output_tokens)
            .system(SYSTEM_PROMPT)
            .tools(catalog.to_vec()))
    }

    /// A model call that aborts at the next await point on cancel.
    async fn complete_cancellable(&self, request: &ModelRequest) -> Result<ModelResponse> {
        let mut cancel = self.cancel.clone();
        if *cancel.borrow() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            _ = cancel.changed() => Err(Error::Cancelled),
            result = self.provider.complete(request) => result,
        }
    }

    fn record_success(
        &mut self,
        model: &ModelConfig,
        analysis: &ComplexityAnalysis,
        started: Instant,
        response: &ModelResponse,
    ) {
        let latency = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.router.report_success(analysis.level, latency);
        self.usage.record_call(&model.id, response.usage);
    }

    fn tier_config(&self, tier: ModelTier) -> ModelConfig {
        self.router.config_for(tier).cloned().unwrap_or_else(|| {
            crate::router::default_tiers()
                .into_iter()
                .find(|c| c.tier == tier)
                .unwrap_or_else(|| crate::router::default_tiers().remove(0))
        })
    }

    fn framing_text(&self, environment: &crate::planner::EnvironmentSnapshot, plan: &StrategicPlan) -> String {
        let mut text = format!(
            "Task: {}\n\nEnvironment: {} project in {}",
            self.description, environment.project_type, environment.working_directory
        );
        if let Some(branch) = &environment.vcs_branch {
            text.push_str(&format!(" (branch {branch})"));
        }
        if !environment.key_files.is_empty() {
            text.push_str(&format!("\nKey files: {}", environment.key_files.join(", ")));
        }
        text.push_str(&format!(
            "\n\nApproach: {} ({})\nPhases:",
            plan.approach.name, plan.approach.reasoning
        ));
        for phase in &plan.phases {
            text.push_str(&format!("\n- {}: {}", phase.name, phase.description));
        }
        if !plan.success_criteria.is_empty() {
            text.push_str(&format!(
                "\n\nSuccess criteria:\n- {}",
                plan.success_criteria.join("\n- ")
            ));
        }
        if let Some(history) = &self.config.conversation_history {
            text.push_str(&format!("\n\nConversation so far:\n{history}"));
        }
        text
    }

    fn contains_completion_phrase(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.config
            .completion_phrases
            .iter()
            .any(|phrase| lowered.contains(phrase.as_str()))
    }

    fn payload(&self, plan: &StrategicPlan, summary: String) -> TaskResultPayload {
        TaskResultPayload {
            iterations: self.monitor.state().iteration,
            tool_calls: self.monitor.state().tool_calls.len(),
            discoveries: self.transcript.facts().to_vec(),
            approach: plan.approach.name.clone(),
            confidence: plan.approach.confidence,
            summary,
            model_usage: self.usage.clone(),
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if *self.cancel.borrow() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn emit(&self, event: AgentEvent) {
        // A closed channel means the manager is gone; the task result
        // still propagates through the join handle.
        let _ = self.events.send(event);
    }
}
