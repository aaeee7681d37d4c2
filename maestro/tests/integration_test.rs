//! End-to-end scenarios for the execution engine.
//!
//! Each test drives a full task through the manager against a scripted
//! provider: plan, phase loop, tool calls, events, terminal state.

#![allow(clippy::unwrap_used, clippy::panic, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use maestro::Error;
use maestro::agent::RuntimeConfig;
use maestro::manager::{
    ManagerConfig, NotificationSink, OverflowPolicy, SinkError, TaskContext, TaskFilter, TaskId,
    TaskManager, TaskStatus,
};
use maestro::message::Block;
use maestro::monitor::ExecutionLimits;
use maestro::provider::{ModelProvider, ModelRequest, ModelResponse, StopReason};
use maestro::router::{ModelConfig, ModelTier, default_tiers};
use maestro::tool::{Tool, ToolFailure, ToolRegistry};
use maestro::usage::Usage;

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// One scripted non-planner step.
enum Step {
    ToolUse { name: String, input: Value },
    Text(String),
    Fail(Error),
}

/// Provider that answers planner prompts with a fixed plan and replays
/// a script for execution calls. When the script runs dry it falls back
/// to a default step, so stall loops can run unbounded.
struct TestProvider {
    plan_json: String,
    script: Mutex<VecDeque<Step>>,
    default_step: Option<Step>,
    requests: Mutex<Vec<ModelRequest>>,
    delay: Duration,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
}

impl TestProvider {
    fn new(plan_json: impl Into<String>) -> Self {
        Self {
            plan_json: plan_json.into(),
            script: Mutex::new(VecDeque::new()),
            default_step: None,
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
        }
    }

    fn step(self, step: Step) -> Self {
        self.script.lock().unwrap().push_back(step);
        self
    }

    fn tool_use(self, name: &str, input: Value) -> Self {
        self.step(Step::ToolUse {
            name: name.to_owned(),
            input,
        })
    }

    fn text(self, text: &str) -> Self {
        self.step(Step::Text(text.to_owned()))
    }

    fn fail(self, error: Error) -> Self {
        self.step(Step::Fail(error))
    }

    fn default_tool_use(mut self, name: &str, input: Value) -> Self {
        self.default_step = Some(Step::ToolUse {
            name: name.to_owned(),
            input,
        });
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn observed_max_concurrency(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    fn render(step: &Step) -> Result<ModelResponse, Error> {
        match step {
            Step::ToolUse { name, input } => Ok(ModelResponse {
                blocks: vec![Block::tool_use(
                    format!("tu_{}", uuid::Uuid::new_v4().simple()),
                    name.clone(),
                    input.clone(),
                )],
                stop_reason: StopReason::ToolUse,
                usage: Usage::new(100, 30),
            }),
            Step::Text(text) => Ok(ModelResponse {
                blocks: vec![Block::text(text.clone())],
                stop_reason: StopReason::EndTurn,
                usage: Usage::new(100, 30),
            }),
            Step::Fail(error) => Err(clone_error(error)),
        }
    }
}

fn clone_error(error: &Error) -> Error {
    match error {
        Error::Model { message, retryable } => Error::Model {
            message: message.clone(),
            retryable: *retryable,
        },
        Error::ContextOverflow { budget } => Error::ContextOverflow { budget: *budget },
        other => Error::model_fatal(other.to_string()),
    }
}

#[async_trait]
impl ModelProvider for TestProvider {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, Error> {
        let current = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(current, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.concurrent.fetch_sub(1, Ordering::SeqCst);

        self.requests.lock().unwrap().push(request.clone());

        // Planner calls identify themselves through the system prompt.
        if request
            .system
            .as_deref()
            .is_some_and(|s| s.contains("planning engine"))
        {
            return Ok(ModelResponse {
                blocks: vec![Block::text(self.plan_json.clone())],
                stop_reason: StopReason::EndTurn,
                usage: Usage::new(200, 150),
            });
        }

        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(step) => Self::render(&step),
            None => match &self.default_step {
                Some(step) => Self::render(step),
                None => Self::render(&Step::Text("task complete".to_owned())),
            },
        }
    }
}

/// Sink that records every notification line.
#[derive(Default)]
struct RecordingSink {
    lines: Mutex<Vec<(TaskId, String)>>,
}

impl RecordingSink {
    fn lines(&self) -> Vec<(TaskId, String)> {
        self.lines.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, task_id: TaskId, message: String) -> Result<(), SinkError> {
        self.lines.lock().unwrap().push((task_id, message));
        Ok(())
    }
}

/// Tool that records invocations and returns a canned payload.
#[derive(Clone)]
struct FakeShell {
    calls: Arc<Mutex<Vec<Value>>>,
    payload: String,
    sleep: Duration,
}

impl FakeShell {
    fn new(payload: &str) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            payload: payload.to_owned(),
            sleep: Duration::ZERO,
        }
    }

    fn sleeping(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }

    fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }
}

#[derive(serde::Deserialize, schemars::JsonSchema)]
struct FakeShellArgs {
    command: String,
}

impl Tool for FakeShell {
    const NAME: &'static str = "shell";
    type Args = FakeShellArgs;
    type Output = String;

    fn description(&self) -> String {
        "Run a shell command.".to_owned()
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, ToolFailure> {
        self.calls.lock().unwrap().push(json!({"command": args.command}));
        if !self.sleep.is_zero() {
            tokio::time::sleep(self.sleep).await;
        }
        Ok(self.payload.clone())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn plan_json(estimated_iterations: u32) -> String {
    json!({
        "task_understanding": "do the task",
        "approach": {"name": "direct", "confidence": 0.9, "reasoning": "straightforward"},
        "phases": [{
            "id": "p1",
            "name": "execution",
            "description": "do the work",
            "tools": ["shell"],
            "estimated_iterations": estimated_iterations,
            "completion_criteria": "work is done",
            "can_delegate": false
        }],
        "tool_strategy": {"primary": ["shell"], "secondary": [], "avoid": []},
        "risk": {"level": "low", "concerns": [], "mitigations": []},
        "success_criteria": ["done"],
        "estimated_complexity": "trivial"
    })
    .to_string()
}

fn sink_handle(sink: &Arc<RecordingSink>) -> Arc<dyn NotificationSink> {
    Arc::clone(sink) as Arc<dyn NotificationSink>
}

fn context() -> TaskContext {
    TaskContext {
        user_id: "user-1".to_owned(),
        scope_id: "scope-1".to_owned(),
        channel_id: "channel-1".to_owned(),
        created_at: chrono::Utc::now(),
    }
}

fn manager_with(
    provider: Arc<dyn ModelProvider>,
    registry: ToolRegistry,
    config: ManagerConfig,
) -> TaskManager {
    TaskManager::new(config, provider, Arc::new(registry))
}

async fn wait_terminal(manager: &TaskManager, id: TaskId) -> maestro::manager::Task {
    for _ in 0..600 {
        let task = manager.status(id).await.expect("task exists");
        if task.status.is_terminal() {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {id} never reached a terminal state");
}

fn tier_of(model_id: &str) -> ModelTier {
    default_tiers()
        .into_iter()
        .find(|c| c.id == model_id)
        .map(|c| c.tier)
        .unwrap_or(ModelTier::Fast)
}

// ---------------------------------------------------------------------------
// Scenario 1: simple list task
// ---------------------------------------------------------------------------

#[tokio::test]
async fn simple_list_task_completes_on_the_fast_tier() {
    let shell = FakeShell::new("Cargo.toml\nsrc\ntests");
    let provider = Arc::new(
        TestProvider::new(plan_json(2))
            .tool_use("shell", json!({"command": "ls"}))
            .text("The directory contains Cargo.toml, src and tests. Task complete."),
    );
    let mut registry = ToolRegistry::new();
    registry.register(shell.clone());

    let sink = Arc::new(RecordingSink::default());
    let manager = manager_with(provider.clone(), registry, ManagerConfig::default());
    manager.register_sink("chat", sink_handle(&sink)).await;

    let id = manager
        .submit("list files in .", context(), Some("chat".to_owned()))
        .await
        .expect("submit");
    let task = wait_terminal(&manager, id).await;

    assert_eq!(task.status, TaskStatus::Completed);
    let result = task.result.expect("result payload");
    assert!(result.iterations <= 5, "took {} iterations", result.iterations);
    assert_eq!(result.tool_calls, 1);

    // Exactly one shell invocation, with ls.
    let calls = shell.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["command"], "ls");

    // Execution-loop calls ran on the fast tier.
    let requests = provider.requests();
    let loop_models: Vec<ModelTier> = requests
        .iter()
        .filter(|r| !r.system.as_deref().unwrap_or("").contains("planning engine"))
        .map(|r| tier_of(&r.model_id))
        .collect();
    assert!(loop_models.iter().all(|t| *t == ModelTier::Fast));

    // Terminal notification mentions completion.
    let lines = sink.lines();
    let terminal: Vec<&String> = lines
        .iter()
        .filter(|(task_id, line)| *task_id == id && line.contains("status="))
        .map(|(_, line)| line)
        .collect();
    assert_eq!(terminal.len(), 1);
    assert!(terminal[0].contains("status=completed"));
}

#[tokio::test]
async fn natural_ending_without_phrase_keeps_iterating() {
    // The first reply ends the turn naturally but carries no completion
    // phrase; the loop must nudge and continue rather than declare the
    // phase complete.
    let provider = Arc::new(
        TestProvider::new(plan_json(2))
            .text("Here is an interim summary of the findings so far.")
            .text("Everything checks out. Task complete."),
    );
    let registry = ToolRegistry::new();

    let manager = manager_with(provider.clone(), registry, ManagerConfig::default());
    let id = manager
        .submit("summarize the findings", context(), None)
        .await
        .expect("submit");
    let task = wait_terminal(&manager, id).await;

    assert_eq!(task.status, TaskStatus::Completed);
    let result = task.result.expect("result payload");
    assert_eq!(result.iterations, 2);
    assert_eq!(result.tool_calls, 0);
    assert!(result.summary.contains("Task complete"));

    // The second loop call was preceded by a user nudge that restored
    // alternation after the non-completing assistant turn.
    let requests = provider.requests();
    let loop_requests: Vec<&ModelRequest> = requests
        .iter()
        .filter(|r| !r.system.as_deref().unwrap_or("").contains("planning engine"))
        .collect();
    assert_eq!(loop_requests.len(), 2);
    let nudge = loop_requests[1]
        .messages
        .last()
        .expect("nudge entry")
        .text_content();
    assert!(nudge.contains("Continue the"), "unexpected nudge: {nudge}");
}

// ---------------------------------------------------------------------------
// Scenario 2: stall induction
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repeated_identical_tool_calls_pivot_then_fail() {
    let shell = FakeShell::new("same output every time");
    let provider = Arc::new(
        TestProvider::new(plan_json(5))
            .default_tool_use("shell", json!({"command": "check status"})),
    );
    let mut registry = ToolRegistry::new();
    registry.register(shell.clone());

    let sink = Arc::new(RecordingSink::default());
    let manager = manager_with(provider, registry, ManagerConfig::default());
    manager.register_sink("chat", sink_handle(&sink)).await;

    let id = manager
        .submit("check the service status", context(), Some("chat".to_owned()))
        .await
        .expect("submit");
    let task = wait_terminal(&manager, id).await;

    assert_eq!(task.status, TaskStatus::Failed);
    let error = task.error.expect("error payload");
    assert!(
        error.message.contains("Execution stalled"),
        "unexpected error: {}",
        error.message
    );

    // A pivot was surfaced before the failure.
    let lines = sink.lines();
    assert!(lines.iter().any(|(_, line)| line.starts_with("pivoting:")));
}

// ---------------------------------------------------------------------------
// Scenario 3: context overflow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn oversized_transcript_truncates_and_still_terminates() {
    // Tiny context windows force truncation after a few iterations.
    let tiers: Vec<ModelConfig> = default_tiers()
        .into_iter()
        .map(|mut c| {
            c.context_window_tokens = 4000;
            c.max_output_tokens = 512;
            c
        })
        .collect();

    let shell = FakeShell::new(&"padding ".repeat(1000));
    let mut provider = TestProvider::new(plan_json(12));
    for i in 0..20 {
        provider = provider.tool_use("shell", json!({ "command": format!("step {i}") }));
    }
    let provider = Arc::new(provider.text("Everything is read. Task complete."));

    let mut registry = ToolRegistry::new();
    registry.register(shell);

    let config = ManagerConfig {
        tiers,
        runtime: RuntimeConfig {
            limits: Some(ExecutionLimits {
                min_iterations: 2,
                max_stall_iterations: 30,
                soft_cap: 40,
                hard_cap: 60,
            }),
            max_iterations_per_phase: 30,
            budget_headroom_tokens: 256,
            ..RuntimeConfig::default()
        },
        ..ManagerConfig::default()
    };
    let manager = manager_with(provider, registry, config);

    let id = manager
        .submit("read every log file", context(), None)
        .await
        .expect("submit");
    let task = wait_terminal(&manager, id).await;

    assert_eq!(task.status, TaskStatus::Completed);
    let result = task.result.expect("result");
    assert!(result.iterations > 10, "expected a long run, got {}", result.iterations);
    assert_eq!(result.tool_calls, 20);
}

// ---------------------------------------------------------------------------
// Scenario 4: model escalation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_model_error_escalates_one_tier() {
    let shell = FakeShell::new("ok");
    let provider = Arc::new(
        TestProvider::new(plan_json(3))
            .fail(Error::model_transient("rate limited"))
            .text("Schema analyzed. Task complete."),
    );
    let mut registry = ToolRegistry::new();
    registry.register(shell);

    let manager = manager_with(provider.clone(), registry, ManagerConfig::default());
    let description = "First analyze the database schema and the api architecture, then \
                       refactor the migration logic across the entire repository, then test \
                       the full workflow";
    let id = manager
        .submit(description, context(), None)
        .await
        .expect("submit");
    let task = wait_terminal(&manager, id).await;

    assert_eq!(task.status, TaskStatus::Completed);
    let result = task.result.expect("result");
    assert_eq!(result.model_usage.escalations, 1);

    // The retry after the failure ran on a strictly higher tier.
    let requests = provider.requests();
    let loop_requests: Vec<&ModelRequest> = requests
        .iter()
        .filter(|r| !r.system.as_deref().unwrap_or("").contains("planning engine"))
        .collect();
    assert!(loop_requests.len() >= 2);
    let failed_tier = tier_of(&loop_requests[0].model_id);
    let retry_tier = tier_of(&loop_requests[1].model_id);
    assert!(retry_tier > failed_tier, "{retry_tier:?} !> {failed_tier:?}");
}

// ---------------------------------------------------------------------------
// Scenario 5: cancellation mid-tool
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancellation_during_a_tool_call_finalizes_once() {
    let shell = FakeShell::new("slept").sleeping(Duration::from_millis(400));
    let provider = Arc::new(
        TestProvider::new(plan_json(3)).default_tool_use("shell", json!({"command": "sleep"})),
    );
    let mut registry = ToolRegistry::new();
    registry.register(shell);

    let sink = Arc::new(RecordingSink::default());
    let manager = manager_with(provider, registry, ManagerConfig::default());
    manager.register_sink("chat", sink_handle(&sink)).await;

    let id = manager
        .submit("sleep for a while", context(), Some("chat".to_owned()))
        .await
        .expect("submit");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(manager.cancel(id).await);

    let task = wait_terminal(&manager, id).await;
    assert_eq!(task.status, TaskStatus::Cancelled);

    // Exactly one terminal notification, none after it.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let lines = sink.lines();
    let for_task: Vec<&String> = lines
        .iter()
        .filter(|(task_id, _)| *task_id == id)
        .map(|(_, line)| line)
        .collect();
    let terminal_positions: Vec<usize> = for_task
        .iter()
        .enumerate()
        .filter(|(_, line)| line.contains("status="))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(terminal_positions.len(), 1);
    assert_eq!(terminal_positions[0], for_task.len() - 1);
    assert!(for_task[terminal_positions[0]].contains("status=cancelled"));

    // A second cancel is a no-op on the terminal task.
    assert!(!manager.cancel(id).await);
    let again = manager.status(id).await.expect("task");
    assert_eq!(again.status, TaskStatus::Cancelled);
}

// ---------------------------------------------------------------------------
// Scenario 6: concurrency cap
// ---------------------------------------------------------------------------

#[tokio::test]
async fn queue_policy_bounds_concurrency_and_drains() {
    let shell = FakeShell::new("ok");
    let provider = Arc::new(
        TestProvider::new(plan_json(1)).with_delay(Duration::from_millis(50)),
    );
    let mut registry = ToolRegistry::new();
    registry.register(shell);

    let config = ManagerConfig {
        max_concurrent_agents: 2,
        overflow: OverflowPolicy::Queue,
        ..ManagerConfig::default()
    };
    let manager = manager_with(provider.clone(), registry, config);

    let mut ids = Vec::new();
    for i in 0..5 {
        let id = manager
            .submit(&format!("small task {i}"), context(), None)
            .await
            .expect("submit");
        ids.push(id);
    }

    for id in &ids {
        let task = wait_terminal(&manager, *id).await;
        assert_eq!(task.status, TaskStatus::Completed);
    }

    assert!(
        provider.observed_max_concurrency() <= 2,
        "observed {} concurrent model calls",
        provider.observed_max_concurrency()
    );

    let (tasks, stats) = manager.list(&TaskFilter::default()).await;
    assert_eq!(tasks.len(), 5);
    assert_eq!(stats.completed, 5);
    assert_eq!(stats.total, 5);
}

#[tokio::test]
async fn reject_policy_fails_fast_at_the_cap() {
    let shell = FakeShell::new("ok");
    let provider = Arc::new(
        TestProvider::new(plan_json(1)).with_delay(Duration::from_millis(200)),
    );
    let mut registry = ToolRegistry::new();
    registry.register(shell);

    let config = ManagerConfig {
        max_concurrent_agents: 1,
        overflow: OverflowPolicy::Reject,
        ..ManagerConfig::default()
    };
    let manager = manager_with(provider, registry, config);

    let first = manager
        .submit("long task", context(), None)
        .await
        .expect("first submit");

    let second = manager.submit("another task", context(), None).await;
    assert!(matches!(second, Err(Error::Capacity { cap: 1, .. })));

    let task = wait_terminal(&manager, first).await;
    assert_eq!(task.status, TaskStatus::Completed);
}

// ---------------------------------------------------------------------------
// Cross-cutting invariants
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_reads_are_pure_and_listings_filter() {
    let shell = FakeShell::new("ok");
    let provider = Arc::new(TestProvider::new(plan_json(1)));
    let mut registry = ToolRegistry::new();
    registry.register(shell);

    let manager = manager_with(provider, registry, ManagerConfig::default());
    let mut other = context();
    other.user_id = "user-2".to_owned();

    let a = manager.submit("task a", context(), None).await.expect("a");
    let b = manager.submit("task b", other, None).await.expect("b");
    wait_terminal(&manager, a).await;
    wait_terminal(&manager, b).await;

    let before = manager.status(a).await.expect("status");
    let after = manager.status(a).await.expect("status again");
    assert_eq!(before.status, after.status);
    assert_eq!(before.completed_at, after.completed_at);

    let (mine, _) = manager
        .list(&TaskFilter {
            user_id: Some("user-2".to_owned()),
            ..TaskFilter::default()
        })
        .await;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].id, b);

    assert!(matches!(
        manager.status(TaskId::new()).await,
        Err(Error::UnknownTask(_))
    ));
}

#[tokio::test]
async fn fallback_plan_still_executes_trivial_tasks() {
    // Planner output is garbage twice; the fallback plan runs the task.
    struct BadPlanner {
        inner: TestProvider,
    }

    #[async_trait]
    impl ModelProvider for BadPlanner {
        async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, Error> {
            if request
                .system
                .as_deref()
                .is_some_and(|s| s.contains("planning engine"))
            {
                return Ok(ModelResponse {
                    blocks: vec![Block::text("I cannot produce JSON today.".to_owned())],
                    stop_reason: StopReason::EndTurn,
                    usage: Usage::new(10, 10),
                });
            }
            self.inner.complete(request).await
        }
    }

    let shell = FakeShell::new("ok");
    let provider = Arc::new(BadPlanner {
        inner: TestProvider::new(String::new()).text("Listing shown. Task complete."),
    });
    let mut registry = ToolRegistry::new();
    registry.register(shell);

    let sink = Arc::new(RecordingSink::default());
    let manager = manager_with(provider, registry, ManagerConfig::default());
    manager.register_sink("chat", sink_handle(&sink)).await;

    let id = manager
        .submit("list files", context(), Some("chat".to_owned()))
        .await
        .expect("submit");
    let task = wait_terminal(&manager, id).await;

    assert_eq!(task.status, TaskStatus::Completed);
    let result = task.result.expect("result");
    assert_eq!(result.approach, "direct-execution");
    assert!((result.confidence - 0.3).abs() < f64::EPSILON);

    // The fallback was surfaced as a warning.
    let lines = sink.lines();
    assert!(lines.iter().any(|(_, line)| line.contains("fallback plan")));
}
