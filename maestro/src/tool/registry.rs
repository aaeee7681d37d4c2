//! Tool registry and invocation machinery.
//!
//! The registry is the catalog of callable tools. Every invocation is
//! wrapped to enforce a per-tool timeout, cap captured output at a hard
//! byte limit, and redact secrets before the output reaches the
//! transcript. Handler failures never propagate as `Err` out of
//! [`ToolRegistry::invoke`]; they come back as structured
//! [`ToolFailure`] values so the model can react.

use std::collections::HashMap;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tracing::{Instrument, debug, info_span, warn};

use crate::message::Block;

use super::traits::{ToolDescriptor, ToolDyn, ToolFailure, ToolOutput};

/// Marker appended to output that hit the byte cap.
const TRUNCATION_NOTE: &str = "\n[output truncated]";

/// Replacement for redacted spans.
const REDACTED: &str = "[redacted]";

/// Redaction rules applied to captured tool output.
///
/// A span matching any deny pattern is replaced unless it also matches
/// an allow pattern.
#[derive(Debug, Clone, Default)]
pub struct RedactionRules {
    deny: Vec<Regex>,
    allow: Vec<Regex>,
}

impl RedactionRules {
    /// Rules matching common credential shapes (bearer tokens, API keys,
    /// `KEY=value` secrets).
    #[must_use]
    pub fn standard() -> Self {
        let deny = [
            r"(?i)bearer\s+[a-z0-9._\-]{16,}",
            r"(?i)(api[_-]?key|token|secret|password)\s*[=:]\s*\S+",
            r"sk-[a-zA-Z0-9]{20,}",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect();
        Self {
            deny,
            allow: Vec::new(),
        }
    }

    /// Add a deny pattern.
    #[must_use]
    pub fn deny(mut self, pattern: Regex) -> Self {
        self.deny.push(pattern);
        self
    }

    /// Add an allow pattern that overrides deny matches.
    #[must_use]
    pub fn allow(mut self, pattern: Regex) -> Self {
        self.allow.push(pattern);
        self
    }

    /// Apply the rules to a captured output string.
    #[must_use]
    pub fn apply(&self, text: &str) -> String {
        let mut result = text.to_owned();
        for pattern in &self.deny {
            let current = result.clone();
            let mut rewritten = String::with_capacity(current.len());
            let mut last = 0;
            for m in pattern.find_iter(&current) {
                rewritten.push_str(&current[last..m.start()]);
                if self.allow.iter().any(|a| a.is_match(m.as_str())) {
                    rewritten.push_str(m.as_str());
                } else {
                    rewritten.push_str(REDACTED);
                }
                last = m.end();
            }
            rewritten.push_str(&current[last..]);
            result = rewritten;
        }
        result
    }
}

/// Invoker limits applied to every tool call.
#[derive(Debug, Clone)]
pub struct InvokerConfig {
    /// Per-call timeout.
    pub timeout: Duration,
    /// Hard cap on captured output bytes.
    pub max_output_bytes: usize,
    /// Redaction rules for captured output.
    pub redaction: RedactionRules,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_output_bytes: 64 * 1024,
            redaction: RedactionRules::standard(),
        }
    }
}

/// Result of one wrapped tool invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Name the model asked for.
    pub tool: String,
    /// Output or structured failure.
    pub outcome: Result<ToolOutput, ToolFailure>,
    /// Wall-clock duration of the call.
    pub duration: Duration,
}

impl Invocation {
    /// Whether the call succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Insights from a successful call, empty otherwise.
    #[must_use]
    pub fn insights(&self) -> &[String] {
        self.outcome.as_ref().map_or(&[], |o| &o.insights)
    }

    /// Render this invocation as a `tool_result` block for the model.
    #[must_use]
    pub fn result_block(&self, tool_use_id: &str) -> Block {
        match &self.outcome {
            Ok(output) => Block::tool_result(tool_use_id, output.content.clone()),
            Err(failure) => Block::tool_error(tool_use_id, failure.to_string()),
        }
    }
}

/// Catalog of callable tools, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, Box<dyn ToolDyn>>,
    config: InvokerConfig,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with explicit invoker limits.
    #[must_use]
    pub fn with_config(config: InvokerConfig) -> Self {
        Self {
            tools: HashMap::new(),
            config,
        }
    }

    /// Register a tool. A later registration under the same name wins.
    pub fn register(&mut self, tool: impl ToolDyn + 'static) {
        self.tools.insert(tool.name(), Box::new(tool));
    }

    /// Register a tool only when its external dependency is configured.
    pub fn register_when(&mut self, available: bool, tool: impl ToolDyn + 'static) {
        if available {
            self.register(tool);
        } else {
            debug!(tool = tool.name(), "tool unavailable, not registered");
        }
    }

    /// Whether a tool with the given name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The descriptor list supplied to the model as the tool catalog.
    #[must_use]
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> =
            self.tools.values().map(|t| t.descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Registered tool names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.tools.values().map(|t| t.name()).collect();
        names.sort_unstable();
        names
    }

    /// Invoke a tool by name.
    ///
    /// Validates the input against the tool's parameter schema, enforces
    /// the timeout and the output byte cap, and redacts secrets. Never
    /// returns `Err`; failures are carried inside the [`Invocation`].
    pub async fn invoke(&self, name: &str, input: Value) -> Invocation {
        let span = info_span!("tool", tool.name = %name);
        async {
            let started = std::time::Instant::now();

            let Some(tool) = self.tools.get(name) else {
                warn!(tool = %name, "tool not found");
                return Invocation {
                    tool: name.to_owned(),
                    outcome: Err(ToolFailure::not_found(name)),
                    duration: started.elapsed(),
                };
            };

            let outcome =
                match tokio::time::timeout(self.config.timeout, tool.call_value(input)).await {
                    Ok(Ok(output)) => Ok(self.postprocess(output)),
                    Ok(Err(failure)) => {
                        warn!(tool = %name, error = %failure, "tool call failed");
                        Err(failure)
                    }
                    Err(_) => {
                        warn!(tool = %name, "tool call timed out");
                        Err(ToolFailure::timeout(self.config.timeout.as_secs()))
                    }
                };

            Invocation {
                tool: name.to_owned(),
                outcome,
                duration: started.elapsed(),
            }
        }
        .instrument(span)
        .await
    }

    /// Redact and cap a successful output.
    fn postprocess(&self, mut output: ToolOutput) -> ToolOutput {
        output.content = self.config.redaction.apply(&output.content);
        if output.content.len() > self.config.max_output_bytes {
            let mut cut = self.config.max_output_bytes;
            while !output.content.is_char_boundary(cut) {
                cut -= 1;
            }
            output.content.truncate(cut);
            output.content.push_str(TRUNCATION_NOTE);
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::traits::{FailureKind, Tool};
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[derive(Debug, Clone, Copy, Default)]
    struct Shout;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct ShoutArgs {
        message: String,
        #[serde(default)]
        repeat: Option<usize>,
    }

    impl Tool for Shout {
        const NAME: &'static str = "shout";
        type Args = ShoutArgs;
        type Output = String;

        fn description(&self) -> String {
            "Uppercase a message.".to_owned()
        }

        async fn call(&self, args: Self::Args) -> Result<Self::Output, ToolFailure> {
            let repeated = args.repeat.unwrap_or(1);
            Ok(args.message.to_uppercase().repeat(repeated))
        }
    }

    #[derive(Debug, Clone, Copy, Default)]
    struct Sleeper;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct SleepArgs {
        millis: u64,
    }

    impl Tool for Sleeper {
        const NAME: &'static str = "sleeper";
        type Args = SleepArgs;
        type Output = String;

        fn description(&self) -> String {
            "Sleep for a while.".to_owned()
        }

        async fn call(&self, args: Self::Args) -> Result<Self::Output, ToolFailure> {
            tokio::time::sleep(Duration::from_millis(args.millis)).await;
            Ok("slept".to_owned())
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::with_config(InvokerConfig {
            timeout: Duration::from_millis(200),
            max_output_bytes: 64,
            redaction: RedactionRules::standard(),
        });
        registry.register(Shout);
        registry.register(Sleeper);
        registry
    }

    #[tokio::test]
    async fn invoke_success() {
        let invocation = registry()
            .invoke("shout", serde_json::json!({"message": "hi"}))
            .await;
        assert!(invocation.is_success());
        let output = invocation.outcome.expect("success");
        assert_eq!(output.content, "HI");
    }

    #[tokio::test]
    async fn unknown_tool_is_structured_not_raised() {
        let invocation = registry().invoke("nope", Value::Null).await;
        let failure = invocation.outcome.expect_err("should fail");
        assert_eq!(failure.kind, FailureKind::NotFound);
    }

    #[tokio::test]
    async fn invalid_arguments_fail_validation() {
        let invocation = registry()
            .invoke("shout", serde_json::json!({"message": 42}))
            .await;
        let failure = invocation.outcome.expect_err("should fail");
        assert_eq!(failure.kind, FailureKind::Validation);
    }

    #[tokio::test]
    async fn output_is_capped_and_annotated() {
        let invocation = registry()
            .invoke(
                "shout",
                serde_json::json!({"message": "abcdefgh", "repeat": 100}),
            )
            .await;
        let output = invocation.outcome.expect("success");
        assert!(output.content.len() <= 64 + TRUNCATION_NOTE.len());
        assert!(output.content.ends_with(TRUNCATION_NOTE));
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let invocation = registry()
            .invoke("sleeper", serde_json::json!({"millis": 5000}))
            .await;
        let failure = invocation.outcome.expect_err("should time out");
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(failure.retryable);
    }

    #[test]
    fn redaction_masks_secrets() {
        let rules = RedactionRules::standard();
        let masked = rules.apply("export API_KEY=abc123 and Bearer abcdefghijklmnop1234");
        assert!(!masked.contains("abc123"));
        assert!(!masked.contains("abcdefghijklmnop1234"));
        assert!(masked.contains(REDACTED));
    }

    #[test]
    fn descriptors_are_sorted() {
        let names: Vec<String> = registry()
            .descriptors()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["shout".to_owned(), "sleeper".to_owned()]);
    }
}
