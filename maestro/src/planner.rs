//! Strategic planning for a task.
//!
//! The planner turns a task description, an environment snapshot and
//! the tool inventory into a [`StrategicPlan`]: approach, ordered
//! phases, tool strategy, risk and success criteria. It calls the
//! powerful tier first; on malformed output it retries once with the
//! balanced tier and a stricter prompt; if both fail it synthesizes a
//! conservative single-phase fallback. The planner never touches the
//! execution transcript.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::message::Entry;
use crate::provider::{ModelProvider, ModelRequest};
use crate::router::{Complexity, ModelConfig};
use crate::tool::ToolDescriptor;

/// Kind of work a phase represents, inferred from its name. Used only
/// for model routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseKind {
    /// Reading and discovering.
    Exploration,
    /// Organizing an approach.
    Planning,
    /// Doing the work.
    Execution,
    /// Checking the work.
    Verification,
    /// Summarizing outcomes.
    Reporting,
}

impl PhaseKind {
    /// Infer the kind from a phase name.
    #[must_use]
    pub fn infer(name: &str) -> Self {
        let lowered = name.to_lowercase();
        let matches_any =
            |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));
        if matches_any(&["explor", "discover", "investigat", "research", "read"]) {
            Self::Exploration
        } else if matches_any(&["plan", "design", "architect"]) {
            Self::Planning
        } else if matches_any(&["verif", "test", "check", "validat", "review"]) {
            Self::Verification
        } else if matches_any(&["report", "summar", "document", "present"]) {
            Self::Reporting
        } else {
            Self::Execution
        }
    }
}

/// Lifecycle of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    /// Not started.
    #[default]
    Pending,
    /// Currently running.
    Active,
    /// Finished successfully.
    Complete,
    /// Skipped by the runtime.
    Skipped,
    /// Ended in failure.
    Failed,
}

/// One planned stage of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    /// Stable phase id.
    pub id: String,
    /// Short name; its keywords drive [`PhaseKind::infer`].
    pub name: String,
    /// What the phase should accomplish.
    pub description: String,
    /// Tool names the phase expects to use.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Estimated iterations to finish the phase.
    #[serde(default = "default_estimated_iterations")]
    pub estimated_iterations: u32,
    /// How the runtime knows the phase is done.
    #[serde(default)]
    pub completion_criteria: String,
    /// Whether the phase may be delegated to a sub-agent.
    #[serde(default)]
    pub can_delegate: bool,
    /// Optional per-tool usage notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_strategies: Option<Value>,
    /// Current status; the only mutable part of a plan.
    #[serde(default)]
    pub status: PhaseStatus,
}

const fn default_estimated_iterations() -> u32 {
    3
}

impl Phase {
    /// The inferred kind of this phase.
    #[must_use]
    pub fn kind(&self) -> PhaseKind {
        PhaseKind::infer(&self.name)
    }
}

/// The selected approach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approach {
    /// Approach name.
    pub name: String,
    /// Confidence in \[0, 1\].
    pub confidence: f64,
    /// Why this approach.
    pub reasoning: String,
    /// Optional fallback approach name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

/// Which tools to lean on, tolerate, and avoid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolStrategy {
    /// Tools expected to carry the work.
    #[serde(default)]
    pub primary: Vec<String>,
    /// Tools to use when primaries fall short.
    #[serde(default)]
    pub secondary: Vec<String>,
    /// Tools to avoid for this task.
    #[serde(default)]
    pub avoid: Vec<String>,
}

/// Risk severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Routine work.
    Low,
    /// Some uncertainty.
    #[default]
    Moderate,
    /// Likely to go wrong without care.
    High,
}

/// Risk assessment for the plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Overall severity.
    #[serde(default)]
    pub level: RiskLevel,
    /// Specific concerns.
    #[serde(default)]
    pub concerns: Vec<String>,
    /// Planned mitigations.
    #[serde(default)]
    pub mitigations: Vec<String>,
}

/// A complete strategic plan, produced once per task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategicPlan {
    /// The planner's restatement of the task.
    pub task_understanding: String,
    /// Selected approach.
    pub approach: Approach,
    /// Ordered phases.
    pub phases: Vec<Phase>,
    /// Tool preferences.
    #[serde(default)]
    pub tool_strategy: ToolStrategy,
    /// Risk assessment.
    #[serde(default)]
    pub risk: RiskAssessment,
    /// Conditions that make the task done.
    #[serde(default)]
    pub success_criteria: Vec<String>,
    /// Overall complexity estimate.
    #[serde(default = "default_complexity")]
    pub estimated_complexity: Complexity,
}

const fn default_complexity() -> Complexity {
    Complexity::Moderate
}

/// Read-only snapshot of the working environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    /// Absolute working directory.
    pub working_directory: String,
    /// Detected project type ("rust", "node", "unknown", ...).
    pub project_type: String,
    /// Notable files at the workspace root.
    #[serde(default)]
    pub key_files: Vec<String>,
    /// Whether version control is present.
    #[serde(default)]
    pub has_vcs: bool,
    /// Current branch, when under version control.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcs_branch: Option<String>,
    /// Short VCS status, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcs_status: Option<String>,
    /// Recently modified files.
    #[serde(default)]
    pub recently_modified: Vec<String>,
}

/// Outcome of a planning attempt.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    /// The plan to execute.
    pub plan: StrategicPlan,
    /// Whether the fallback plan was used.
    pub fallback_used: bool,
}

/// Produces a [`StrategicPlan`] for a task.
#[derive(Debug, Clone, Copy, Default)]
pub struct Planner;

impl Planner {
    /// Plan a task.
    ///
    /// Calls the powerful tier with a structured request, retries once
    /// with the balanced tier and a stricter prompt on malformed
    /// output, then falls back to a synthesized single-phase plan.
    pub async fn plan(
        &self,
        provider: &dyn ModelProvider,
        powerful: &ModelConfig,
        balanced: &ModelConfig,
        task: &str,
        environment: &EnvironmentSnapshot,
        tools: &[ToolDescriptor],
    ) -> PlanOutcome {
        let prompt = Self::build_prompt(task, environment, tools, false);
        match Self::attempt(provider, &powerful.id, powerful.max_output_tokens, &prompt).await {
            Ok(plan) => {
                return PlanOutcome {
                    plan,
                    fallback_used: false,
                };
            }
            Err(reason) => {
                warn!(%reason, "planner output malformed, retrying with balanced tier");
            }
        }

        let strict = Self::build_prompt(task, environment, tools, true);
        match Self::attempt(provider, &balanced.id, balanced.max_output_tokens, &strict).await {
            Ok(plan) => PlanOutcome {
                plan,
                fallback_used: false,
            },
            Err(reason) => {
                warn!(%reason, "planner retry failed, using fallback plan");
                PlanOutcome {
                    plan: Self::fallback_plan(task, tools),
                    fallback_used: true,
                }
            }
        }
    }

    async fn attempt(
        provider: &dyn ModelProvider,
        model_id: &str,
        max_tokens: u32,
        prompt: &str,
    ) -> Result<StrategicPlan, String> {
        let request = ModelRequest::new(model_id, vec![Entry::user(prompt)])
            .max_output_tokens(max_tokens)
            .system(
                "You are a planning engine. Reply with exactly one JSON object and \
                 nothing else.",
            );
        let response = provider
            .complete(&request)
            .await
            .map_err(|e| e.to_string())?;
        let text = response.text();
        let json = extract_json_object(&text).ok_or_else(|| "no JSON object in reply".to_owned())?;
        let plan: StrategicPlan =
            serde_json::from_str(json).map_err(|e| format!("schema mismatch: {e}"))?;
        if plan.phases.is_empty() {
            return Err("plan has no phases".to_owned());
        }
        debug!(
            phases = plan.phases.len(),
            approach = %plan.approach.name,
            "plan parsed"
        );
        Ok(plan)
    }

    fn build_prompt(
        task: &str,
        environment: &EnvironmentSnapshot,
        tools: &[ToolDescriptor],
        strict: bool,
    ) -> String {
        let tool_lines: Vec<String> = tools
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect();
        let environment_json =
            serde_json::to_string_pretty(environment).unwrap_or_else(|_| "{}".to_owned());

        let mut prompt = format!(
            "Plan how to accomplish this task.\n\n\
             Task: {task}\n\n\
             Environment:\n{environment_json}\n\n\
             Available tools:\n{}\n\n\
             Respond with a JSON object with these fields:\n\
             task_understanding (string), approach {{name, confidence, reasoning, fallback?}},\n\
             phases (array of {{id, name, description, tools, estimated_iterations,\n\
             completion_criteria, can_delegate}}), tool_strategy {{primary, secondary, avoid}},\n\
             risk {{level: low|moderate|high, concerns, mitigations}},\n\
             success_criteria (array of strings),\n\
             estimated_complexity (trivial|simple|moderate|complex|expert).",
            tool_lines.join("\n")
        );
        if strict {
            prompt.push_str(
                "\n\nYour previous reply was not valid JSON. Output ONLY the JSON object: \
                 no prose, no code fences, double-quoted keys, no trailing commas.",
            );
        }
        prompt
    }

    /// The conservative fallback: one execution phase, every available
    /// tool primary, low confidence, moderate risk.
    #[must_use]
    pub fn fallback_plan(task: &str, tools: &[ToolDescriptor]) -> StrategicPlan {
        let tool_names: Vec<String> = tools.iter().map(|t| t.name.clone()).collect();
        StrategicPlan {
            task_understanding: task.to_owned(),
            approach: Approach {
                name: "direct-execution".to_owned(),
                confidence: 0.3,
                reasoning: "Planner output was unusable; executing directly with all tools."
                    .to_owned(),
                fallback: None,
            },
            phases: vec![Phase {
                id: "execute".to_owned(),
                name: "execute".to_owned(),
                description: format!("Work directly toward: {task}"),
                tools: tool_names.clone(),
                estimated_iterations: 5,
                completion_criteria: "The task outcome is achieved and stated.".to_owned(),
                can_delegate: false,
                tool_strategies: None,
                status: PhaseStatus::Pending,
            }],
            tool_strategy: ToolStrategy {
                primary: tool_names,
                secondary: Vec::new(),
                avoid: Vec::new(),
            },
            risk: RiskAssessment {
                level: RiskLevel::Moderate,
                concerns: vec!["no strategic plan available".to_owned()],
                mitigations: vec!["conservative iteration limits".to_owned()],
            },
            success_criteria: vec!["task outcome achieved".to_owned()],
            estimated_complexity: Complexity::Moderate,
        }
    }
}

/// Extract the first balanced JSON object from free text.
#[must_use]
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockProvider;
    use crate::router::default_tiers;

    fn tiers() -> (ModelConfig, ModelConfig) {
        let mut configs = default_tiers();
        let powerful = configs.pop().expect("powerful tier");
        let balanced = configs.pop().expect("balanced tier");
        (powerful, balanced)
    }

    fn descriptors() -> Vec<ToolDescriptor> {
        vec![ToolDescriptor {
            name: "shell".to_owned(),
            description: "run commands".to_owned(),
            parameters: serde_json::json!({"type": "object"}),
        }]
    }

    fn valid_plan_json() -> String {
        r#"{
            "task_understanding": "list the files",
            "approach": {"name": "direct", "confidence": 0.9, "reasoning": "simple"},
            "phases": [
                {"id": "p1", "name": "execution", "description": "run ls",
                 "tools": ["shell"], "estimated_iterations": 2,
                 "completion_criteria": "listing shown", "can_delegate": false}
            ],
            "tool_strategy": {"primary": ["shell"], "secondary": [], "avoid": []},
            "risk": {"level": "low", "concerns": [], "mitigations": []},
            "success_criteria": ["files listed"],
            "estimated_complexity": "trivial"
        }"#
        .to_owned()
    }

    #[test]
    fn phase_kind_inference() {
        assert_eq!(PhaseKind::infer("Explore the codebase"), PhaseKind::Exploration);
        assert_eq!(PhaseKind::infer("design the schema"), PhaseKind::Planning);
        assert_eq!(PhaseKind::infer("implement feature"), PhaseKind::Execution);
        assert_eq!(PhaseKind::infer("verify results"), PhaseKind::Verification);
        assert_eq!(PhaseKind::infer("summarize findings"), PhaseKind::Reporting);
        assert_eq!(PhaseKind::infer("anything else"), PhaseKind::Execution);
    }

    #[test]
    fn extract_json_handles_prose_and_strings() {
        let text = "Sure! Here is the plan:\n{\"a\": \"has } brace\", \"b\": {\"c\": 1}}\nDone.";
        let json = extract_json_object(text).expect("object found");
        let value: serde_json::Value = serde_json::from_str(json).expect("valid");
        assert_eq!(value["b"]["c"], 1);

        assert!(extract_json_object("no braces here").is_none());
    }

    #[tokio::test]
    async fn first_attempt_parses() {
        let provider = MockProvider::new().text(format!("Here you go: {}", valid_plan_json()));
        let (powerful, balanced) = tiers();
        let outcome = Planner
            .plan(
                &provider,
                &powerful,
                &balanced,
                "list files",
                &EnvironmentSnapshot::default(),
                &descriptors(),
            )
            .await;
        assert!(!outcome.fallback_used);
        assert_eq!(outcome.plan.phases.len(), 1);
        assert_eq!(outcome.plan.phases[0].kind(), PhaseKind::Execution);

        // First call went to the powerful tier.
        let requests = provider.requests();
        assert_eq!(requests[0].model_id, powerful.id);
    }

    #[tokio::test]
    async fn malformed_then_valid_uses_balanced_retry() {
        let provider = MockProvider::new()
            .text("I think we should probably list the files somehow.")
            .text(valid_plan_json());
        let (powerful, balanced) = tiers();
        let outcome = Planner
            .plan(
                &provider,
                &powerful,
                &balanced,
                "list files",
                &EnvironmentSnapshot::default(),
                &descriptors(),
            )
            .await;
        assert!(!outcome.fallback_used);

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].model_id, balanced.id);
        assert!(requests[1].messages[0]
            .text_content()
            .contains("ONLY the JSON object"));
    }

    #[tokio::test]
    async fn double_malformed_falls_back() {
        let provider = MockProvider::new().text("nope").text("{\"broken\": true}");
        let (powerful, balanced) = tiers();
        let outcome = Planner
            .plan(
                &provider,
                &powerful,
                &balanced,
                "list files",
                &EnvironmentSnapshot::default(),
                &descriptors(),
            )
            .await;
        assert!(outcome.fallback_used);
        let plan = outcome.plan;
        assert_eq!(plan.phases.len(), 1);
        assert!((plan.approach.confidence - 0.3).abs() < f64::EPSILON);
        assert_eq!(plan.risk.level, RiskLevel::Moderate);
        assert_eq!(plan.tool_strategy.primary, vec!["shell".to_owned()]);
    }
}
