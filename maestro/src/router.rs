//! Model routing: complexity scoring, tier selection, escalation.
//!
//! The router maps `(task, phase, failure count)` onto one of three
//! model tiers. Selection starts from a weighted complexity analysis of
//! the task text, applies a per-phase override table, and is raised by
//! a monotone escalation floor: every reported failure lifts the floor
//! one tier (bounded by the configured maximum) for the rest of the
//! task. Router instances are per-task, so the buckets need no locking.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::planner::PhaseKind;

/// Capability/cost bracket of a model.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// Cheapest and fastest tier.
    Fast,
    /// Mid-range default tier.
    Balanced,
    /// Most capable tier.
    Powerful,
}

impl ModelTier {
    /// The next tier up, saturating at [`Self::Powerful`].
    #[must_use]
    pub const fn escalated(self) -> Self {
        match self {
            Self::Fast => Self::Balanced,
            Self::Balanced | Self::Powerful => Self::Powerful,
        }
    }

    /// String form for logs and payloads.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Balanced => "balanced",
            Self::Powerful => "powerful",
        }
    }
}

/// Concrete model configuration for one tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Opaque provider model id.
    pub id: String,
    /// Human-readable name.
    pub display_name: String,
    /// The tier this model fills.
    pub tier: ModelTier,
    /// Maximum output tokens per call.
    pub max_output_tokens: u32,
    /// Context window size in tokens.
    pub context_window_tokens: usize,
    /// Input cost per 1k tokens, in dollars.
    pub cost_input_per_1k: f64,
    /// Output cost per 1k tokens, in dollars.
    pub cost_output_per_1k: f64,
    /// Typical latency per call.
    pub avg_latency_ms: u64,
    /// Qualitative strengths.
    #[serde(default)]
    pub strengths: Vec<String>,
    /// Task kinds this model suits best.
    #[serde(default)]
    pub best_for: Vec<String>,
}

/// Task complexity level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// One obvious step.
    Trivial,
    /// A couple of routine steps.
    Simple,
    /// Several steps, familiar domain.
    Moderate,
    /// Many steps or unfamiliar domain.
    Complex,
    /// Open-ended, multi-domain work.
    Expert,
}

impl Complexity {
    /// Map a 0–100 score to a level.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s < 20.0 => Self::Trivial,
            s if s < 40.0 => Self::Simple,
            s if s < 60.0 => Self::Moderate,
            s if s < 80.0 => Self::Complex,
            _ => Self::Expert,
        }
    }

    /// String form for logs and payloads.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trivial => "trivial",
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
            Self::Expert => "expert",
        }
    }
}

/// One weighted scoring factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityFactor {
    /// Factor name.
    pub name: String,
    /// Weight in the total; all weights sum to 1.
    pub weight: f64,
    /// Raw factor score, 0–100.
    pub score: f64,
}

/// Result of scoring a task description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityAnalysis {
    /// Weighted total, 0–100.
    pub score: f64,
    /// Derived level.
    pub level: Complexity,
    /// Individual factors.
    pub factors: Vec<ComplexityFactor>,
    /// Tier recommended before overrides and escalation.
    pub recommended_tier: ModelTier,
    /// Short explanation of the dominant factors.
    pub reasoning: String,
}

/// Inputs that adjust routing beyond the task text.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionContext {
    /// Current phase, when inside one.
    pub phase: Option<PhaseKind>,
    /// Failures already reported during this task.
    pub prior_failures: u32,
    /// Whether the phase requires delegation-capable tools.
    pub needs_delegation: bool,
}

const ACTION_VERBS: &[&str] = &[
    "analyze", "build", "create", "debug", "deploy", "design", "fix", "implement", "investigate",
    "migrate", "optimize", "refactor", "research", "test", "write",
];

const DOMAIN_KEYWORDS: &[&str] = &[
    "api", "architecture", "async", "benchmark", "compiler", "concurrency", "database",
    "distributed", "encryption", "kubernetes", "migration", "performance", "protocol", "schema",
    "security",
];

const MULTI_STEP_MARKERS: &[&str] = &[
    "after that", "and then", "finally", "first", "followed by", "once done", "step", "then",
];

const SCOPE_MARKERS: &[&str] = &[
    "all", "across", "entire", "every", "full", "project-wide", "repository", "whole",
];

/// Score thresholds mapping the weighted total onto a tier.
const BALANCED_THRESHOLD: f64 = 35.0;
const POWERFUL_THRESHOLD: f64 = 70.0;

fn keyword_score(text: &str, keywords: &[&str], per_hit: f64) -> f64 {
    let hits = keywords.iter().filter(|k| text.contains(*k)).count();
    (hits as f64 * per_hit).min(100.0)
}

/// Per-task model router over three tiers.
#[derive(Debug)]
pub struct ModelRouter {
    tiers: BTreeMap<ModelTier, ModelConfig>,
    /// Escalation floor; never lowered within a task.
    floor: ModelTier,
    /// Highest tier escalation may reach.
    max_tier: ModelTier,
    escalate_count: u32,
    last_selected: ModelTier,
    perf: HashMap<(String, Complexity), PerfBucket>,
}

/// Success/latency bucket per (model, complexity).
#[derive(Debug, Clone, Copy, Default)]
struct PerfBucket {
    successes: u32,
    failures: u32,
    total_latency_ms: u64,
}

impl ModelRouter {
    /// Create a router over the given tier configurations.
    #[must_use]
    pub fn new(configs: Vec<ModelConfig>) -> Self {
        let tiers: BTreeMap<ModelTier, ModelConfig> =
            configs.into_iter().map(|c| (c.tier, c)).collect();
        Self {
            tiers,
            floor: ModelTier::Fast,
            max_tier: ModelTier::Powerful,
            escalate_count: 0,
            last_selected: ModelTier::Fast,
            perf: HashMap::new(),
        }
    }

    /// Bound escalation below [`ModelTier::Powerful`].
    #[must_use]
    pub const fn max_tier(mut self, tier: ModelTier) -> Self {
        self.max_tier = tier;
        self
    }

    /// Number of escalations performed so far.
    #[must_use]
    pub const fn escalate_count(&self) -> u32 {
        self.escalate_count
    }

    /// The tier selected by the most recent call to
    /// [`Self::select_for_task`].
    #[must_use]
    pub const fn current_tier(&self) -> ModelTier {
        self.last_selected
    }

    /// The model configuration for a tier.
    #[must_use]
    pub fn config_for(&self, tier: ModelTier) -> Option<&ModelConfig> {
        self.tiers.get(&tier)
    }

    /// Compute the weighted complexity analysis for a task description.
    #[must_use]
    pub fn analyze(&self, description: &str, context: &SelectionContext) -> ComplexityAnalysis {
        let text = description.to_lowercase();

        let length_score = ((text.len() as f64) / 4.0).min(100.0);
        let verb_score = keyword_score(&text, ACTION_VERBS, 25.0);
        let scope_score = keyword_score(&text, SCOPE_MARKERS, 30.0);
        let domain_score = keyword_score(&text, DOMAIN_KEYWORDS, 25.0);
        let steps_score = keyword_score(&text, MULTI_STEP_MARKERS, 30.0);

        let mut adjust: f64 = 0.0;
        adjust += f64::from(context.prior_failures.min(4)) * 25.0;
        if context.phase == Some(PhaseKind::Exploration) {
            adjust -= 15.0;
        }
        if context.needs_delegation {
            adjust += 25.0;
        }
        let adjust_score = adjust.clamp(0.0, 100.0);

        let factors = vec![
            ComplexityFactor {
                name: "task_length".to_owned(),
                weight: 0.15,
                score: length_score,
            },
            ComplexityFactor {
                name: "action_verbs".to_owned(),
                weight: 0.20,
                score: verb_score,
            },
            ComplexityFactor {
                name: "scope_breadth".to_owned(),
                weight: 0.15,
                score: scope_score,
            },
            ComplexityFactor {
                name: "domain_keywords".to_owned(),
                weight: 0.20,
                score: domain_score,
            },
            ComplexityFactor {
                name: "multi_step".to_owned(),
                weight: 0.15,
                score: steps_score,
            },
            ComplexityFactor {
                name: "context_adjustments".to_owned(),
                weight: 0.15,
                score: adjust_score,
            },
        ];

        let score: f64 = factors.iter().map(|f| f.weight * f.score).sum();
        let level = Complexity::from_score(score);
        let recommended_tier = if score >= POWERFUL_THRESHOLD {
            ModelTier::Powerful
        } else if score >= BALANCED_THRESHOLD {
            ModelTier::Balanced
        } else {
            ModelTier::Fast
        };

        let dominant = factors
            .iter()
            .max_by(|a, b| {
                (a.weight * a.score)
                    .partial_cmp(&(b.weight * b.score))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map_or_else(|| "task_length".to_owned(), |f| f.name.clone());

        ComplexityAnalysis {
            score,
            level,
            factors,
            recommended_tier,
            reasoning: format!(
                "score {score:.0} ({}), dominated by {dominant}",
                level.as_str()
            ),
        }
    }

    /// Select the model for a task at its current phase.
    ///
    /// The phase override table adjusts the analysis-recommended tier,
    /// then the escalation floor is applied, then the configured max.
    pub fn select_for_task(
        &mut self,
        description: &str,
        context: &SelectionContext,
    ) -> (ComplexityAnalysis, ModelConfig) {
        let analysis = self.analyze(description, context);
        let phase_tier = context
            .phase
            .map_or(analysis.recommended_tier, |phase| {
                Self::phase_override(phase, analysis.level)
            });

        let tier = phase_tier.max(self.floor).min(self.max_tier);
        self.last_selected = tier;
        debug!(
            tier = tier.as_str(),
            score = analysis.score,
            floor = self.floor.as_str(),
            "model selected"
        );
        let config = self
            .tiers
            .get(&tier)
            .or_else(|| self.tiers.values().next_back())
            .cloned()
            .unwrap_or_else(|| fallback_config(tier));
        (analysis, config)
    }

    /// Per-(phase, complexity) tier override table.
    fn phase_override(phase: PhaseKind, complexity: Complexity) -> ModelTier {
        match (phase, complexity) {
            (PhaseKind::Exploration | PhaseKind::Reporting, _)
            | (_, Complexity::Trivial) => ModelTier::Fast,
            (PhaseKind::Planning, Complexity::Complex | Complexity::Expert)
            | (PhaseKind::Execution, Complexity::Expert) => ModelTier::Powerful,
            (PhaseKind::Planning | PhaseKind::Verification, _)
            | (PhaseKind::Execution, Complexity::Complex) => ModelTier::Balanced,
            (PhaseKind::Execution, _) => ModelTier::Fast,
        }
    }

    /// Report a model failure: raises the escalation floor one tier,
    /// bounded by the configured maximum.
    pub fn report_failure(&mut self) {
        let next = self.floor.escalated().min(self.max_tier);
        if next > self.floor {
            self.floor = next;
            self.escalate_count += 1;
            debug!(floor = self.floor.as_str(), "escalated model floor");
        }
        if let Some(config) = self.tiers.get(&self.last_selected) {
            let bucket = self
                .perf
                .entry((config.id.clone(), Complexity::Moderate))
                .or_default();
            bucket.failures += 1;
        }
    }

    /// Report a successful call for the (model, complexity) bucket.
    pub fn report_success(&mut self, complexity: Complexity, latency_ms: u64) {
        if let Some(config) = self.tiers.get(&self.last_selected) {
            let bucket = self.perf.entry((config.id.clone(), complexity)).or_default();
            bucket.successes += 1;
            bucket.total_latency_ms += latency_ms;
        }
    }

    /// Success rate for a (model, complexity) bucket, when observed.
    #[must_use]
    pub fn success_rate(&self, model_id: &str, complexity: Complexity) -> Option<f64> {
        let bucket = self.perf.get(&(model_id.to_owned(), complexity))?;
        let total = bucket.successes + bucket.failures;
        (total > 0).then(|| f64::from(bucket.successes) / f64::from(total))
    }
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new(default_tiers())
    }
}

fn fallback_config(tier: ModelTier) -> ModelConfig {
    ModelConfig {
        id: format!("unconfigured-{}", tier.as_str()),
        display_name: format!("Unconfigured {}", tier.as_str()),
        tier,
        max_output_tokens: 4096,
        context_window_tokens: 100_000,
        cost_input_per_1k: 0.0,
        cost_output_per_1k: 0.0,
        avg_latency_ms: 1000,
        strengths: Vec::new(),
        best_for: Vec::new(),
    }
}

/// The three built-in tier configurations. Model ids are opaque and are
/// normally replaced from deployment configuration.
#[must_use]
pub fn default_tiers() -> Vec<ModelConfig> {
    vec![
        ModelConfig {
            id: "swift-mini".to_owned(),
            display_name: "Swift Mini".to_owned(),
            tier: ModelTier::Fast,
            max_output_tokens: 4096,
            context_window_tokens: 200_000,
            cost_input_per_1k: 0.000_25,
            cost_output_per_1k: 0.001_25,
            avg_latency_ms: 800,
            strengths: vec!["speed".to_owned(), "cost".to_owned()],
            best_for: vec!["listing".to_owned(), "lookups".to_owned()],
        },
        ModelConfig {
            id: "versa-core".to_owned(),
            display_name: "Versa Core".to_owned(),
            tier: ModelTier::Balanced,
            max_output_tokens: 8192,
            context_window_tokens: 200_000,
            cost_input_per_1k: 0.003,
            cost_output_per_1k: 0.015,
            avg_latency_ms: 2500,
            strengths: vec!["reasoning".to_owned(), "coding".to_owned()],
            best_for: vec!["execution".to_owned(), "verification".to_owned()],
        },
        ModelConfig {
            id: "apex-ultra".to_owned(),
            display_name: "Apex Ultra".to_owned(),
            tier: ModelTier::Powerful,
            max_output_tokens: 16_384,
            context_window_tokens: 200_000,
            cost_input_per_1k: 0.015,
            cost_output_per_1k: 0.075,
            avg_latency_ms: 6000,
            strengths: vec!["planning".to_owned(), "hard reasoning".to_owned()],
            best_for: vec!["strategy".to_owned(), "recovery".to_owned()],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factor_weights_sum_to_one() {
        let router = ModelRouter::default();
        let analysis = router.analyze("list files", &SelectionContext::default());
        let total: f64 = analysis.factors.iter().map(|f| f.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn trivial_task_routes_fast() {
        let mut router = ModelRouter::default();
        let (analysis, config) =
            router.select_for_task("list files in .", &SelectionContext::default());
        assert_eq!(analysis.level, Complexity::Trivial);
        assert_eq!(config.tier, ModelTier::Fast);
    }

    #[test]
    fn heavy_task_routes_higher() {
        let mut router = ModelRouter::default();
        let description = "First analyze the entire repository architecture, then design and \
                           implement a database migration across every service, then test and \
                           deploy the full distributed system, and finally write a security \
                           review of the whole protocol";
        let (analysis, config) = router.select_for_task(description, &SelectionContext::default());
        assert!(analysis.score >= BALANCED_THRESHOLD);
        assert!(config.tier >= ModelTier::Balanced);
    }

    #[test]
    fn escalation_is_monotone_and_counted() {
        let mut router = ModelRouter::default();
        let context = SelectionContext::default();

        let (_, first) = router.select_for_task("list files", &context);
        assert_eq!(first.tier, ModelTier::Fast);

        router.report_failure();
        let (_, second) = router.select_for_task("list files", &context);
        assert!(second.tier >= first.tier);
        assert_eq!(second.tier, ModelTier::Balanced);
        assert_eq!(router.escalate_count(), 1);

        router.report_failure();
        let (_, third) = router.select_for_task("list files", &context);
        assert_eq!(third.tier, ModelTier::Powerful);
        assert_eq!(router.escalate_count(), 2);

        // Saturates at the top tier.
        router.report_failure();
        assert_eq!(router.escalate_count(), 2);
    }

    #[test]
    fn escalation_respects_max_tier() {
        let mut router = ModelRouter::default().max_tier(ModelTier::Balanced);
        router.report_failure();
        router.report_failure();
        let (_, config) = router.select_for_task("list files", &SelectionContext::default());
        assert_eq!(config.tier, ModelTier::Balanced);
    }

    #[test]
    fn exploration_phase_prefers_fast() {
        let mut router = ModelRouter::default();
        let context = SelectionContext {
            phase: Some(PhaseKind::Exploration),
            ..SelectionContext::default()
        };
        let (_, config) = router.select_for_task(
            "investigate the database performance architecture issue",
            &context,
        );
        assert_eq!(config.tier, ModelTier::Fast);
    }

    #[test]
    fn prior_failures_raise_the_analysis() {
        let router = ModelRouter::default();
        let calm = router.analyze("list files", &SelectionContext::default());
        let failed = router.analyze(
            "list files",
            &SelectionContext {
                prior_failures: 2,
                ..SelectionContext::default()
            },
        );
        assert!(failed.score > calm.score);
    }

    #[test]
    fn success_rate_tracks_buckets() {
        let mut router = ModelRouter::default();
        let (_, config) = router.select_for_task("list files", &SelectionContext::default());
        router.report_success(Complexity::Trivial, 500);
        router.report_success(Complexity::Trivial, 700);
        assert_eq!(router.success_rate(&config.id, Complexity::Trivial), Some(1.0));
        assert_eq!(router.success_rate("nope", Complexity::Trivial), None);
    }
}
