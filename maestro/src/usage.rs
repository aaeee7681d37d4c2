//! Token and model usage tracking.

use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Token usage statistics from a single model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the input/prompt.
    #[serde(default)]
    pub input_tokens: u32,
    /// Number of tokens in the output/completion.
    #[serde(default)]
    pub output_tokens: u32,
}

impl Usage {
    /// Create a new usage record.
    #[must_use]
    pub const fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Zero usage.
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0, 0)
    }

    /// Total tokens used.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

impl Add for Usage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Per-task model usage accounting, reported in the task result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelUsage {
    /// Number of calls per model id.
    pub calls: BTreeMap<String, u32>,
    /// Number of tier escalations performed during the task.
    pub escalations: u32,
    /// Cumulative token usage across all calls.
    pub tokens: Usage,
}

impl ModelUsage {
    /// Record one completed call against a model.
    pub fn record_call(&mut self, model_id: &str, usage: Usage) {
        *self.calls.entry(model_id.to_owned()).or_insert(0) += 1;
        self.tokens += usage;
    }

    /// Record a tier escalation.
    pub const fn record_escalation(&mut self) {
        self.escalations += 1;
    }

    /// Total number of model calls.
    #[must_use]
    pub fn total_calls(&self) -> u32 {
        self.calls.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_addition() {
        let a = Usage::new(100, 50);
        let b = Usage::new(200, 100);
        let sum = a + b;
        assert_eq!(sum.input_tokens, 300);
        assert_eq!(sum.output_tokens, 150);
        assert_eq!(sum.total(), 450);
    }

    #[test]
    fn model_usage_accounting() {
        let mut usage = ModelUsage::default();
        usage.record_call("swift-1", Usage::new(10, 5));
        usage.record_call("swift-1", Usage::new(10, 5));
        usage.record_call("apex-1", Usage::new(100, 50));
        usage.record_escalation();

        assert_eq!(usage.total_calls(), 3);
        assert_eq!(usage.calls.get("swift-1"), Some(&2));
        assert_eq!(usage.escalations, 1);
        assert_eq!(usage.tokens.total(), 180);
    }
}
