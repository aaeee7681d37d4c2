//! Model provider abstraction.
//!
//! The engine requires a provider that accepts a model id, a tool
//! catalog, and an alternating user/assistant transcript, and returns a
//! stop reason plus content blocks. Concrete backends live in
//! [`crate::providers`]; the three tiers are identified by opaque model
//! id strings supplied via configuration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::message::{Block, Entry, Role};
use crate::tool::ToolDescriptor;
use crate::usage::Usage;

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model finished its turn naturally.
    EndTurn,
    /// The model stopped to invoke one or more tools.
    ToolUse,
    /// Any other stop condition (length cap, stop sequence).
    Other,
}

/// A completion request to a model provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Opaque model identifier.
    pub model_id: String,
    /// Maximum tokens the model may generate.
    pub max_output_tokens: u32,
    /// System prompt, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Tool catalog offered to the model.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDescriptor>,
    /// Alternating user/assistant transcript.
    pub messages: Vec<Entry>,
}

impl ModelRequest {
    /// Create a request with the given model and transcript.
    #[must_use]
    pub fn new(model_id: impl Into<String>, messages: Vec<Entry>) -> Self {
        Self {
            model_id: model_id.into(),
            max_output_tokens: 4096,
            system: None,
            tools: Vec::new(),
            messages,
        }
    }

    /// Set the max output tokens.
    #[must_use]
    pub const fn max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens;
        self
    }

    /// Set the system prompt.
    #[must_use]
    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the tool catalog.
    #[must_use]
    pub fn tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }
}

/// A single tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseRequest {
    /// Correlation id of the `tool_use` block.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Tool arguments.
    pub input: Value,
}

/// A completion response from a model provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Content blocks produced by the model.
    pub blocks: Vec<Block>,
    /// Why generation stopped.
    pub stop_reason: StopReason,
    /// Token usage for this call.
    #[serde(default)]
    pub usage: Usage,
}

impl ModelResponse {
    /// Concatenated text content of the response.
    #[must_use]
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(Block::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Tool invocations requested by the response, in order.
    #[must_use]
    pub fn tool_uses(&self) -> Vec<ToolUseRequest> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::ToolUse { id, name, input } => Some(ToolUseRequest {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Convert the response into an assistant transcript entry.
    #[must_use]
    pub fn into_entry(self) -> Entry {
        Entry::with_blocks(Role::Assistant, self.blocks)
    }
}

/// Core trait for model backends.
///
/// Implementations must map provider-side failures onto the engine's
/// error taxonomy: rate limits, 5xx and timeouts become retryable
/// [`Error::Model`](crate::Error::Model) values, and prompt-too-long
/// rejections become [`Error::ContextOverflow`](crate::Error::ContextOverflow)
/// so the runtime knows to truncate rather than escalate.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Execute one completion call.
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse>;
}
