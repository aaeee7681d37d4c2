//! Transcript entry types for agent-model communication.
//!
//! The engine speaks the messages-with-content-blocks convention: an
//! ordered, alternating sequence of user/assistant entries where
//! assistant entries may carry `tool_use` blocks and user entries carry
//! the matching `tool_result` blocks. The pairing invariant (every
//! `tool_use` answered by a `tool_result` with the same id in the next
//! user entry) is enforced by [`crate::context::Transcript`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User-side entry (task framing, tool results, summaries).
    User,
    /// Model-side entry (text, tool uses).
    Assistant,
}

impl Role {
    /// Get the string representation of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single content block inside an entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// A model-initiated tool invocation.
    ToolUse {
        /// Correlation id, unique within the transcript.
        id: String,
        /// Name of the tool to invoke.
        name: String,
        /// Tool arguments as a JSON object.
        input: Value,
    },
    /// The invoker's reply to a `tool_use` block.
    ToolResult {
        /// Correlation id of the originating `tool_use`.
        tool_use_id: String,
        /// Captured output (possibly truncated and redacted).
        content: String,
        /// Whether the invocation failed.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl Block {
    /// Create a text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a tool-use block.
    #[must_use]
    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// Create a tool-result block.
    #[must_use]
    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Create an error tool-result block.
    #[must_use]
    pub fn tool_error(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: true,
        }
    }

    /// Get the text if this is a text block.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Approximate serialized size of the block in bytes.
    ///
    /// Used by the token estimator; exact sizes are not required.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        match self {
            Self::Text { text } => text.len(),
            Self::ToolUse { id, name, input } => {
                id.len() + name.len() + input.to_string().len() + 32
            }
            Self::ToolResult {
                tool_use_id,
                content,
                ..
            } => tool_use_id.len() + content.len() + 32,
        }
    }
}

/// A transcript entry: one user or assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Role of the entry.
    pub role: Role,
    /// Ordered content blocks.
    pub blocks: Vec<Block>,
}

impl Entry {
    /// Create a user entry with a single text block.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            blocks: vec![Block::text(text)],
        }
    }

    /// Create an assistant entry with a single text block.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            blocks: vec![Block::text(text)],
        }
    }

    /// Create an entry from blocks.
    #[must_use]
    pub const fn with_blocks(role: Role, blocks: Vec<Block>) -> Self {
        Self { role, blocks }
    }

    /// Create a user entry carrying tool results.
    #[must_use]
    pub const fn tool_results(blocks: Vec<Block>) -> Self {
        Self {
            role: Role::User,
            blocks,
        }
    }

    /// Concatenated text content of the entry.
    #[must_use]
    pub fn text_content(&self) -> String {
        self.blocks
            .iter()
            .filter_map(Block::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Ids of all `tool_use` blocks in this entry, in order.
    #[must_use]
    pub fn tool_use_ids(&self) -> Vec<&str> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::ToolUse { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Ids of all `tool_result` blocks in this entry, in order.
    #[must_use]
    pub fn tool_result_ids(&self) -> Vec<&str> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Whether the entry carries at least one `tool_use` block.
    #[must_use]
    pub fn has_tool_use(&self) -> bool {
        self.blocks
            .iter()
            .any(|b| matches!(b, Block::ToolUse { .. }))
    }

    /// Approximate serialized size of the entry in bytes.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        16 + self.blocks.iter().map(Block::approx_bytes).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entry_constructors() {
        let user = Entry::user("hello");
        assert_eq!(user.role, Role::User);
        assert_eq!(user.text_content(), "hello");

        let assistant = Entry::assistant("hi");
        assert_eq!(assistant.role, Role::Assistant);
        assert!(!assistant.has_tool_use());
    }

    #[test]
    fn tool_use_and_result_ids() {
        let assistant = Entry::with_blocks(
            Role::Assistant,
            vec![
                Block::text("let me check"),
                Block::tool_use("tu_1", "shell", json!({"command": "ls"})),
                Block::tool_use("tu_2", "fs_read", json!({"path": "a.txt"})),
            ],
        );
        assert!(assistant.has_tool_use());
        assert_eq!(assistant.tool_use_ids(), vec!["tu_1", "tu_2"]);

        let results = Entry::tool_results(vec![
            Block::tool_result("tu_1", "a.txt"),
            Block::tool_error("tu_2", "no such file"),
        ]);
        assert_eq!(results.tool_result_ids(), vec!["tu_1", "tu_2"]);
    }

    #[test]
    fn serde_round_trip_preserves_block_tags() {
        let entry = Entry::with_blocks(
            Role::Assistant,
            vec![Block::tool_use("tu_9", "shell", json!({"command": "pwd"}))],
        );
        let raw = serde_json::to_string(&entry).expect("serialize");
        assert!(raw.contains("\"tool_use\""));
        let back: Entry = serde_json::from_str(&raw).expect("deserialize");
        assert_eq!(back.tool_use_ids(), vec!["tu_9"]);
    }

    #[test]
    fn approx_bytes_scales_with_content() {
        let small = Entry::user("x");
        let large = Entry::user("x".repeat(4000));
        assert!(large.approx_bytes() > small.approx_bytes() + 3000);
    }
}
