//! Scripted mock provider for testing.
//!
//! Returns queued responses in order and records every request it
//! receives, so tests can assert on transcripts and tool catalogs
//! without a network.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::message::Block;
use crate::provider::{ModelProvider, ModelRequest, ModelResponse, StopReason};
use crate::usage::Usage;

/// One scripted step: a response or an error.
#[derive(Debug)]
pub enum Scripted {
    /// Return this response.
    Respond(ModelResponse),
    /// Fail with this error.
    Fail(Error),
}

/// A provider that replays a script.
#[derive(Debug, Default)]
pub struct MockProvider {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl MockProvider {
    /// Create an empty mock; exhaustion yields a fatal model error.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a plain text end-turn response.
    #[must_use]
    pub fn text(self, text: impl Into<String>) -> Self {
        self.push(Scripted::Respond(ModelResponse {
            blocks: vec![Block::text(text)],
            stop_reason: StopReason::EndTurn,
            usage: Usage::new(50, 20),
        }));
        self
    }

    /// Queue a response requesting a single tool use.
    #[must_use]
    pub fn tool_use(
        self,
        id: impl Into<String>,
        name: impl Into<String>,
        input: Value,
    ) -> Self {
        self.push(Scripted::Respond(ModelResponse {
            blocks: vec![Block::tool_use(id, name, input)],
            stop_reason: StopReason::ToolUse,
            usage: Usage::new(80, 30),
        }));
        self
    }

    /// Queue a full response.
    #[must_use]
    pub fn respond(self, response: ModelResponse) -> Self {
        self.push(Scripted::Respond(response));
        self
    }

    /// Queue an error.
    #[must_use]
    pub fn fail(self, error: Error) -> Self {
        self.push(Scripted::Fail(error));
        self
    }

    fn push(&self, step: Scripted) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(step);
        }
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Number of scripted steps not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let step = self
            .script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front());
        match step {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail(error)) => Err(error),
            None => Err(Error::model_fatal("mock script exhausted")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Entry;

    #[tokio::test]
    async fn replays_script_in_order() {
        let provider = MockProvider::new()
            .text("first")
            .fail(Error::model_transient("rate limited"))
            .text("second");

        let request = ModelRequest::new("m", vec![Entry::user("hi")]);
        assert_eq!(provider.complete(&request).await.expect("first").text(), "first");
        assert!(provider.complete(&request).await.is_err());
        assert_eq!(
            provider.complete(&request).await.expect("second").text(),
            "second"
        );
        assert!(provider.complete(&request).await.is_err());
        assert_eq!(provider.requests().len(), 4);
    }
}
