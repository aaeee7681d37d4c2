//! HTTP model provider speaking the messages wire contract.
//!
//! Sends `{model, max_tokens, tools, messages}` and reads back
//! `{content, stop_reason, usage}`. Provider failures are mapped onto
//! the engine taxonomy: rate limits, 5xx and transport timeouts are
//! retryable; prompt-too-long rejections become context overflows so
//! the runtime truncates instead of escalating.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::{Block, Entry};
use crate::provider::{ModelProvider, ModelRequest, ModelResponse, StopReason};
use crate::usage::Usage;

/// Default per-call timeout; model calls run low minutes at most.
const CALL_TIMEOUT: Duration = Duration::from_secs(180);

/// A messages-API client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_key_header: String,
}

impl HttpProvider {
    /// Create a provider for the given endpoint.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            api_key_header: "x-api-key".to_owned(),
        }
    }

    /// Override the API key header name.
    #[must_use]
    pub fn api_key_header(mut self, header: impl Into<String>) -> Self {
        self.api_key_header = header.into();
        self
    }

    fn build_body(request: &ModelRequest) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|entry| {
                json!({
                    "role": entry.role.as_str(),
                    "content": entry.blocks,
                })
            })
            .collect();

        let mut body = json!({
            "model": request.model_id,
            "max_tokens": request.max_output_tokens,
            "messages": messages,
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        body
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    content: Vec<Block>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Usage,
}

fn classify_status(status: u16, body: &str) -> Error {
    let lowered = body.to_lowercase();
    if status == 400 && (lowered.contains("too long") || lowered.contains("token")) {
        // Budget estimation undershot; the caller retries after an
        // aggressive truncation pass.
        return Error::ContextOverflow { budget: 0 };
    }
    if status == 429 || status >= 500 {
        return Error::model_transient(format!("provider returned {status}: {body}"));
    }
    Error::model_fatal(format!("provider returned {status}: {body}"))
}

#[async_trait]
impl ModelProvider for HttpProvider {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse> {
        let body = Self::build_body(request);
        debug!(model = %request.model_id, messages = request.messages.len(), "model call");

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header(&self.api_key_header, &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    Error::model_transient(format!("transport error: {e}"))
                } else {
                    Error::model_fatal(format!("transport error: {e}"))
                }
            })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| Error::model_transient(format!("body read failed: {e}")))?;

        if !(200..300).contains(&status) {
            return Err(classify_status(status, &text));
        }

        let wire: WireResponse = serde_json::from_str(&text)
            .map_err(|e| Error::model_fatal(format!("malformed provider response: {e}")))?;

        let stop_reason = match wire.stop_reason.as_deref() {
            Some("end_turn") => StopReason::EndTurn,
            Some("tool_use") => StopReason::ToolUse,
            _ => StopReason::Other,
        };

        Ok(ModelResponse {
            blocks: wire.content,
            stop_reason,
            usage: wire.usage,
        })
    }
}

/// Validate that entries alternate user/assistant, a precondition of
/// the wire contract. Exposed for callers that assemble transcripts by
/// hand.
pub fn check_alternation(entries: &[Entry]) -> Result<()> {
    for window in entries.windows(2) {
        if window[0].role == window[1].role {
            return Err(Error::invariant(format!(
                "consecutive {} entries in model request",
                window[0].role.as_str()
            )));
        }
    }
    Ok(())
}
