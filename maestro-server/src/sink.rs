//! Notification sinks.
//!
//! Sinks are the outward edge of the orchestrator: every task emits
//! progress and terminal lines through one. The webhook sink forwards
//! to the chat transport; the log sink is the fallback when no
//! transport is configured. Sink failures never reach agents.

use std::time::Duration;

use async_trait::async_trait;
use maestro::manager::{NotificationSink, SinkError, TaskId};
use serde_json::json;
use tracing::info;

/// Sink that writes notification lines to the service log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, task_id: TaskId, message: String) -> Result<(), SinkError> {
        info!(task = %task_id, %message, "task notification");
        Ok(())
    }
}

/// Sink that POSTs notification lines to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    targets: Vec<String>,
}

impl WebhookSink {
    /// Create a webhook sink for the given URL.
    #[must_use]
    pub fn new(url: impl Into<String>, targets: Vec<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
            targets,
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn notify(&self, task_id: TaskId, message: String) -> Result<(), SinkError> {
        let body = json!({
            "task_id": task_id.to_string(),
            "message": message,
            "targets": self.targets,
        });
        let response = self.client.post(&self.url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(format!("webhook returned {}", response.status()).into());
        }
        Ok(())
    }
}

/// Sink that fans one notification out to several sinks. Individual
/// sink failures do not stop the others; the first error is reported.
pub struct FanoutSink {
    sinks: Vec<std::sync::Arc<dyn NotificationSink>>,
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl FanoutSink {
    /// Create a fanout over the given sinks.
    #[must_use]
    pub fn new(sinks: Vec<std::sync::Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl NotificationSink for FanoutSink {
    async fn notify(&self, task_id: TaskId, message: String) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.notify(task_id, message.clone()).await {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_sink_always_succeeds() {
        let sink = LogSink;
        assert!(sink.notify(TaskId::new(), "hello".to_owned()).await.is_ok());
    }

    #[tokio::test]
    async fn webhook_sink_reports_unreachable_hosts() {
        // Nothing listens on this port; the send must fail, not panic.
        let sink = WebhookSink::new("http://127.0.0.1:1/notify", Vec::new());
        assert!(sink.notify(TaskId::new(), "x".to_owned()).await.is_err());
    }
}
