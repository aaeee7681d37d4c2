//! Optional append-only audit trail.
//!
//! When enabled, every notification line and terminal snapshot is
//! appended to `<dir>/<task-id>.jsonl`. The schema is forward
//! compatible: readers must ignore unknown fields. The trail is for
//! inspection only and is never used for recovery.

use std::path::PathBuf;

use async_trait::async_trait;
use maestro::manager::{NotificationSink, SinkError, TaskId, TaskManager};
use serde_json::json;

/// Sink that appends notification lines and terminal task snapshots.
pub struct AuditSink {
    dir: PathBuf,
    manager: TaskManager,
}

impl std::fmt::Debug for AuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditSink").field("dir", &self.dir).finish()
    }
}

impl AuditSink {
    /// Create an audit sink writing under `dir`.
    #[must_use]
    pub const fn new(dir: PathBuf, manager: TaskManager) -> Self {
        Self { dir, manager }
    }

    async fn append(&self, task_id: TaskId, line: &serde_json::Value) -> Result<(), SinkError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{task_id}.jsonl"));
        let mut content = tokio::fs::read_to_string(&path).await.unwrap_or_default();
        content.push_str(&line.to_string());
        content.push('\n');
        tokio::fs::write(&path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for AuditSink {
    async fn notify(&self, task_id: TaskId, message: String) -> Result<(), SinkError> {
        let is_terminal = message.contains("status=");
        self.append(
            task_id,
            &json!({
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "task_id": task_id.to_string(),
                "message": message,
            }),
        )
        .await?;

        // Terminal lines also capture the full task record: status
        // transitions, tool-call counts, result or error.
        if is_terminal {
            if let Ok(task) = self.manager.status(task_id).await {
                self.append(
                    task_id,
                    &json!({
                        "timestamp": chrono::Utc::now().to_rfc3339(),
                        "snapshot": task,
                    }),
                )
                .await?;
            }
        }
        Ok(())
    }
}
