//! Shell command execution tool.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::traits::{Tool, ToolFailure};

/// Ceiling on the per-call timeout a model may request.
const MAX_TIMEOUT_SECS: u64 = 300;

/// Cap on each captured stream before the registry-level cap applies.
const STREAM_CAP_BYTES: usize = 48 * 1024;

/// Arguments for the shell tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ShellArgs {
    /// The command line to run through the shell.
    pub command: String,
    /// Working directory; defaults to the tool's configured directory.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Extra environment variables for the child process.
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    /// Timeout in seconds; clamped to the tool's ceiling.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Captured result of a shell command.
#[derive(Debug, Clone, Serialize)]
pub struct ShellOutput {
    /// Process exit code, `-1` when terminated by signal.
    pub exit_code: i32,
    /// Captured standard output, byte-capped.
    pub stdout: String,
    /// Captured standard error, byte-capped.
    pub stderr: String,
}

/// Executes a shell command with a bounded runtime and capped capture.
#[derive(Debug, Clone)]
pub struct ShellTool {
    working_dir: PathBuf,
    default_timeout: Duration,
}

impl ShellTool {
    /// Create a shell tool rooted at the given working directory.
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            default_timeout: Duration::from_secs(30),
        }
    }

    /// Set the default per-command timeout.
    #[must_use]
    pub const fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

fn cap_stream(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= STREAM_CAP_BYTES {
        return text.into_owned();
    }
    let mut cut = STREAM_CAP_BYTES;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n[stream truncated]", &text[..cut])
}

impl Tool for ShellTool {
    const NAME: &'static str = "shell";
    type Args = ShellArgs;
    type Output = ShellOutput;

    fn description(&self) -> String {
        "Run a shell command. Returns exit code, stdout and stderr. \
         Output is byte-capped and long-running commands are killed at the timeout."
            .to_owned()
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, ToolFailure> {
        let dir = args
            .working_dir
            .map_or_else(|| self.working_dir.clone(), PathBuf::from);
        let timeout = Duration::from_secs(
            args.timeout_secs
                .unwrap_or(self.default_timeout.as_secs())
                .min(MAX_TIMEOUT_SECS),
        );

        debug!(command = %args.command, dir = %dir.display(), "running shell command");

        let mut command = tokio::process::Command::new("sh");
        command
            .arg("-c")
            .arg(&args.command)
            .current_dir(&dir)
            .kill_on_drop(true);
        if let Some(env) = &args.env {
            command.envs(env);
        }

        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ToolFailure::execution(
                    format!("failed to spawn command: {e}"),
                    false,
                ));
            }
            Err(_) => return Err(ToolFailure::timeout(timeout.as_secs())),
        };

        Ok(ShellOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: cap_stream(&output.stdout),
            stderr: cap_stream(&output.stderr),
        })
    }

    fn insights(&self, output: &Self::Output) -> Vec<String> {
        if output.exit_code == 0 {
            Vec::new()
        } else {
            vec![format!("command exited with code {}", output.exit_code)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::traits::ToolDyn;

    #[tokio::test]
    async fn runs_a_command() {
        let tool = ShellTool::new(".");
        let output = tool
            .call(ShellArgs {
                command: "echo hello".to_owned(),
                working_dir: None,
                env: None,
                timeout_secs: None,
            })
            .await
            .expect("echo should succeed");
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_produces_insight() {
        let tool = ShellTool::new(".");
        let output = tool
            .call(ShellArgs {
                command: "exit 3".to_owned(),
                working_dir: None,
                env: None,
                timeout_secs: None,
            })
            .await
            .expect("exit 3 still yields output");
        assert_eq!(output.exit_code, 3);
        assert_eq!(tool.insights(&output).len(), 1);
    }

    #[tokio::test]
    async fn env_overrides_reach_the_child() {
        let tool = ShellTool::new(".");
        let mut env = HashMap::new();
        env.insert("MAESTRO_TEST_VAR".to_owned(), "42".to_owned());
        let output = tool
            .call(ShellArgs {
                command: "echo $MAESTRO_TEST_VAR".to_owned(),
                working_dir: None,
                env: Some(env),
                timeout_secs: None,
            })
            .await
            .expect("echo should succeed");
        assert_eq!(output.stdout.trim(), "42");
    }

    #[test]
    fn descriptor_schema_lists_command() {
        let descriptor = ToolDyn::descriptor(&ShellTool::new("."));
        let props = descriptor.parameters.get("properties").expect("properties");
        assert!(props.get("command").is_some());
    }
}
