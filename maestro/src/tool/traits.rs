//! Core tool traits.
//!
//! A [`Tool`] is a typed handler: arguments deserialize from the model's
//! JSON, outputs serialize back to it, and the parameter schema is
//! derived from the argument type. [`ToolDyn`] is the object-safe
//! wrapper the registry stores; it performs serde-based argument
//! validation so a schema mismatch surfaces as a structured
//! [`ToolFailure`] instead of a panic or a typed error the model cannot
//! see.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Provider-facing tool descriptor.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,
    /// Human/model-readable description.
    pub description: String,
    /// JSON-Schema object describing the parameters.
    pub parameters: Value,
}

/// Classification of a tool invocation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Arguments did not match the parameter schema.
    Validation,
    /// No tool with the requested name is registered.
    NotFound,
    /// The handler itself failed.
    Execution,
    /// The per-tool timeout elapsed.
    Timeout,
}

impl FailureKind {
    /// String form used in tool-result payloads.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Execution => "execution",
            Self::Timeout => "timeout",
        }
    }
}

/// A structured tool failure, returned in-band to the model.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct ToolFailure {
    /// Failure classification.
    pub kind: FailureKind,
    /// Human-readable message.
    pub message: String,
    /// Whether retrying the same call may succeed.
    pub retryable: bool,
}

impl ToolFailure {
    /// Create a validation failure (never retryable as-is).
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Validation,
            message: message.into(),
            retryable: false,
        }
    }

    /// Create a not-found failure.
    #[must_use]
    pub fn not_found(name: &str) -> Self {
        Self {
            kind: FailureKind::NotFound,
            message: format!("tool '{name}' is not registered"),
            retryable: false,
        }
    }

    /// Create an execution failure.
    #[must_use]
    pub fn execution(message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind: FailureKind::Execution,
            message: message.into(),
            retryable,
        }
    }

    /// Create a timeout failure.
    #[must_use]
    pub fn timeout(secs: u64) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: format!("tool call exceeded the {secs}s timeout"),
            retryable: true,
        }
    }
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)
    }
}

/// Successful tool output plus optional insights.
///
/// Insights are short facts the runtime feeds into progress tracking and
/// context summaries ("wrote 3 files", "branch is main").
#[derive(Debug, Clone, Default, Serialize, serde::Deserialize)]
pub struct ToolOutput {
    /// Captured output, serialized for the model.
    pub content: String,
    /// Short discovered facts, possibly empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insights: Vec<String>,
}

/// Trait that represents a typed LLM tool.
pub trait Tool: Send + Sync + 'static {
    /// The unique name of the tool.
    const NAME: &'static str;

    /// The argument type, deserialized from the model's JSON input.
    type Args: DeserializeOwned + JsonSchema + Send;
    /// The output type, serialized back to the model.
    type Output: Serialize;

    /// Description offered to the model.
    fn description(&self) -> String;

    /// JSON-Schema for the parameters, derived from [`Self::Args`].
    fn parameters_schema(&self) -> Value {
        serde_json::to_value(schemars::schema_for!(Self::Args)).unwrap_or_else(|_| {
            serde_json::json!({"type": "object"})
        })
    }

    /// Execute the tool.
    fn call(
        &self,
        args: Self::Args,
    ) -> impl Future<Output = Result<Self::Output, ToolFailure>> + Send;

    /// Insights derived from a successful call. Default: none.
    fn insights(&self, _output: &Self::Output) -> Vec<String> {
        Vec::new()
    }
}

/// Boxed future used by the dynamic tool interface.
pub type BoxToolFuture<'a> = Pin<Box<dyn Future<Output = Result<ToolOutput, ToolFailure>> + Send + 'a>>;

/// Object-safe wrapper over [`Tool`] for registry storage.
pub trait ToolDyn: Send + Sync {
    /// The tool name.
    fn name(&self) -> &'static str;

    /// The provider-facing descriptor.
    fn descriptor(&self) -> ToolDescriptor;

    /// Validate the raw input and execute the tool.
    fn call_value(&self, input: Value) -> BoxToolFuture<'_>;
}

impl<T: Tool> ToolDyn for T {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: Self::NAME.to_owned(),
            description: self.description(),
            parameters: self.parameters_schema(),
        }
    }

    fn call_value(&self, input: Value) -> BoxToolFuture<'_> {
        Box::pin(async move {
            let args: T::Args = serde_json::from_value(input)
                .map_err(|e| ToolFailure::validation(format!("invalid arguments: {e}")))?;
            match self.call(args).await {
                Ok(value) => {
                    let insights = self.insights(&value);
                    let content = render_output(&value)?;
                    Ok(ToolOutput { content, insights })
                }
                Err(failure) => Err(failure),
            }
        })
    }
}

// Serialize the typed output for the model: strings pass through bare,
// everything else as compact JSON.
fn render_output<O: Serialize>(value: &O) -> Result<String, ToolFailure> {
    let json = serde_json::to_value(value)
        .map_err(|e| ToolFailure::execution(format!("unserializable output: {e}"), false))?;
    Ok(match json {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[derive(Debug, Clone, Copy, Default)]
    struct Adder;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct AddArgs {
        x: i64,
        y: i64,
    }

    impl Tool for Adder {
        const NAME: &'static str = "add";
        type Args = AddArgs;
        type Output = i64;

        fn description(&self) -> String {
            "Add x and y together.".to_owned()
        }

        async fn call(&self, args: Self::Args) -> Result<Self::Output, ToolFailure> {
            Ok(args.x + args.y)
        }
    }

    #[test]
    fn descriptor_carries_derived_schema() {
        let descriptor = ToolDyn::descriptor(&Adder);
        assert_eq!(descriptor.name, "add");
        assert!(descriptor.parameters.is_object());
        let props = descriptor.parameters.get("properties").expect("properties");
        assert!(props.get("x").is_some());
        assert!(props.get("y").is_some());
    }

    #[tokio::test]
    async fn call_value_validates_and_executes() {
        let ok = Adder
            .call_value(serde_json::json!({"x": 2, "y": 40}))
            .await
            .expect("call should succeed");
        assert_eq!(ok.content, "42");

        let err = Adder
            .call_value(serde_json::json!({"x": "two"}))
            .await
            .expect_err("bad args should fail validation");
        assert_eq!(err.kind, FailureKind::Validation);
        assert!(!err.retryable);
    }
}
