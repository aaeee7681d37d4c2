//! Tool registry, invoker and built-in tools.
//!
//! The registry ([`ToolRegistry`]) is the catalog of callable tools and
//! the only way the runtime executes them. Typed tools implement
//! [`Tool`]; the registry wraps every call with a timeout, an output
//! byte cap and secret redaction, and returns failures in-band as
//! [`ToolFailure`] values.

mod fs;
mod http;
mod registry;
mod shell;
mod traits;

pub use fs::{DirEntryInfo, FsListTool, FsReadTool, FsWriteTool, PathArgs, WriteArgs};
pub use http::{HttpArgs, HttpTool, HttpToolOutput};
pub use registry::{Invocation, InvokerConfig, RedactionRules, ToolRegistry};
pub use shell::{ShellArgs, ShellOutput, ShellTool};
pub use traits::{
    BoxToolFuture, FailureKind, Tool, ToolDescriptor, ToolDyn, ToolFailure, ToolOutput,
};
