//! Agent runtime: the execution engine for one task.
//!
//! [`AgentRuntime`] wires the planner, monitor, router, transcript and
//! tool registry together (composition, no inheritance) and drives the
//! plan/execute loop. Observers receive [`AgentEvent`]s by value over a
//! channel; nothing holds a reference back into the agent.

pub mod environment;
mod events;
mod result;
mod runner;

pub use events::{AgentEvent, PhaseOutcome};
pub use result::{ErrorPayload, TaskResultPayload};
pub use runner::{AgentRuntime, RuntimeConfig};
