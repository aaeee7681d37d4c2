//! Concrete model provider backends.

mod http;
mod mock;

pub use http::{HttpProvider, check_alternation};
pub use mock::{MockProvider, Scripted};
