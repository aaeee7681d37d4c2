//! Error types for the orchestrator service.

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// The main error type for the service shell.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration could not be loaded or validated.
    #[error("configuration error: {0}")]
    Config(String),

    /// Another instance already holds the process lock.
    #[error("another instance is running (pid {0})")]
    LockHeld(u32),

    /// The API port could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested listen address.
        addr: String,
        /// Underlying bind error.
        source: std::io::Error,
    },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine error.
    #[error(transparent)]
    Engine(#[from] maestro::Error),
}

impl ServerError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
