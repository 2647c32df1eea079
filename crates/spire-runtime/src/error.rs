//! Runtime error types.

use spire_core::ContainerError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while bootstrapping or serving.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A built-in or user provider could not be bound or resolved.
    #[error("Service container error: {0}")]
    Container(#[from] ContainerError),

    /// The listener could not be bound.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The server failed while running.
    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
