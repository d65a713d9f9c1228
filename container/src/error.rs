//! Error types for the container runtime client.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for container runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the container runtime client.
#[derive(Error, Debug)]
pub enum Error {
    /// Could not connect to the runtime socket
    #[error("Cannot connect to container runtime at {socket}: {source}")]
    Connect {
        socket: PathBuf,
        source: std::io::Error,
    },

    /// The container does not exist
    #[error("No such container: {0}")]
    NotFound(String),

    /// The runtime answered with an error status
    #[error("Container runtime error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The runtime sent something that is not HTTP
    #[error("Malformed response: {0}")]
    Protocol(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error means the container does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
