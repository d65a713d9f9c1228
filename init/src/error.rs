//! Error types for the boot pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for boot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can abort the boot.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be loaded or persisted
    #[error("Configuration error: {0}")]
    Config(#[from] config::Error),

    /// Device resolution or mount failure
    #[error("{0}")]
    Mount(#[from] mount::Error),

    /// A special filesystem could not be mounted
    #[error("Mount error: {source_path} -> {target}: {source}")]
    MountFs {
        source_path: String,
        target: PathBuf,
        source: nix::Error,
    },

    /// An external command failed
    #[error("Command {command:?} failed: {reason}")]
    Command { command: String, reason: String },

    /// The root switch could not be completed
    #[error("Switch root to {new_root} failed: {reason}")]
    SwitchRoot { new_root: PathBuf, reason: String },

    /// The system runtime could not be started
    #[error("Failed to launch system runtime {binary}: {reason}")]
    Launch { binary: PathBuf, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Nix error
    #[error("System error: {0}")]
    Nix(#[from] nix::Error),
}
