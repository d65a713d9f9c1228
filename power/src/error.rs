//! Error types for power operations.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for power operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during a power operation.
#[derive(Error, Debug)]
pub enum Error {
    /// Power operations need root
    #[error("{0}: Need to be root")]
    NotRoot(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::Error),

    /// Container runtime error
    #[error("{0}")]
    Runtime(#[from] container::Error),

    /// Mount error
    #[error("{0}")]
    Mount(#[from] mount::Error),

    /// The current container could not be identified
    #[error("Cannot determine current container id from {0}")]
    NoContainerId(PathBuf),

    /// None of the boot partition specifiers resolved
    #[error("No boot device found among {0:?}")]
    NoBootDevice(Vec<String>),

    /// The boot loader fragment names no kernel
    #[error("Invalid boot entry {path}: {reason}")]
    BootEntry { path: PathBuf, reason: String },

    /// An external command failed
    #[error("Command {command:?} failed: {reason}")]
    Command { command: String, reason: String },

    /// Some system containers did not stop cleanly
    #[error(transparent)]
    Shutdown(#[from] ShutdownFailures),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Nix error
    #[error("System error: {0}")]
    Nix(#[from] nix::Error),
}

/// Per-container failures collected while stopping system containers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownFailures {
    /// `(container id, error)` of failed stop calls
    pub stop: Vec<(String, String)>,
    /// `(container id, error)` of failed wait calls
    pub wait: Vec<(String, String)>,
}

impl ShutdownFailures {
    pub fn is_empty(&self) -> bool {
        self.stop.is_empty() && self.wait.is_empty()
    }
}

fn join_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(id, err)| format!(" [{id}] {err}"))
        .collect::<Vec<_>>()
        .join(",")
}

impl fmt::Display for ShutdownFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error while stopping \n1. STOP Errors [{}] \n2. WAIT Errors [{}]",
            join_failures(&self.stop),
            join_failures(&self.wait)
        )
    }
}

impl std::error::Error for ShutdownFailures {}
