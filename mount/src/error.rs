//! Error types for device resolution and mounting.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for mount operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving or mounting devices.
#[derive(Error, Debug)]
pub enum Error {
    /// No block device matches the specifier
    #[error("Could not resolve device {0:?}")]
    DeviceNotFound(String),

    /// Filesystem type could not be determined
    #[error("Could not probe filesystem type of {device}: {reason}")]
    Probe { device: PathBuf, reason: String },

    /// The mount syscall failed
    #[error("Mount error: {device} -> {target}: {source}")]
    Mount {
        device: PathBuf,
        target: PathBuf,
        source: nix::Error,
    },

    /// The unmount syscall failed
    #[error("Unmount error: {target}: {source}")]
    Unmount { target: PathBuf, source: nix::Error },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Nix error
    #[error("System error: {0}")]
    Nix(#[from] nix::Error),
}
