//! Client for the system container runtime.
//!
//! The [`ContainerRuntime`] trait is the seam used by the power
//! commands; [`DockerClient`] implements it against the Engine API
//! served on the system runtime socket.

pub mod client;
pub mod error;
mod http;
pub mod types;

pub use client::DockerClient;
pub use error::{Error, Result};
pub use http::{next_frame, StreamKind};
pub use types::{ContainerHandle, CreateSpec, ExitInfo, HostConfig, ListFilter};

use async_trait::async_trait;

/// Operations on the container runtime.
///
/// Calls are independent requests; implementations keep no retry or
/// background state. `attach` may run concurrently with the others.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Look up a container by id or name.
    async fn inspect(&self, id: &str) -> Result<ContainerHandle>;

    /// Create a container without starting it.
    async fn create(&self, spec: &CreateSpec) -> Result<ContainerHandle>;

    /// Start a created container.
    async fn start(&self, id: &str) -> Result<()>;

    /// Stream the container's output to this process until it closes.
    async fn attach(&self, id: &str, stdout: bool, stderr: bool) -> Result<()>;

    /// Stop a container, killing it after `timeout_secs`.
    async fn stop(&self, id: &str, timeout_secs: u64) -> Result<()>;

    /// Block until the container exits.
    async fn wait(&self, id: &str) -> Result<ExitInfo>;

    /// Remove a stopped container.
    async fn remove(&self, id: &str) -> Result<()>;

    /// List containers matching `filter`.
    async fn list(&self, filter: &ListFilter) -> Result<Vec<ContainerHandle>>;
}
