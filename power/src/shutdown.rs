//! Graceful stop of all running system containers.

use crate::error::{Error, Result, ShutdownFailures};
use container::{ContainerRuntime, ListFilter};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stops system containers before the machine goes down.
pub struct ShutdownCoordinator {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ShutdownCoordinator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Stop every running container except `exclude`, then wait for each.
    ///
    /// All stops are issued before any wait so the grace periods overlap.
    /// Failures are collected per container and reported together.
    pub async fn shutdown_all(&self, exclude: Option<&str>, timeout_secs: u64, force: bool) -> Result<()> {
        if force {
            debug!("Forced, not stopping containers");
            return Ok(());
        }

        let containers = self.runtime.list(&ListFilter::running()).await?;
        let targets: Vec<String> = containers
            .into_iter()
            .map(|c| c.id)
            .filter(|id| Some(id.as_str()) != exclude)
            .collect();
        info!(count = targets.len(), timeout_secs = timeout_secs, "Stopping containers");

        let mut failures = ShutdownFailures::default();
        for id in &targets {
            debug!(id = %id, "Stopping container");
            if let Err(e) = self.runtime.stop(id, timeout_secs).await {
                warn!(id = %id, error = %e, "Failed to stop container");
                failures.stop.push((id.clone(), e.to_string()));
            }
        }
        for id in &targets {
            if let Err(e) = self.runtime.wait(id).await {
                warn!(id = %id, error = %e, "Failed to wait for container");
                failures.wait.push((id.clone(), e.to_string()));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Shutdown(failures))
        }
    }
}
