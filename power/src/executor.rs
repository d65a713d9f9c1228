//! Re-run a power command inside a dedicated privileged container.
//!
//! A power command invoked from an ordinary system container cannot see
//! the host's processes. It is re-executed in a fresh container that
//! shares the host PID namespace and the invoking container's volumes,
//! and the invoking process only reports the outcome.

use crate::context::PowerContext;
use crate::error::Result;
use container::{ContainerRuntime, CreateSpec, ExitInfo, HostConfig};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of [`PowerExecutor::relaunch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relaunch {
    /// This process must carry out the operation itself
    PerformLocally,
    /// The power container ran to completion
    Relaunched(ExitInfo),
}

/// Runs power commands in the power container.
pub struct PowerExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    marker_env: String,
}

impl PowerExecutor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, marker_env: impl Into<String>) -> Self {
        Self {
            runtime,
            marker_env: marker_env.into(),
        }
    }

    /// Relaunch the command as container `name`, unless `ctx` says the
    /// operation belongs to this process.
    pub async fn relaunch(&self, ctx: &PowerContext, name: &str) -> Result<Relaunch> {
        if ctx.inside_power_container {
            debug!("Running inside the power container");
            return Ok(Relaunch::PerformLocally);
        }
        if ctx.skip_relaunch {
            debug!("Relaunch disabled by environment");
            return Ok(Relaunch::PerformLocally);
        }

        self.remove_stale(name).await?;

        let current_id = ctx.current_container_id()?;
        let current = self.runtime.inspect(&current_id).await?;

        let spec = CreateSpec {
            name: name.to_string(),
            image: current.image.clone(),
            command: ctx.argv.clone(),
            env: vec![format!("{}=true", self.marker_env)],
            host_config: HostConfig {
                pid_mode: "host".to_string(),
                volumes_from: vec![current.id.clone()],
                privileged: true,
            },
        };
        let created = self.runtime.create(&spec).await?;
        info!(
            name = name,
            id = %created.id,
            image = %spec.image,
            "Created power container"
        );

        // Output streaming is best effort and not awaited.
        let runtime = Arc::clone(&self.runtime);
        let attach_id = created.id.clone();
        tokio::spawn(async move {
            if let Err(e) = runtime.attach(&attach_id, true, true).await {
                debug!(id = %attach_id, error = %e, "Attach ended");
            }
        });

        self.runtime.start(&created.id).await?;
        let exit = self.runtime.wait(&created.id).await?;
        info!(name = name, status = exit.status_code, "Power container exited");
        Ok(Relaunch::Relaunched(exit))
    }

    async fn remove_stale(&self, name: &str) -> Result<()> {
        match self.runtime.inspect(name).await {
            Ok(stale) => {
                warn!(name = name, id = %stale.id, "Removing stale power container");
                self.runtime.remove(&stale.id).await?;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => debug!(name = name, error = %e, "Ignoring inspect failure"),
        }
        Ok(())
    }
}
