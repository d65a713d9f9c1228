//! quay reboot, poweroff, halt and shutdown.
//!
//! A power command issued from a system container is first relaunched
//! in a privileged sibling container, so that stopping the invoking
//! container does not kill the command halfway. The relaunched command
//! stops every other system container, then syncs and reboots the host
//! (or warm reboots with kexec).

pub mod context;
pub mod error;
pub mod executor;
pub mod kexec;
pub mod machine;
pub mod request;
pub mod shutdown;

pub use context::PowerContext;
pub use error::{Error, Result, ShutdownFailures};
pub use executor::{PowerExecutor, Relaunch};
pub use kexec::{BootEntry, Kexec};
pub use machine::{LinuxMachine, Machine};
pub use request::{KexecRequest, PowerAction, PowerOperationRequest};
pub use shutdown::ShutdownCoordinator;

use config::{ConfigLoader, PowerConfig};
use container::{ContainerRuntime, DockerClient, ExitInfo};
use mount::{LinuxMounter, Mounter};
use std::sync::Arc;
use tracing::{error, info};

/// How a power operation ended without the machine going down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerOutcome {
    /// The power container carried out the operation; this process
    /// should exit
    Relaunched(ExitInfo),
    /// The reboot syscall was issued locally
    Completed,
}

/// Carries out power requests.
pub struct PowerManager {
    config: PowerConfig,
    runtime: Arc<dyn ContainerRuntime>,
    mounter: Box<dyn Mounter>,
    machine: Box<dyn Machine>,
}

impl PowerManager {
    pub fn new(
        config: PowerConfig,
        runtime: Arc<dyn ContainerRuntime>,
        mounter: Box<dyn Mounter>,
        machine: Box<dyn Machine>,
    ) -> Self {
        Self {
            config,
            runtime,
            mounter,
            machine,
        }
    }

    /// Manager for the running system.
    pub fn system(config: PowerConfig) -> Self {
        let runtime = Arc::new(DockerClient::new(config.socket.clone()));
        Self::new(config, runtime, Box::new(LinuxMounter::new()), Box::new(LinuxMachine::new()))
    }

    /// Relaunch, stop containers, then reboot.
    ///
    /// Forced requests skip both the relaunch and the container shutdown.
    /// A failed kexec falls back to a plain reboot.
    pub async fn perform(&self, ctx: &PowerContext, request: &PowerOperationRequest) -> Result<PowerOutcome> {
        if !self.machine.is_root() {
            let arg0 = ctx.argv.first().cloned().unwrap_or_else(|| ctx.program.clone());
            return Err(Error::NotRoot(arg0));
        }

        if !request.force {
            let name = if request.is_kexec() {
                ctx.program.as_str()
            } else {
                request.action.name()
            };
            let executor = PowerExecutor::new(Arc::clone(&self.runtime), self.config.marker_env.clone());
            if let Relaunch::Relaunched(exit) = executor.relaunch(ctx, name).await? {
                return Ok(PowerOutcome::Relaunched(exit));
            }
        }

        if let PowerAction::Kexec(kexec) = &request.action {
            let result = Kexec::new(
                self.mounter.as_ref(),
                self.machine.as_ref(),
                &self.config.boot_devices,
                &self.config.boot_mount,
            )
            .run(kexec);
            match result {
                Ok(()) => return Ok(PowerOutcome::Completed),
                Err(e) => error!(error = %e, "Can't kexec, rebooting instead"),
            }
        }

        if !request.force {
            // The stop pass must never include this container.
            match ctx.current_container_id() {
                Ok(id) => {
                    let coordinator = ShutdownCoordinator::new(Arc::clone(&self.runtime));
                    if let Err(e) = coordinator
                        .shutdown_all(Some(&id), request.timeout_secs, request.force)
                        .await
                    {
                        error!("{e}");
                    }
                }
                Err(e) => error!(error = %e, "Current container unknown, not stopping containers"),
            }
        }

        info!(action = request.action.name(), "Syncing filesystems");
        self.machine.sync();
        self.machine.reboot(request.action.reboot_mode())?;
        Ok(PowerOutcome::Completed)
    }
}

/// Entry point of the power commands. `command` is the action name,
/// `argv` the full argument vector.
pub async fn main_power(command: &str, argv: Vec<String>) -> Result<PowerOutcome> {
    let config = ConfigLoader::system().load_power()?;
    let ctx = PowerContext::from_env(argv, &config);
    let request = PowerOperationRequest::parse(command, ctx.args(), u64::from(config.timeout_secs));
    info!(
        action = request.action.name(),
        force = request.force,
        timeout_secs = request.timeout_secs,
        "Power request"
    );
    PowerManager::system(config).perform(&ctx, &request).await
}
