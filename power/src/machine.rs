//! Privileged host operations used by the power commands.

use crate::error::{Error, Result};
use nix::sys::reboot::{reboot, RebootMode};
use nix::unistd::geteuid;
use std::path::Path;
use std::process::Command;
use tracing::info;

/// The host machine.
pub trait Machine: Send + Sync {
    /// Whether the effective user is root.
    fn is_root(&self) -> bool;

    /// Flush filesystem buffers.
    fn sync(&self);

    /// Reboot, power off or halt. Only returns on failure.
    fn reboot(&self, mode: RebootMode) -> Result<()>;

    /// Stage a kernel for a warm reboot.
    fn kexec_load(&self, kernel: &Path, initrd: Option<&Path>, append: &str) -> Result<()>;

    /// Jump into the staged kernel. Only returns on failure.
    fn kexec_exec(&self) -> Result<()>;
}

/// [`Machine`] backed by the running kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxMachine;

impl LinuxMachine {
    pub fn new() -> Self {
        Self
    }
}

fn run(command: &mut Command) -> Result<()> {
    let display = format!("{command:?}");
    let status = command.status().map_err(|e| Error::Command {
        command: display.clone(),
        reason: e.to_string(),
    })?;
    if !status.success() {
        return Err(Error::Command {
            command: display,
            reason: format!("exited with {status}"),
        });
    }
    Ok(())
}

impl Machine for LinuxMachine {
    fn is_root(&self) -> bool {
        geteuid().is_root()
    }

    fn sync(&self) {
        nix::unistd::sync();
    }

    fn reboot(&self, mode: RebootMode) -> Result<()> {
        info!(mode = ?mode, "Invoking reboot syscall");
        let never = reboot(mode)?;
        match never {}
    }

    fn kexec_load(&self, kernel: &Path, initrd: Option<&Path>, append: &str) -> Result<()> {
        let mut cmd = Command::new("kexec");
        cmd.arg("-l").arg(kernel);
        if let Some(initrd) = initrd {
            cmd.arg(format!("--initrd={}", initrd.display()));
        }
        cmd.arg(format!("--append={append}"));
        info!(kernel = %kernel.display(), append = append, "Loading kexec kernel");
        run(&mut cmd)
    }

    fn kexec_exec(&self) -> Result<()> {
        info!("Executing kexec kernel");
        run(Command::new("kexec").arg("-e"))
    }
}
