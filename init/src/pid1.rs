//! PID 1 duties after the boot pipeline.

use crate::error::Result;
use config::paths;
use nix::errno::Errno;
use nix::sys::signal::{signal, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use std::convert::Infallible;
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, error, info};

/// Flag telling `quay init` to skip the boot and only reap.
pub const REAP_ONLY_FLAG: &str = "--reap-only";

/// Ignore signals that would stop or kill init on terminal and pipe I/O.
pub fn ignore_signals() -> Result<()> {
    for sig in [Signal::SIGTTIN, Signal::SIGTTOU, Signal::SIGPIPE] {
        // SAFETY: SIG_IGN installs no handler code.
        unsafe { signal(sig, SigHandler::SigIgn) }?;
    }
    Ok(())
}

/// Reap children forever.
pub fn reap_forever() -> ! {
    info!("Reaping child processes");
    loop {
        match waitpid(Pid::from_raw(-1), None) {
            Ok(WaitStatus::Exited(pid, code)) => {
                debug!(pid = pid.as_raw(), code = code, "Reaped process");
            }
            Ok(WaitStatus::Signaled(pid, sig, _)) => {
                debug!(pid = pid.as_raw(), signal = ?sig, "Reaped signaled process");
            }
            Ok(_) | Err(Errno::EINTR) => {}
            Err(Errno::ECHILD) => std::thread::sleep(Duration::from_secs(1)),
            Err(e) => {
                error!(error = %e, "Error reaping processes");
                std::thread::sleep(Duration::from_secs(1));
            }
        }
    }
}

/// Replace this process with a fresh init from the new root that only reaps.
pub fn reexec_reaper() -> Result<Infallible> {
    info!(binary = paths::QUAY_BIN, "Re-executing init from the new root");
    let err = Command::new(paths::QUAY_BIN)
        .arg0("quay")
        .args(["init", REAP_ONLY_FLAG])
        .exec();
    Err(err.into())
}

/// Take over PID 1 duties.
///
/// After a root switch the pre-switch image must not stay PID 1, so the
/// reaper is re-executed from the new root.
pub fn become_pid_one(root_switched: bool) -> Result<Infallible> {
    ignore_signals()?;
    if root_switched {
        return reexec_reaper();
    }
    reap_forever()
}
