//! Typed power requests built from the raw argument vector.
//!
//! Flags are scanned leniently: unknown arguments are ignored and bad
//! values are logged, so the same argument vector can be handed to the
//! power container untouched and parsed again there.

use nix::sys::reboot::RebootMode;
use tracing::{error, warn};

/// Parameters of a warm reboot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KexecRequest {
    /// Boot the previously booted kernel instead of the current one
    pub use_previous: bool,
    /// Extra kernel command line parameters
    pub append: String,
}

/// What the machine should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerAction {
    Reboot,
    Kexec(KexecRequest),
    PowerOff,
    Halt,
}

impl PowerAction {
    /// Name of the power container for this action.
    pub fn name(&self) -> &'static str {
        match self {
            PowerAction::Reboot | PowerAction::Kexec(_) => "reboot",
            PowerAction::PowerOff => "poweroff",
            PowerAction::Halt => "halt",
        }
    }

    /// Mode passed to the reboot syscall.
    pub fn reboot_mode(&self) -> RebootMode {
        match self {
            PowerAction::Reboot | PowerAction::Kexec(_) => RebootMode::RB_AUTOBOOT,
            PowerAction::PowerOff => RebootMode::RB_POWER_OFF,
            PowerAction::Halt => RebootMode::RB_HALT_SYSTEM,
        }
    }
}

/// A parsed power request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerOperationRequest {
    pub action: PowerAction,
    /// Skip the relaunch and the graceful container shutdown
    pub force: bool,
    /// Grace period for each container stop
    pub timeout_secs: u64,
}

impl PowerOperationRequest {
    /// Scan `args` (without the program name) for the power flags.
    ///
    /// `command` is `reboot`, `poweroff`, `halt` or `shutdown`; the
    /// latter accepts `-r`, `-h`, `-P` and `-H` to pick the action.
    pub fn parse(command: &str, args: &[String], default_timeout: u64) -> Self {
        let is_shutdown = command == "shutdown";
        let mut action = match command {
            "poweroff" | "shutdown" => PowerAction::PowerOff,
            "halt" => PowerAction::Halt,
            _ => PowerAction::Reboot,
        };
        let mut force = false;
        let mut timeout_secs = default_timeout;
        let mut kexec: Option<KexecRequest> = None;

        let mut i = 0;
        while i < args.len() {
            let arg = args[i].as_str();
            match arg {
                "-f" | "--f" | "--force" => force = true,
                "-t" | "--t" | "--timeout" => match args.get(i + 1) {
                    Some(value) => {
                        i += 1;
                        timeout_secs = parse_timeout(value, timeout_secs);
                    }
                    None => error!("please specify a timeout"),
                },
                "--kexec" => {
                    kexec.get_or_insert_with(KexecRequest::default);
                }
                "--kexec-previous" => {
                    kexec.get_or_insert_with(KexecRequest::default).use_previous = true;
                }
                "--kexec-append" => match args.get(i + 1) {
                    Some(value) => {
                        i += 1;
                        kexec.get_or_insert_with(KexecRequest::default).append = value.clone();
                    }
                    None => error!("please specify kernel parameters to append"),
                },
                "-r" if is_shutdown => action = PowerAction::Reboot,
                "-h" | "-P" if is_shutdown => action = PowerAction::PowerOff,
                "-H" if is_shutdown => action = PowerAction::Halt,
                _ => {
                    if let Some(value) = arg.strip_prefix("--timeout=") {
                        timeout_secs = parse_timeout(value, timeout_secs);
                    } else if let Some(value) = arg.strip_prefix("--kexec-append=") {
                        kexec.get_or_insert_with(KexecRequest::default).append = value.to_string();
                    }
                }
            }
            i += 1;
        }

        if let Some(kexec) = kexec {
            if action == PowerAction::Reboot {
                action = PowerAction::Kexec(kexec);
            } else {
                warn!(action = action.name(), "Ignoring kexec flags");
            }
        }

        Self {
            action,
            force,
            timeout_secs,
        }
    }

    pub fn is_kexec(&self) -> bool {
        matches!(self.action, PowerAction::Kexec(_))
    }
}

fn parse_timeout(value: &str, current: u64) -> u64 {
    match value.parse::<u64>() {
        Ok(timeout) => timeout,
        Err(e) => {
            error!(value = value, error = %e, "Invalid timeout, keeping {current}s");
            current
        }
    }
}
