//! Power command configuration, read from the `[power]` table.

use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings used by reboot, poweroff and halt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    /// Engine API socket of the system container runtime
    pub socket: PathBuf,
    /// Environment variable marking the power container
    pub marker_env: String,
    /// Environment variable that disables the relaunch entirely
    pub no_relaunch_env: String,
    /// File holding the cgroup membership of the current process
    pub cgroup_path: PathBuf,
    /// Boot partition specifiers tried in order for kexec
    pub boot_devices: Vec<String>,
    /// Transient mount point for the boot partition
    pub boot_mount: PathBuf,
    /// Default grace period for container stop
    pub timeout_secs: u32,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from(paths::SYSTEM_DOCKER_SOCKET),
            marker_env: "IN_DOCKER".to_string(),
            no_relaunch_env: "QUAY_NO_RELAUNCH".to_string(),
            cgroup_path: PathBuf::from("/proc/self/cgroup"),
            boot_devices: vec!["LABEL=QUAY_BOOT".to_string(), "LABEL=QUAY_STATE".to_string()],
            boot_mount: PathBuf::from(paths::BOOT_MOUNT_DIR),
            timeout_secs: 2,
        }
    }
}
