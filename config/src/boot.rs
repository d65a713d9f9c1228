//! Boot configuration threaded through the init pipeline.

use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Persistent state and OEM device settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// State device specifier: a path, `LABEL=...` or `UUID=...`.
    /// Empty means no state device is requested.
    pub dev: String,
    /// Filesystem type of the state device, or `auto` to probe it
    pub fs_type: String,
    /// OEM device specifier (optional, best-effort)
    pub oem_dev: String,
    /// Filesystem type of the OEM device, or `auto`
    pub oem_fs_type: String,
    /// Whether failing to mount state is fatal
    pub required: bool,
    /// Directory inside the state mount that becomes the new root
    pub directory: String,
    /// Devices the bootstrap step may format
    pub autoformat: Vec<String>,
    /// Remove the old in-memory userspace after the root switch
    pub rm_usr: bool,
}

fn default_fs_type() -> String {
    "auto".to_string()
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dev: "LABEL=QUAY_STATE".to_string(),
            fs_type: default_fs_type(),
            oem_dev: "LABEL=QUAY_OEM".to_string(),
            oem_fs_type: default_fs_type(),
            required: false,
            directory: String::new(),
            autoformat: Vec::new(),
            rm_usr: false,
        }
    }
}

/// Datasources consumed by the configuration-generation services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudInitConfig {
    pub datasources: Vec<String>,
}

/// An external command run at a fixed point of the boot.
///
/// An empty command means the hook is not configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    pub command: Vec<String>,
}

impl HookConfig {
    /// Create a hook from a program and its arguments.
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
        }
    }

    /// Check if the hook has a command to run.
    pub fn is_configured(&self) -> bool {
        !self.command.is_empty()
    }
}

/// How the system container runtime is launched at the end of boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeLaunchConfig {
    /// Runtime binary
    pub binary: PathBuf,
    /// Arguments passed to the runtime
    pub args: Vec<String>,
    /// Extra `KEY=VALUE` environment entries
    pub environment: Vec<String>,
    /// Replace the init process image instead of forking
    pub exec: bool,
    /// File receiving the runtime's output outside debug mode
    pub log_file: PathBuf,
}

impl Default for RuntimeLaunchConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(paths::SYSTEM_DOCKER_BIN),
            args: vec![
                "daemon".to_string(),
                "--host".to_string(),
                format!("unix://{}", paths::SYSTEM_DOCKER_SOCKET),
                "--graph".to_string(),
                "/var/lib/system-docker".to_string(),
                "--restart=false".to_string(),
                "--userland-proxy=false".to_string(),
            ],
            environment: Vec::new(),
            exec: false,
            log_file: PathBuf::from(paths::SYSTEM_DOCKER_LOG),
        }
    }
}

/// Boot configuration.
///
/// Owned by the init pipeline during boot. Stages may replace it
/// wholesale after a configuration reload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    pub state: StateConfig,
    /// Kernel modules loaded during boot
    pub modules: Vec<String>,
    pub debug: bool,
    pub cloud_init: CloudInitConfig,
    /// Skip making the root mount shared
    pub no_shared_root: bool,
    /// Environment exported before the runtime starts
    pub environment: BTreeMap<String, String>,
    /// Initializes or formats the state store when its first mount fails
    pub bootstrap: HookConfig,
    /// Early configuration-generation services
    pub config_services: HookConfig,
    /// Security and platform initialization
    pub platform_init: HookConfig,
    pub system_runtime: RuntimeLaunchConfig,
}

impl BootConfig {
    /// Serialize the configuration to TOML for debug output.
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
