//! [`Mounter`] backed by the running kernel and `blkid`.

use crate::error::{Error, Result};
use crate::Mounter;
use nix::mount::{mount, umount, MsFlags};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// Mounter for the live system.
pub struct LinuxMounter {
    dev_root: PathBuf,
}

impl Default for LinuxMounter {
    fn default() -> Self {
        Self::new()
    }
}

impl LinuxMounter {
    /// Create a mounter that resolves devices under `/dev`.
    pub fn new() -> Self {
        Self::with_dev_root("/dev")
    }

    /// Create a mounter that resolves devices under a different root.
    pub fn with_dev_root(dev_root: impl Into<PathBuf>) -> Self {
        Self {
            dev_root: dev_root.into(),
        }
    }

    /// Look up a tagged specifier in the udev `disk/by-*` links.
    fn resolve_by_link(&self, tag: &str, value: &str) -> Option<PathBuf> {
        let dir = match tag {
            "LABEL" => "by-label",
            "UUID" => "by-uuid",
            "PARTUUID" => "by-partuuid",
            "PARTLABEL" => "by-partlabel",
            _ => return None,
        };
        let link = self.dev_root.join("disk").join(dir).join(value);
        link.canonicalize().ok()
    }

    fn resolve_with_blkid(&self, spec: &str) -> Option<PathBuf> {
        let output = match Command::new("blkid")
            .args(["-o", "device", "-l", "-t", spec])
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, "Failed to run blkid");
                return None;
            }
        };
        if !output.status.success() {
            return None;
        }
        let device = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!device.is_empty()).then(|| PathBuf::from(device))
    }
}

impl Mounter for LinuxMounter {
    fn resolve_device(&self, spec: &str) -> Option<PathBuf> {
        if spec.starts_with('/') {
            let path = PathBuf::from(spec);
            return path.exists().then_some(path);
        }

        let (tag, value) = spec.split_once('=')?;
        let device = self
            .resolve_by_link(tag, value)
            .or_else(|| self.resolve_with_blkid(spec));
        debug!(spec = spec, device = ?device, "Resolved device");
        device
    }

    fn probe_fs_type(&self, device: &Path) -> Result<String> {
        let output = Command::new("blkid")
            .args(["-s", "TYPE", "-o", "value"])
            .arg(device)
            .output()?;

        if !output.status.success() {
            return Err(Error::Probe {
                device: device.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let fs_type = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if fs_type.is_empty() {
            return Err(Error::Probe {
                device: device.to_path_buf(),
                reason: "no filesystem signature".to_string(),
            });
        }
        Ok(fs_type)
    }

    fn mount(&self, device: &Path, target: &Path, fs_type: &str, options: &str) -> Result<()> {
        std::fs::create_dir_all(target)?;
        let data = (!options.is_empty()).then_some(options);
        mount(Some(device), target, Some(fs_type), MsFlags::empty(), data).map_err(|source| {
            Error::Mount {
                device: device.to_path_buf(),
                target: target.to_path_buf(),
                source,
            }
        })
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        umount(target).map_err(|source| Error::Unmount {
            target: target.to_path_buf(),
            source,
        })
    }
}
