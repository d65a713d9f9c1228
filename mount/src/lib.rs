//! Device resolution and mounting.
//!
//! Resolves logical device specifiers (`LABEL=...`, `UUID=...` or a
//! plain path) to block devices, probes filesystem types when asked
//! for `auto`, and performs the mount. Used for the persistent state
//! device, the OEM partition and the boot partition during kexec.

pub mod error;
pub mod guard;
pub mod linux;
pub mod magic;

pub use error::{Error, Result};
pub use guard::MountGuard;
pub use linux::LinuxMounter;
pub use magic::{filesystem_magic, is_in_memory_magic, RAMFS_MAGIC, TMPFS_MAGIC};

use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Filesystem type value that requests probing.
pub const AUTO_FS_TYPE: &str = "auto";

/// Block device and mount operations.
///
/// Implemented by [`LinuxMounter`] for the running system.
pub trait Mounter: Send + Sync {
    /// Resolve a device specifier to a device path.
    fn resolve_device(&self, spec: &str) -> Option<PathBuf>;

    /// Probe the filesystem type from the on-disk signature.
    fn probe_fs_type(&self, device: &Path) -> Result<String>;

    /// Mount `device` on `target`.
    fn mount(&self, device: &Path, target: &Path, fs_type: &str, options: &str) -> Result<()>;

    /// Unmount `target`.
    fn unmount(&self, target: &Path) -> Result<()>;
}

/// Resolve `spec` and mount it on `target`.
///
/// An empty specifier means the mount was not requested and succeeds
/// without touching anything. `fs_type` of `auto` probes the type once.
pub fn resolve_and_mount(
    mounter: &dyn Mounter,
    name: &str,
    spec: &str,
    fs_type: &str,
    target: &Path,
) -> Result<()> {
    if spec.is_empty() {
        return Ok(());
    }

    let device = mounter
        .resolve_device(spec)
        .ok_or_else(|| Error::DeviceNotFound(spec.to_string()))?;

    let fs_type = if fs_type == AUTO_FS_TYPE {
        mounter.probe_fs_type(&device)?
    } else {
        fs_type.to_string()
    };

    debug!(fs_type = %fs_type, "Filesystem type has been set");
    info!(
        device = %device.display(),
        target = %target.display(),
        "Mounting {name} device"
    );
    mounter.mount(&device, target, &fs_type, "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMounter {
        devices: Vec<(String, PathBuf)>,
        probes: Mutex<u32>,
        mounts: Mutex<Vec<(PathBuf, PathBuf, String)>>,
    }

    impl Mounter for RecordingMounter {
        fn resolve_device(&self, spec: &str) -> Option<PathBuf> {
            self.devices
                .iter()
                .find(|(s, _)| s == spec)
                .map(|(_, d)| d.clone())
        }

        fn probe_fs_type(&self, _device: &Path) -> Result<String> {
            *self.probes.lock().unwrap() += 1;
            Ok("ext4".to_string())
        }

        fn mount(&self, device: &Path, target: &Path, fs_type: &str, _options: &str) -> Result<()> {
            self.mounts.lock().unwrap().push((
                device.to_path_buf(),
                target.to_path_buf(),
                fs_type.to_string(),
            ));
            Ok(())
        }

        fn unmount(&self, _target: &Path) -> Result<()> {
            Ok(())
        }
    }

    fn mounter() -> RecordingMounter {
        RecordingMounter {
            devices: vec![("LABEL=STATE".to_string(), PathBuf::from("/dev/vda1"))],
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_spec_is_noop() {
        let m = mounter();
        resolve_and_mount(&m, "state", "", "auto", Path::new("/state")).unwrap();
        assert!(m.mounts.lock().unwrap().is_empty());
        assert_eq!(*m.probes.lock().unwrap(), 0);
    }

    #[test]
    fn test_unresolved_device_fails() {
        let m = mounter();
        let err = resolve_and_mount(&m, "state", "LABEL=NOPE", "auto", Path::new("/state"))
            .unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(ref s) if s == "LABEL=NOPE"));
    }

    #[test]
    fn test_auto_probes_once() {
        let m = mounter();
        resolve_and_mount(&m, "state", "LABEL=STATE", "auto", Path::new("/state")).unwrap();
        assert_eq!(*m.probes.lock().unwrap(), 1);
        assert_eq!(m.mounts.lock().unwrap()[0].2, "ext4");
    }

    #[test]
    fn test_explicit_type_never_probes() {
        let m = mounter();
        resolve_and_mount(&m, "state", "LABEL=STATE", "xfs", Path::new("/state")).unwrap();
        assert_eq!(*m.probes.lock().unwrap(), 0);
        assert_eq!(
            m.mounts.lock().unwrap()[0],
            (PathBuf::from("/dev/vda1"), PathBuf::from("/state"), "xfs".to_string())
        );
    }
}
