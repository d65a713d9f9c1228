//! Warm reboot into a kernel named by the boot loader configuration.

use crate::error::{Error, Result};
use crate::machine::Machine;
use crate::request::KexecRequest;
use config::paths;
use mount::{MountGuard, Mounter, AUTO_FS_TYPE};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Boot loader fragment for the running kernel.
pub const CURRENT_ENTRY: &str = "linux-current.cfg";
/// Boot loader fragment for the previously installed kernel.
pub const PREVIOUS_ENTRY: &str = "linux-previous.cfg";

/// Kernel, initrd and command line of one boot entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootEntry {
    pub kernel: PathBuf,
    pub initrd: Option<PathBuf>,
    pub append: String,
}

impl BootEntry {
    /// Parse the `kernel`, `initrd` and `append` lines of a syslinux
    /// fragment. Paths are resolved against `root` (absolute) or
    /// `boot_dir` (relative).
    pub fn parse(content: &str, root: &Path, boot_dir: &Path) -> Option<Self> {
        let mut kernel = None;
        let mut initrd = None;
        let mut append = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            let (keyword, rest) = match line.split_once(char::is_whitespace) {
                Some((k, r)) => (k, r.trim()),
                None => continue,
            };
            match keyword.to_ascii_lowercase().as_str() {
                "kernel" | "linux" => kernel = Some(resolve(rest, root, boot_dir)),
                // syslinux allows a comma separated list; the first one boots
                "initrd" => {
                    let first = rest.split(',').next().unwrap_or(rest);
                    initrd = Some(resolve(first, root, boot_dir));
                }
                "append" => append.push(rest.to_string()),
                _ => {}
            }
        }

        Some(Self {
            kernel: kernel?,
            initrd,
            append: append.join(" "),
        })
    }
}

fn resolve(path: &str, root: &Path, boot_dir: &Path) -> PathBuf {
    match path.strip_prefix('/') {
        Some(absolute) => root.join(absolute),
        None => boot_dir.join(path),
    }
}

/// Join the entry's command line with extra parameters.
pub fn kernel_cmdline(entry: &str, extra: &str) -> String {
    [entry.trim(), extra.trim()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Loads and executes a kernel from the boot partition.
pub struct Kexec<'a> {
    mounter: &'a dyn Mounter,
    machine: &'a dyn Machine,
    boot_devices: &'a [String],
    boot_mount: &'a Path,
}

impl<'a> Kexec<'a> {
    pub fn new(
        mounter: &'a dyn Mounter,
        machine: &'a dyn Machine,
        boot_devices: &'a [String],
        boot_mount: &'a Path,
    ) -> Self {
        Self {
            mounter,
            machine,
            boot_devices,
            boot_mount,
        }
    }

    /// Mount the boot partition, stage the selected kernel and jump into
    /// it. Returns only if something failed.
    pub fn run(&self, request: &KexecRequest) -> Result<()> {
        let spec = self
            .boot_devices
            .iter()
            .find(|spec| self.mounter.resolve_device(spec).is_some())
            .ok_or_else(|| Error::NoBootDevice(self.boot_devices.to_vec()))?;

        let guard = MountGuard::mount(self.mounter, "boot", spec, AUTO_FS_TYPE, self.boot_mount)?;
        let root = guard.target().to_path_buf();
        let boot_dir = root.join(paths::BOOT_DIR);

        let file = if request.use_previous { PREVIOUS_ENTRY } else { CURRENT_ENTRY };
        let path = boot_dir.join(file);
        debug!(path = %path.display(), "Reading boot entry");
        let content = std::fs::read_to_string(&path)?;
        let entry = BootEntry::parse(&content, &root, &boot_dir).ok_or_else(|| Error::BootEntry {
            path: path.clone(),
            reason: "no kernel line".to_string(),
        })?;

        let cmdline = kernel_cmdline(&entry.append, &request.append);
        info!(
            kernel = %entry.kernel.display(),
            previous = request.use_previous,
            "Staging kernel for kexec"
        );
        self.machine.kexec_load(&entry.kernel, entry.initrd.as_deref(), &cmdline)?;

        // The staged kernel is in memory; release the boot partition first.
        guard.unmount()?;
        self.machine.sync();
        self.machine.kexec_exec()
    }
}
