//! Side effects of the boot stages.
//!
//! Every stage reaches the machine through [`Host`], so the pipeline can
//! run against a recording fake in tests. [`LinuxHost`] is the real one.

use crate::error::{Error, Result};
use crate::switch_root;
use config::{paths, BootConfig, ConfigLoader, HookConfig};
use mount::{filesystem_magic, LinuxMounter, Mounter};
use nix::errno::Errno;
use nix::mount::{mount, MsFlags};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::NamedTempFile;
use toml::Value;
use tracing::{debug, info, warn};

/// How the system container runtime is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLaunch {
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Receives stdout and stderr when set
    pub log_file: Option<PathBuf>,
    /// Start as a child instead of replacing the init process image
    pub fork: bool,
}

/// Machine operations used during boot.
pub trait Host {
    /// `statfs` magic of `/`.
    fn root_fs_magic(&self) -> Result<i64>;

    /// Device resolution and mounting.
    fn mounter(&self) -> &dyn Mounter;

    /// Mount the kernel filesystems and cgroup hierarchies.
    fn prepare_fs(&self) -> Result<()>;

    /// Save the init command line for the configuration services.
    fn save_cmdline(&self, cmdline: &str) -> Result<()>;

    /// Load the configuration of the running root.
    fn load_config(&self) -> Result<BootConfig>;

    /// Load the configuration persisted on the state device.
    fn load_state_config(&self) -> Result<BootConfig>;

    /// Persist one dotted key into the local configuration.
    fn set_config(&self, key: &str, value: Value) -> Result<()>;

    /// Names of the kernel modules already loaded.
    fn loaded_modules(&self) -> Result<HashSet<String>>;

    fn load_module(&self, module: &str) -> Result<()>;

    /// First `len` bytes of a block device, `None` if unreadable.
    fn read_device_header(&self, device: &Path, len: usize) -> Option<Vec<u8>>;

    /// Initialize or format the state store.
    fn bootstrap(&self, config: &BootConfig) -> Result<()>;

    /// Run an external hook command.
    fn run_hook(&self, name: &str, hook: &HookConfig) -> Result<()>;

    /// Contents of a file, `None` if it does not exist.
    fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>>;

    /// Replace a file in one step.
    fn write_file_atomic(&self, path: &Path, content: &[u8], mode: u32) -> Result<()>;

    /// Create a directory tree and set the mode of its leaf.
    fn ensure_dir(&self, path: &Path, mode: u32) -> Result<()>;

    /// Move the process root onto `directory` inside `state_root`.
    fn switch_root(&self, state_root: &Path, directory: &str, rm_usr: bool) -> Result<()>;

    fn mount_tmpfs(&self, target: &Path) -> Result<()>;

    /// Make a mount point shared.
    fn make_shared(&self, target: &Path) -> Result<()>;

    fn set_env(&self, key: &str, value: &str);

    /// Start the system container runtime.
    fn launch_runtime(&self, launch: &RuntimeLaunch) -> Result<()>;
}

/// Kernel filesystems mounted by `prepare_fs`: source, target, type, data.
const KERNEL_MOUNTS: &[(&str, &str, &str, &str)] = &[
    ("proc", "/proc", "proc", ""),
    ("sysfs", "/sys", "sysfs", ""),
    ("devtmpfs", "/dev", "devtmpfs", "mode=0755"),
    ("devpts", "/dev/pts", "devpts", "newinstance,ptmxmode=0666,mode=620"),
    ("shm", "/dev/shm", "tmpfs", ""),
    ("tmpfs", "/run", "tmpfs", ""),
    ("cgroup_root", "/sys/fs/cgroup", "tmpfs", "mode=0755"),
];

/// Controllers co-mounted with another controller's hierarchy.
const CGROUP_HIERARCHY: &[(&str, &str)] = &[
    ("cpu", "cpu"),
    ("cpuacct", "cpu"),
    ("net_cls", "net_cls"),
    ("net_prio", "net_cls"),
];

const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Host backed by the running kernel.
pub struct LinuxHost {
    mounter: LinuxMounter,
    loader: ConfigLoader,
    state_loader: ConfigLoader,
}

impl Default for LinuxHost {
    fn default() -> Self {
        Self::new()
    }
}

impl LinuxHost {
    pub fn new() -> Self {
        Self {
            mounter: LinuxMounter::new(),
            loader: ConfigLoader::system(),
            state_loader: ConfigLoader::new(paths::STATE_DIR),
        }
    }

    fn mount_special(&self, source: &str, target: &str, fs_type: &str, data: &str) -> Result<()> {
        fs::create_dir_all(target)?;
        let data = (!data.is_empty()).then_some(data);
        match mount(Some(source), target, Some(fs_type), MsFlags::empty(), data) {
            Ok(()) => {
                debug!(source = source, target = target, fstype = fs_type, "Mounted filesystem");
                Ok(())
            }
            Err(Errno::EBUSY) => {
                debug!(target = target, "Already mounted");
                Ok(())
            }
            Err(source_err) => Err(Error::MountFs {
                source_path: source.to_string(),
                target: PathBuf::from(target),
                source: source_err,
            }),
        }
    }

    fn mount_cgroups(&self) -> Result<()> {
        let proc_cgroups = fs::read_to_string("/proc/cgroups")?;
        for controllers in cgroup_hierarchies(&proc_cgroups).into_values() {
            let joined = controllers.join(",");
            let target = format!("{CGROUP_ROOT}/{joined}");
            self.mount_special("cgroup", &target, "cgroup", &joined)?;

            for controller in controllers.iter().filter(|c| **c != joined) {
                let link = Path::new(CGROUP_ROOT).join(controller);
                match std::os::unix::fs::symlink(&joined, &link) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }
}

/// Run `command` to completion, mapping failure to [`Error::Command`].
fn run_command(command: &[String], envs: &[(&str, String)]) -> Result<()> {
    let (program, args) = command.split_first().ok_or_else(|| Error::Command {
        command: String::new(),
        reason: "empty command".to_string(),
    })?;
    let display = command.join(" ");

    let status = Command::new(program)
        .args(args)
        .envs(envs.iter().map(|(k, v)| (*k, v.as_str())))
        .status()
        .map_err(|e| Error::Command {
            command: display.clone(),
            reason: e.to_string(),
        })?;

    if !status.success() {
        return Err(Error::Command {
            command: display,
            reason: status.to_string(),
        });
    }
    Ok(())
}

/// Module names listed in `/proc/modules`.
pub fn parse_loaded_modules(proc_modules: &str) -> HashSet<String> {
    proc_modules
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Enabled controllers of `/proc/cgroups` grouped by hierarchy.
pub fn cgroup_hierarchies(proc_cgroups: &str) -> BTreeMap<String, Vec<String>> {
    let mut hierarchies: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for line in proc_cgroups.lines().filter(|l| !l.starts_with('#')) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (Some(&name), Some(&enabled)) = (fields.first(), fields.get(3)) else {
            continue;
        };
        if enabled != "1" {
            continue;
        }
        let hierarchy = CGROUP_HIERARCHY
            .iter()
            .find(|(controller, _)| *controller == name)
            .map(|(_, h)| *h)
            .unwrap_or(name);
        hierarchies
            .entry(hierarchy.to_string())
            .or_default()
            .push(name.to_string());
    }
    hierarchies
}

impl Host for LinuxHost {
    fn root_fs_magic(&self) -> Result<i64> {
        Ok(filesystem_magic(Path::new("/"))?)
    }

    fn mounter(&self) -> &dyn Mounter {
        &self.mounter
    }

    fn prepare_fs(&self) -> Result<()> {
        for (source, target, fs_type, data) in KERNEL_MOUNTS {
            self.mount_special(source, target, fs_type, data)?;
        }
        self.mount_cgroups()
    }

    fn save_cmdline(&self, cmdline: &str) -> Result<()> {
        let path = Path::new(paths::INIT_CMDLINE_FILE);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, cmdline)?;
        Ok(())
    }

    fn load_config(&self) -> Result<BootConfig> {
        Ok(self.loader.load()?)
    }

    fn load_state_config(&self) -> Result<BootConfig> {
        Ok(self.state_loader.load()?)
    }

    fn set_config(&self, key: &str, value: Value) -> Result<()> {
        Ok(self.loader.set(key, value)?)
    }

    fn loaded_modules(&self) -> Result<HashSet<String>> {
        Ok(parse_loaded_modules(&fs::read_to_string("/proc/modules")?))
    }

    fn load_module(&self, module: &str) -> Result<()> {
        run_command(&["modprobe".to_string(), module.to_string()], &[])
    }

    fn read_device_header(&self, device: &Path, len: usize) -> Option<Vec<u8>> {
        let mut file = fs::File::open(device).ok()?;
        let mut header = vec![0u8; len];
        file.read_exact(&mut header).ok()?;
        Some(header)
    }

    fn bootstrap(&self, config: &BootConfig) -> Result<()> {
        if !config.bootstrap.is_configured() {
            debug!("No bootstrap command configured");
            return Ok(());
        }
        info!(device = %config.state.dev, "Bootstrapping state device");
        run_command(
            &config.bootstrap.command,
            &[
                ("QUAY_STATE_DEV", config.state.dev.clone()),
                ("QUAY_STATE_AUTOFORMAT", config.state.autoformat.join(" ")),
            ],
        )
    }

    fn run_hook(&self, name: &str, hook: &HookConfig) -> Result<()> {
        debug!(hook = name, command = ?hook.command, "Running hook");
        run_command(&hook.command, &[])
    }

    fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_file_atomic(&self, path: &Path, content: &[u8], mode: u32) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content)?;
        tmp.as_file().sync_all()?;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(mode))?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn ensure_dir(&self, path: &Path, mode: u32) -> Result<()> {
        DirBuilder::new().recursive(true).mode(mode).create(path)?;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn switch_root(&self, state_root: &Path, directory: &str, rm_usr: bool) -> Result<()> {
        if let Err(e) = self.mounter.unmount(Path::new(paths::OEM_DIR)) {
            debug!(error = %e, "OEM partition not unmounted before root switch");
        }
        switch_root::switch_root(state_root, directory, rm_usr)
    }

    fn mount_tmpfs(&self, target: &Path) -> Result<()> {
        DirBuilder::new().recursive(true).mode(0o755).create(target)?;
        mount(
            Some("tmpfs"),
            target,
            Some("tmpfs"),
            MsFlags::empty(),
            None::<&str>,
        )
        .map_err(|source| Error::MountFs {
            source_path: "tmpfs".to_string(),
            target: target.to_path_buf(),
            source,
        })
    }

    fn make_shared(&self, target: &Path) -> Result<()> {
        mount(
            None::<&str>,
            target,
            None::<&str>,
            MsFlags::MS_SHARED,
            None::<&str>,
        )
        .map_err(|source| Error::MountFs {
            source_path: "none".to_string(),
            target: target.to_path_buf(),
            source,
        })
    }

    fn set_env(&self, key: &str, value: &str) {
        std::env::set_var(key, value);
    }

    fn launch_runtime(&self, launch: &RuntimeLaunch) -> Result<()> {
        let mut command = Command::new(&launch.binary);
        command
            .args(&launch.args)
            .envs(launch.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        if let Some(log_file) = &launch.log_file {
            if let Some(parent) = log_file.parent() {
                fs::create_dir_all(parent)?;
            }
            let log = OpenOptions::new().create(true).append(true).open(log_file)?;
            command.stdout(log.try_clone()?).stderr(log);
        }

        if !launch.fork {
            info!(binary = %launch.binary.display(), "Replacing init with system runtime");
            let err = command.exec();
            return Err(Error::Launch {
                binary: launch.binary.clone(),
                reason: err.to_string(),
            });
        }

        let child = command.spawn().map_err(|e| Error::Launch {
            binary: launch.binary.clone(),
            reason: e.to_string(),
        })?;
        info!(pid = child.id(), "System runtime started");
        if launch.log_file.is_none() {
            warn!("System runtime output is not redirected");
        }
        Ok(())
    }
}
