//! Boot pipeline tests against a recording host.

use config::BootConfig;
use mount::{Mounter, RAMFS_MAGIC, TMPFS_MAGIC};
use quay_init::stages::{self, STAGE_NAMES};
use quay_init::{run_init, BootState, Error, Host, Result, RuntimeLaunch};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use toml::Value;

const EXT4_MAGIC: i64 = 0xEF53;

struct FakeHost {
    magic: i64,
    config: Mutex<BootConfig>,
    state_config: BootConfig,
    devices: HashMap<String, PathBuf>,
    headers: HashMap<PathBuf, Vec<u8>>,
    /// Remaining failures per mount target
    mount_failures: Mutex<HashMap<PathBuf, u32>>,
    files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
    fail_prepare_fs: bool,
    events: Mutex<Vec<String>>,
}

impl FakeHost {
    fn new(magic: i64, config: BootConfig) -> Self {
        Self {
            magic,
            config: Mutex::new(config),
            state_config: BootConfig::default(),
            devices: HashMap::new(),
            headers: HashMap::new(),
            mount_failures: Mutex::new(HashMap::new()),
            files: Mutex::new(BTreeMap::new()),
            fail_prepare_fs: false,
            events: Mutex::new(Vec::new()),
        }
    }

    fn with_device(mut self, spec: &str, device: &str) -> Self {
        self.devices.insert(spec.to_string(), PathBuf::from(device));
        self
    }

    fn failing_mount(self, target: &str, times: u32) -> Self {
        self.mount_failures
            .lock()
            .unwrap()
            .insert(PathBuf::from(target), times);
        self
    }

    fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

impl Mounter for FakeHost {
    fn resolve_device(&self, spec: &str) -> Option<PathBuf> {
        self.devices.get(spec).cloned()
    }

    fn probe_fs_type(&self, device: &Path) -> mount::Result<String> {
        self.record(format!("probe {}", device.display()));
        Ok("ext4".to_string())
    }

    fn mount(&self, device: &Path, target: &Path, fs_type: &str, _options: &str) -> mount::Result<()> {
        let mut failures = self.mount_failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(target) {
            if *remaining > 0 {
                *remaining -= 1;
                self.record(format!("mount-failed {}", target.display()));
                return Err(mount::Error::Mount {
                    device: device.to_path_buf(),
                    target: target.to_path_buf(),
                    source: nix::errno::Errno::EINVAL,
                });
            }
        }
        self.record(format!(
            "mount {} {} {}",
            device.display(),
            target.display(),
            fs_type
        ));
        Ok(())
    }

    fn unmount(&self, target: &Path) -> mount::Result<()> {
        self.record(format!("umount {}", target.display()));
        Ok(())
    }
}

impl Host for FakeHost {
    fn root_fs_magic(&self) -> Result<i64> {
        Ok(self.magic)
    }

    fn mounter(&self) -> &dyn Mounter {
        self
    }

    fn prepare_fs(&self) -> Result<()> {
        self.record("prepare_fs");
        if self.fail_prepare_fs {
            return Err(Error::Command {
                command: "prepare_fs".to_string(),
                reason: "injected".to_string(),
            });
        }
        Ok(())
    }

    fn save_cmdline(&self, cmdline: &str) -> Result<()> {
        self.record(format!("cmdline {cmdline}"));
        Ok(())
    }

    fn load_config(&self) -> Result<BootConfig> {
        Ok(self.config.lock().unwrap().clone())
    }

    fn load_state_config(&self) -> Result<BootConfig> {
        Ok(self.state_config.clone())
    }

    fn set_config(&self, key: &str, value: Value) -> Result<()> {
        self.record(format!("set {key}={value}"));
        let mut config = self.config.lock().unwrap();
        match (key, value) {
            ("state.dev", Value::String(dev)) => config.state.dev = dev,
            ("state.autoformat", Value::Array(list)) => {
                config.state.autoformat = list
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            }
            ("cloud_init.datasources", Value::Array(list)) => {
                config.cloud_init.datasources = list
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            }
            _ => {}
        }
        Ok(())
    }

    fn loaded_modules(&self) -> Result<HashSet<String>> {
        Ok(HashSet::from(["overlay".to_string()]))
    }

    fn load_module(&self, module: &str) -> Result<()> {
        self.record(format!("modprobe {module}"));
        Err(Error::Command {
            command: format!("modprobe {module}"),
            reason: "not found".to_string(),
        })
    }

    fn read_device_header(&self, device: &Path, len: usize) -> Option<Vec<u8>> {
        self.headers
            .get(device)
            .map(|h| h.iter().copied().take(len).collect())
    }

    fn bootstrap(&self, _config: &BootConfig) -> Result<()> {
        self.record("bootstrap");
        Ok(())
    }

    fn run_hook(&self, name: &str, _hook: &config::HookConfig) -> Result<()> {
        self.record(format!("hook {name}"));
        Ok(())
    }

    fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        Ok(self.files.lock().unwrap().get(path).cloned())
    }

    fn write_file_atomic(&self, path: &Path, content: &[u8], mode: u32) -> Result<()> {
        self.record(format!("write {} {:o}", path.display(), mode));
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), content.to_vec());
        Ok(())
    }

    fn ensure_dir(&self, path: &Path, mode: u32) -> Result<()> {
        self.record(format!("mkdir {} {:o}", path.display(), mode));
        Ok(())
    }

    fn switch_root(&self, state_root: &Path, directory: &str, rm_usr: bool) -> Result<()> {
        self.record(format!(
            "switch_root {} {} {}",
            state_root.display(),
            directory,
            rm_usr
        ));
        // The old root's files are gone after the switch.
        self.files.lock().unwrap().clear();
        Ok(())
    }

    fn mount_tmpfs(&self, target: &Path) -> Result<()> {
        self.record(format!("tmpfs {}", target.display()));
        Ok(())
    }

    fn make_shared(&self, target: &Path) -> Result<()> {
        self.record(format!("shared {}", target.display()));
        Ok(())
    }

    fn set_env(&self, key: &str, value: &str) {
        self.record(format!("env {key}={value}"));
    }

    fn launch_runtime(&self, launch: &RuntimeLaunch) -> Result<()> {
        self.record(format!("launch {}", launch.binary.display()));
        Ok(())
    }
}

fn state_config(required: bool) -> BootConfig {
    let mut config = BootConfig::default();
    config.state.dev = "LABEL=QUAY_STATE".to_string();
    config.state.oem_dev = String::new();
    config.state.required = required;
    config.state.directory = "os".to_string();
    config
}

fn argv() -> Vec<String> {
    vec!["/init".to_string(), "quiet".to_string()]
}

mod pipeline {
    use super::*;

    #[test]
    fn test_stage_order() {
        let host = FakeHost::new(EXT4_MAGIC, BootConfig::default());
        let pipeline = stages::boot_pipeline(&host);
        assert_eq!(pipeline.names(), STAGE_NAMES.to_vec());
    }

    #[test]
    fn test_first_stage_failure_stops_boot() {
        let mut host = FakeHost::new(TMPFS_MAGIC, state_config(true))
            .with_device("LABEL=QUAY_STATE", "/dev/vda1");
        host.fail_prepare_fs = true;

        let err = run_init(&host, argv()).unwrap_err();
        assert!(matches!(err, Error::Command { ref reason, .. } if reason == "injected"));
        assert_eq!(host.count("prepare_fs"), 1);
        assert_eq!(host.count("cmdline"), 0);
        assert_eq!(host.count("mount"), 0);
        assert_eq!(host.count("launch"), 0);
    }

    #[test]
    fn test_boot_environment() {
        let host = FakeHost::new(RAMFS_MAGIC, BootConfig::default());
        run_init(&host, argv()).unwrap();
        let events = host.events();
        assert_eq!(events[0], "env PATH=/sbin:/usr/sbin:/usr/bin");
        assert_eq!(events[1], "env DOCKER_RAMDISK=true");
        assert!(events.contains(&"cmdline /init quiet".to_string()));
        assert_eq!(events.last().unwrap(), "launch /usr/bin/system-docker");
    }

    #[test]
    fn test_persistent_root_sets_no_ramdisk() {
        let host = FakeHost::new(EXT4_MAGIC, BootConfig::default());
        run_init(&host, argv()).unwrap();
        assert_eq!(host.count("env DOCKER_RAMDISK"), 0);
    }

    #[test]
    fn test_module_failures_are_not_fatal() {
        let mut config = BootConfig::default();
        config.modules = vec!["overlay".to_string(), "btrfs".to_string()];
        let host = FakeHost::new(EXT4_MAGIC, config);
        run_init(&host, argv()).unwrap();
        // Loaded twice (load modules, load modules2), overlay already loaded
        assert_eq!(host.count("modprobe btrfs"), 2);
        assert_eq!(host.count("modprobe overlay"), 0);
    }
}

mod state_mount {
    use super::*;

    #[test]
    fn test_mount_success_switches_root_once() {
        let host = FakeHost::new(TMPFS_MAGIC, state_config(true))
            .with_device("LABEL=QUAY_STATE", "/dev/vda1");

        let state = run_init(&host, argv()).unwrap();
        assert!(state.should_switch_root);
        assert!(state.root_switched);
        assert_eq!(host.count("bootstrap"), 0);
        assert_eq!(host.count("mount /dev/vda1 /state ext4"), 1);
        assert_eq!(host.count("probe /dev/vda1"), 1);
        assert_eq!(host.count("switch_root /state os false"), 1);
    }

    #[test]
    fn test_bootstrap_then_retry() {
        let host = FakeHost::new(TMPFS_MAGIC, state_config(true))
            .with_device("LABEL=QUAY_STATE", "/dev/vda1")
            .failing_mount("/state", 1);

        let state = run_init(&host, argv()).unwrap();
        assert!(state.root_switched);
        assert_eq!(host.count("bootstrap"), 1);
        assert_eq!(host.count("mount-failed /state"), 1);
        assert_eq!(host.count("mount /dev/vda1 /state"), 1);
    }

    #[test]
    fn test_required_state_failure_is_fatal() {
        let host = FakeHost::new(TMPFS_MAGIC, state_config(true))
            .with_device("LABEL=QUAY_STATE", "/dev/vda1")
            .failing_mount("/state", 2);

        let err = run_init(&host, argv()).unwrap_err();
        assert!(matches!(err, Error::Mount(mount::Error::Mount { .. })));
        assert_eq!(host.count("bootstrap"), 1);
        assert_eq!(host.count("switch_root"), 0);
        assert_eq!(host.count("launch"), 0);
    }

    #[test]
    fn test_optional_state_failure_continues() {
        let host = FakeHost::new(TMPFS_MAGIC, state_config(false))
            .with_device("LABEL=QUAY_STATE", "/dev/vda1")
            .failing_mount("/state", 2);

        let state = run_init(&host, argv()).unwrap();
        assert!(!state.should_switch_root);
        assert!(!state.root_switched);
        assert_eq!(host.count("bootstrap"), 1);
        assert_eq!(host.count("switch_root"), 0);
        assert_eq!(host.count("launch"), 1);
    }

    #[test]
    fn test_persistent_root_never_switches() {
        let host = FakeHost::new(EXT4_MAGIC, state_config(true))
            .with_device("LABEL=QUAY_STATE", "/dev/vda1");

        let state = run_init(&host, argv()).unwrap();
        assert!(!state.root_switched);
        assert_eq!(host.count("mount /dev/vda1 /state"), 0);
        assert_eq!(host.count("switch_root"), 0);
    }

    #[test]
    fn test_empty_state_device_never_mounts() {
        let mut config = state_config(true);
        config.state.dev = String::new();
        let host = FakeHost::new(TMPFS_MAGIC, config);

        let state = run_init(&host, argv()).unwrap();
        assert!(!state.root_switched);
        assert_eq!(host.count("mount"), 0);
        assert_eq!(host.count("bootstrap"), 0);
    }

    #[test]
    fn test_switch_stage_is_guarded() {
        let host = FakeHost::new(TMPFS_MAGIC, state_config(true));
        let mut state = BootState::new(state_config(true), argv(), true);
        state.should_switch_root = true;

        let state = stages::switch_root(&host, state).unwrap();
        let state = stages::switch_root(&host, state).unwrap();
        assert!(state.root_switched);
        assert_eq!(host.count("switch_root"), 1);
    }
}

mod oem {
    use super::*;

    #[test]
    fn test_oem_failure_is_tolerated() {
        let mut config = BootConfig::default();
        config.state.oem_dev = "LABEL=QUAY_OEM".to_string();
        let host = FakeHost::new(EXT4_MAGIC, config)
            .with_device("LABEL=QUAY_OEM", "/dev/vda2")
            .failing_mount("/usr/share/quay/oem", 2);

        run_init(&host, argv()).unwrap();
        assert_eq!(host.count("mount-failed /usr/share/quay/oem"), 2);
        assert_eq!(host.count("launch"), 1);
    }

    #[test]
    fn test_unresolved_oem_is_tolerated() {
        let mut config = BootConfig::default();
        config.state.oem_dev = "LABEL=MISSING".to_string();
        let host = FakeHost::new(EXT4_MAGIC, config);
        run_init(&host, argv()).unwrap();
        assert_eq!(host.count("launch"), 1);
    }
}

mod alternate_state {
    use super::*;

    #[test]
    fn test_format_marker_selects_alternate_device() {
        let mut host = FakeHost::new(EXT4_MAGIC, BootConfig::default());
        host.headers.insert(
            PathBuf::from("/dev/vda"),
            b"boot2docker, please format-me\0\0\0".to_vec(),
        );

        let state = run_init(&host, argv()).unwrap();
        assert!(state.alternate_state);
        assert_eq!(state.config.state.dev, "LABEL=B2D_STATE");
        assert_eq!(state.config.state.autoformat, vec!["/dev/vda"]);
        // Persisted before bootstrap and again after the root switch
        assert_eq!(host.count("set state.dev="), 2);
    }

    #[test]
    fn test_label_selects_alternate_device() {
        let host = FakeHost::new(EXT4_MAGIC, BootConfig::default())
            .with_device("LABEL=B2D_STATE", "/dev/sdb1");

        let state = run_init(&host, argv()).unwrap();
        assert!(state.alternate_state);
        assert_eq!(state.config.state.dev, "LABEL=B2D_STATE");
        assert!(state.config.state.autoformat.is_empty());
    }

    #[test]
    fn test_no_alternate_device() {
        let host = FakeHost::new(EXT4_MAGIC, BootConfig::default());
        let state = run_init(&host, argv()).unwrap();
        assert!(!state.alternate_state);
        assert_eq!(host.count("set state.dev="), 0);
    }
}

mod config_files {
    use super::*;

    #[test]
    fn test_files_survive_root_switch() {
        let host = FakeHost::new(TMPFS_MAGIC, state_config(true))
            .with_device("LABEL=QUAY_STATE", "/dev/vda1");
        let network = PathBuf::from(config::paths::CLOUD_CONFIG_NETWORK_FILE);
        host.files
            .lock()
            .unwrap()
            .insert(network.clone(), b"dhcp: true".to_vec());

        let state = run_init(&host, argv()).unwrap();
        assert_eq!(state.config_files.len(), 1);
        assert_eq!(
            host.files.lock().unwrap().get(&network).map(Vec::as_slice),
            Some(&b"dhcp: true"[..])
        );
        assert_eq!(host.count(&format!("write {} 400", network.display())), 1);
        assert_eq!(host.count("mkdir /var/lib/quay 755"), 1);
    }
}

mod cloud_init {
    use super::*;

    #[test]
    fn test_datasources_come_from_state() {
        let mut config = BootConfig::default();
        config.config_services = config::HookConfig::new(["/usr/bin/cloud-init-save"]);
        let mut host = FakeHost::new(EXT4_MAGIC, config);
        host.state_config.cloud_init.datasources = vec!["ec2".to_string()];

        let state = run_init(&host, argv()).unwrap();
        assert_eq!(state.config.cloud_init.datasources, vec!["ec2"]);
        assert_eq!(host.count("hook config services"), 1);
    }
}

mod shared_root {
    use super::*;

    #[test]
    fn test_in_memory_root_gets_shared_tmpfs() {
        let host = FakeHost::new(TMPFS_MAGIC, BootConfig::default());
        run_init(&host, argv()).unwrap();
        for dir in ["/mnt", "/media", "/var/lib/system-docker"] {
            assert_eq!(host.count(&format!("tmpfs {dir}")), 1);
            assert_eq!(host.count(&format!("shared {dir}")), 1);
        }
        assert!(!host.events().contains(&"shared /".to_string()));
    }

    #[test]
    fn test_persistent_root_made_shared() {
        let host = FakeHost::new(EXT4_MAGIC, BootConfig::default());
        run_init(&host, argv()).unwrap();
        assert!(host.events().contains(&"shared /".to_string()));
        assert_eq!(host.count("tmpfs"), 0);
    }

    #[test]
    fn test_no_shared_root() {
        let mut config = BootConfig::default();
        config.no_shared_root = true;
        let host = FakeHost::new(EXT4_MAGIC, config);
        run_init(&host, argv()).unwrap();
        assert_eq!(host.count("shared"), 0);
    }

    #[test]
    fn test_environment_exported() {
        let mut config = BootConfig::default();
        config
            .environment
            .insert("HTTP_PROXY".to_string(), "http://proxy:3128".to_string());
        let host = FakeHost::new(EXT4_MAGIC, config);
        run_init(&host, argv()).unwrap();
        assert_eq!(host.count("env HTTP_PROXY=http://proxy:3128"), 1);
    }
}
