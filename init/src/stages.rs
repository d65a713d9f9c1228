//! The boot stages, in the order the pipeline runs them.

use crate::error::Result;
use crate::host::{Host, RuntimeLaunch};
use crate::pipeline::Pipeline;
use crate::state::{BootState, ConfigFileSnapshot};
use config::{paths, BootConfig};
use mount::resolve_and_mount;
use std::path::Path;
use toml::Value;
use tracing::{debug, error, info, warn};

/// `PATH` exported before anything else runs.
pub const BOOT_PATH: &str = "/sbin:/usr/sbin:/usr/bin";

/// Label of the alternate state device.
pub const ALTERNATE_STATE_LABEL: &str = "LABEL=B2D_STATE";

/// Marker written at the start of a disk that asks to be formatted.
pub const ALTERNATE_STATE_MAGIC: &[u8] = b"boot2docker, please format-me";

pub const ALTERNATE_STATE_PROBE_DEVICES: [&str; 2] = ["/dev/sda", "/dev/vda"];

/// Mounted as shared tmpfs when booting from an in-memory root.
pub const SHARED_TMPFS_DIRS: [&str; 3] = ["/mnt", "/media", "/var/lib/system-docker"];

/// Stage names in execution order.
pub const STAGE_NAMES: [&str; 19] = [
    "preparefs",
    "save init cmdline",
    "mount OEM",
    "debug save cfg",
    "load modules",
    "alternate state env",
    "mount and bootstrap",
    "cloud-init",
    "read cfg files",
    "switchroot",
    "mount OEM2",
    "write cfg files",
    "alternate state env 2",
    "preparefs2",
    "load modules2",
    "set env",
    "platform init",
    "setupSharedRoot",
    "launch system runtime",
];

/// Assemble the boot pipeline against `host`.
pub fn boot_pipeline(host: &dyn Host) -> Pipeline<'_, BootState, crate::Error> {
    let [
        preparefs,
        save_cmdline,
        oem,
        debug_cfg,
        modules,
        alt,
        bootstrap,
        cloud,
        read_cfg,
        switch,
        oem2,
        write_cfg,
        alt2,
        preparefs2,
        modules2,
        env,
        platform,
        shared,
        launch,
    ] = STAGE_NAMES;

    Pipeline::new()
        .stage(preparefs, move |s| prepare_fs(host, s))
        .stage(save_cmdline, move |s| save_init_cmdline(host, s))
        .stage(oem, move |s| mount_oem(host, s))
        .stage(debug_cfg, move |s| debug_save_config(host, s))
        .stage(modules, move |s| load_modules(host, s))
        .stage(alt, move |s| detect_alternate_state(host, s))
        .stage(bootstrap, move |s| mount_and_bootstrap(host, s))
        .stage(cloud, move |s| cloud_init(host, s))
        .stage(read_cfg, move |s| read_config_files(host, s))
        .stage(switch, move |s| switch_root(host, s))
        .stage(oem2, move |s| mount_oem(host, s))
        .stage(write_cfg, move |s| write_config_files(host, s))
        .stage(alt2, move |s| persist_alternate_state_again(host, s))
        .stage(preparefs2, move |s| prepare_fs(host, s))
        .stage(modules2, move |s| load_modules(host, s))
        .stage(env, move |s| set_env(host, s))
        .stage(platform, move |s| platform_init(host, s))
        .stage(shared, move |s| setup_shared_root(host, s))
        .stage(launch, move |s| launch_system_runtime(host, s))
}

pub fn prepare_fs(host: &dyn Host, state: BootState) -> Result<BootState> {
    host.prepare_fs()?;
    Ok(state)
}

pub fn save_init_cmdline(host: &dyn Host, state: BootState) -> Result<BootState> {
    if let Err(e) = host.save_cmdline(&state.argv.join(" ")) {
        error!(error = %e, "Failed to save init command line");
    }
    Ok(state)
}

/// Mount the OEM partition. Never fails the boot.
pub fn mount_oem(host: &dyn Host, state: BootState) -> Result<BootState> {
    let cfg = &state.config.state;
    match resolve_and_mount(
        host.mounter(),
        "oem",
        &cfg.oem_dev,
        &cfg.oem_fs_type,
        Path::new(paths::OEM_DIR),
    ) {
        Ok(()) if !cfg.oem_dev.is_empty() => info!(device = %cfg.oem_dev, "Mounted OEM"),
        Ok(()) => {}
        Err(e) => debug!(error = %e, "Not mounting OEM"),
    }
    Ok(state)
}

pub fn debug_save_config(host: &dyn Host, mut state: BootState) -> Result<BootState> {
    state.config = host.load_config()?;
    if state.config.debug {
        match state.config.to_toml() {
            Ok(dump) => debug!(config = %dump, "Boot configuration"),
            Err(e) => error!(error = %e, "Error serializing config"),
        }
    }
    Ok(state)
}

pub fn load_modules(host: &dyn Host, state: BootState) -> Result<BootState> {
    let loaded = host.loaded_modules()?;
    for module in state.config.modules.iter().filter(|m| !loaded.contains(*m)) {
        debug!(module = %module, "Loading module");
        if let Err(e) = host.load_module(module) {
            error!(module = %module, error = %e, "Could not load module");
        }
    }
    Ok(state)
}

/// Switch to the alternate state device if its label or format marker exists.
pub fn detect_alternate_state(host: &dyn Host, mut state: BootState) -> Result<BootState> {
    if host.mounter().resolve_device(ALTERNATE_STATE_LABEL).is_some() {
        state.alternate_state = true;
        state.config.state.dev = ALTERNATE_STATE_LABEL.to_string();
    } else {
        for device in ALTERNATE_STATE_PROBE_DEVICES {
            let header = host.read_device_header(Path::new(device), ALTERNATE_STATE_MAGIC.len());
            if header.as_deref() == Some(ALTERNATE_STATE_MAGIC) {
                info!(device = device, "Found unformatted alternate state device");
                state.alternate_state = true;
                state.config.state.dev = ALTERNATE_STATE_LABEL.to_string();
                state.config.state.autoformat = vec![device.to_string()];
                break;
            }
        }
    }

    // Persisted so the bootstrap hook sees it
    if state.alternate_state {
        persist_alternate_state(host, &state.config);
    }

    state.config = host.load_config()?;
    Ok(state)
}

fn persist_alternate_state(host: &dyn Host, config: &BootConfig) {
    if let Err(e) = host.set_config("state.dev", Value::String(config.state.dev.clone())) {
        error!(error = %e, "Failed to update state.dev");
    }
    let autoformat = config
        .state
        .autoformat
        .iter()
        .cloned()
        .map(Value::String)
        .collect();
    if let Err(e) = host.set_config("state.autoformat", Value::Array(autoformat)) {
        error!(error = %e, "Failed to update state.autoformat");
    }
}

fn mount_state(host: &dyn Host, config: &BootConfig) -> Result<()> {
    resolve_and_mount(
        host.mounter(),
        "state",
        &config.state.dev,
        &config.state.fs_type,
        Path::new(paths::STATE_DIR),
    )?;
    Ok(())
}

/// Mount state, bootstrapping and retrying once on failure.
pub fn try_mount_state(host: &dyn Host, config: &BootConfig) -> Result<()> {
    if let Err(e) = mount_state(host, config) {
        info!(error = %e, "State mount failed, running bootstrap");
        host.bootstrap(config)?;
        return mount_state(host, config);
    }
    Ok(())
}

/// Mount persistent state and decide whether the root moves onto it.
pub fn mount_and_bootstrap(host: &dyn Host, mut state: BootState) -> Result<BootState> {
    state.should_switch_root = false;
    if !state.in_memory_root || state.config.state.dev.is_empty() {
        return Ok(state);
    }

    match try_mount_state(host, &state.config) {
        Ok(()) => state.should_switch_root = true,
        Err(e) if !state.config.state.required => {
            warn!(error = %e, "Continuing without persistent state");
        }
        Err(e) => return Err(e),
    }
    Ok(state)
}

pub fn cloud_init(host: &dyn Host, mut state: BootState) -> Result<BootState> {
    match host.load_state_config() {
        Ok(persisted) => state.config.cloud_init.datasources = persisted.cloud_init.datasources,
        Err(e) => warn!(error = %e, "Cannot read persisted configuration"),
    }

    let datasources = state
        .config
        .cloud_init
        .datasources
        .iter()
        .cloned()
        .map(Value::String)
        .collect();
    if let Err(e) = host.set_config("cloud_init.datasources", Value::Array(datasources)) {
        error!(error = %e, "Failed to update cloud_init.datasources");
    }

    if state.config.config_services.is_configured() {
        if let Err(e) = host.run_hook("config services", &state.config.config_services) {
            error!(error = %e, "Configuration services failed");
        }
    }

    state.config = host.load_config()?;
    Ok(state)
}

pub fn read_config_files(host: &dyn Host, mut state: BootState) -> Result<BootState> {
    state.config_files = ConfigFileSnapshot::capture(host, &paths::boot_config_files());
    Ok(state)
}

pub fn switch_root(host: &dyn Host, mut state: BootState) -> Result<BootState> {
    if !state.should_switch_root || state.root_switched {
        return Ok(state);
    }
    debug!(
        state_dir = paths::STATE_DIR,
        directory = %state.config.state.directory,
        "Switching to new root"
    );
    host.switch_root(
        Path::new(paths::STATE_DIR),
        &state.config.state.directory,
        state.config.state.rm_usr,
    )?;
    state.root_switched = true;
    Ok(state)
}

pub fn write_config_files(host: &dyn Host, state: BootState) -> Result<BootState> {
    state.config_files.restore(host);
    if let Err(e) = host.ensure_dir(Path::new(paths::VAR_QUAY_DIR), 0o755) {
        error!(error = %e, "Failed to prepare {}", paths::VAR_QUAY_DIR);
    }
    Ok(state)
}

/// Persist the alternate state settings again, now under the new root.
pub fn persist_alternate_state_again(host: &dyn Host, mut state: BootState) -> Result<BootState> {
    if state.alternate_state {
        persist_alternate_state(host, &state.config);
    }
    state.config = host.load_config()?;
    Ok(state)
}

pub fn set_env(host: &dyn Host, state: BootState) -> Result<BootState> {
    for (key, value) in &state.config.environment {
        host.set_env(key, value);
    }
    Ok(state)
}

pub fn platform_init(host: &dyn Host, state: BootState) -> Result<BootState> {
    if state.config.platform_init.is_configured() {
        host.run_hook("platform init", &state.config.platform_init)?;
    }
    Ok(state)
}

pub fn setup_shared_root(host: &dyn Host, state: BootState) -> Result<BootState> {
    if state.config.no_shared_root {
        return Ok(state);
    }

    if state.in_memory_root {
        for dir in SHARED_TMPFS_DIRS {
            host.mount_tmpfs(Path::new(dir))?;
            host.make_shared(Path::new(dir))?;
        }
    } else {
        host.make_shared(Path::new("/"))?;
    }
    Ok(state)
}

/// Launch parameters of the system runtime for `config`.
pub fn runtime_launch(config: &BootConfig) -> RuntimeLaunch {
    let runtime = &config.system_runtime;
    let mut env = vec![("PATH".to_string(), BOOT_PATH.to_string())];
    env.extend(runtime.environment.iter().filter_map(|entry| {
        entry
            .split_once('=')
            .map(|(k, v)| (k.to_string(), v.to_string()))
    }));

    RuntimeLaunch {
        binary: runtime.binary.clone(),
        args: runtime.args.clone(),
        env,
        log_file: (!config.debug).then(|| runtime.log_file.clone()),
        fork: !runtime.exec,
    }
}

pub fn launch_system_runtime(host: &dyn Host, state: BootState) -> Result<BootState> {
    info!("Launching system runtime");
    host.launch_runtime(&runtime_launch(&state.config))?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_launch_from_config() {
        let mut config = BootConfig::default();
        config.system_runtime.environment = vec![
            "HTTP_PROXY=http://proxy:3128".to_string(),
            "BROKEN".to_string(),
        ];
        let launch = runtime_launch(&config);
        assert!(launch.fork);
        assert_eq!(launch.log_file, Some(config.system_runtime.log_file.clone()));
        assert_eq!(
            launch.env,
            vec![
                ("PATH".to_string(), BOOT_PATH.to_string()),
                ("HTTP_PROXY".to_string(), "http://proxy:3128".to_string()),
            ]
        );
    }

    #[test]
    fn test_runtime_launch_debug_and_exec() {
        let mut config = BootConfig::default();
        config.debug = true;
        config.system_runtime.exec = true;
        let launch = runtime_launch(&config);
        assert!(!launch.fork);
        assert!(launch.log_file.is_none());
    }
}
