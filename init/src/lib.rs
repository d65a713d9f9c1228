//! quay init.
//!
//! Runs the boot pipeline as PID 1: prepares the kernel filesystems,
//! mounts or bootstraps persistent state, moves the root off the
//! initramfs when booting from memory, and launches the system container
//! runtime. Afterwards the process stays PID 1 and reaps children.

pub mod error;
pub mod host;
pub mod pid1;
pub mod pipeline;
pub mod stages;
pub mod state;
pub mod switch_root;

pub use error::{Error, Result};
pub use host::{Host, LinuxHost, RuntimeLaunch};
pub use pipeline::{Pipeline, Stage};
pub use state::{BootState, ConfigFileSnapshot};

use mount::is_in_memory_magic;
use std::convert::Infallible;
use tracing::{debug, info};

/// Run the boot pipeline and return the final state.
pub fn run_init(host: &dyn Host, argv: Vec<String>) -> Result<BootState> {
    host.set_env("PATH", stages::BOOT_PATH);

    let in_memory_root = is_in_memory_magic(host.root_fs_magic()?);
    if in_memory_root {
        debug!("Booting off an in-memory filesystem");
        // The runtime must switch_root instead of pivot_root
        host.set_env("DOCKER_RAMDISK", "true");
    } else {
        debug!("Booting off a persistent filesystem");
    }

    let config = host.load_config()?;
    let state = BootState::new(config, argv, in_memory_root);
    stages::boot_pipeline(host).run(state)
}

/// Boot the machine and become PID 1. Returns only on failure.
pub fn main_init(argv: Vec<String>) -> Result<Infallible> {
    info!("quay init starting");
    let host = LinuxHost::new();
    let state = run_init(&host, argv)?;
    pid1::become_pid_one(state.root_switched)
}

/// Entry point of the re-executed init: reap children only.
pub fn main_reaper() -> Result<Infallible> {
    pid1::ignore_signals()?;
    pid1::reap_forever()
}
