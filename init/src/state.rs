//! State threaded through the boot stages.

use crate::host::Host;
use config::BootConfig;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Mode of restored configuration files.
const SNAPSHOT_FILE_MODE: u32 = 0o400;

/// Mode of directories created for restored files.
const SNAPSHOT_DIR_MODE: u32 = 0o700;

/// Everything the boot stages share.
#[derive(Debug, Clone, Default)]
pub struct BootState {
    /// Current boot configuration, replaced on every reload
    pub config: BootConfig,
    /// Argument vector init was started with
    pub argv: Vec<String>,
    /// `/` is tmpfs or ramfs
    pub in_memory_root: bool,
    /// Persistent state was mounted and the root should move onto it
    pub should_switch_root: bool,
    /// The root switch has happened
    pub root_switched: bool,
    /// An alternate state device convention was detected
    pub alternate_state: bool,
    /// Configuration files carried across the root switch
    pub config_files: ConfigFileSnapshot,
}

impl BootState {
    pub fn new(config: BootConfig, argv: Vec<String>, in_memory_root: bool) -> Self {
        Self {
            config,
            argv,
            in_memory_root,
            ..Default::default()
        }
    }
}

/// Raw contents of configuration files keyed by absolute path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFileSnapshot {
    files: BTreeMap<PathBuf, Vec<u8>>,
}

impl ConfigFileSnapshot {
    /// Read every existing file of `paths`. Unreadable files are skipped.
    pub fn capture<P: AsRef<Path>>(host: &dyn Host, paths: &[P]) -> Self {
        let mut files = BTreeMap::new();
        for path in paths {
            let path = path.as_ref();
            match host.read_file(path) {
                Ok(Some(content)) => {
                    debug!(path = %path.display(), bytes = content.len(), "Captured config file");
                    files.insert(path.to_path_buf(), content);
                }
                Ok(None) => {}
                Err(e) => error!(path = %path.display(), error = %e, "Failed to read config file"),
            }
        }
        Self { files }
    }

    /// Write every captured file back. Failures are logged.
    pub fn restore(&self, host: &dyn Host) {
        for (path, content) in &self.files {
            if let Some(parent) = path.parent() {
                if let Err(e) = host.ensure_dir(parent, SNAPSHOT_DIR_MODE) {
                    error!(path = %parent.display(), error = %e, "Failed to create config directory");
                }
            }
            if let Err(e) = host.write_file_atomic(path, content, SNAPSHOT_FILE_MODE) {
                error!(path = %path.display(), error = %e, "Failed to write config file");
            }
        }
    }

    pub fn get(&self, path: &Path) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
