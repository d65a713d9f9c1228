//! Layered configuration loading.
//!
//! Layers are TOML files merged table by table, later layers winning.
//! A loader can be rooted at a prefix so the configuration persisted on
//! the state device can be read before the root switch.

use crate::boot::BootConfig;
use crate::error::{Error, Result};
use crate::paths;
use crate::power::PowerConfig;
use std::path::{Path, PathBuf};
use toml::{Table, Value};
use tracing::debug;

/// Configuration loader for the boot and power configuration
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Directory all layer paths are resolved under
    prefix: PathBuf,
    /// Read-only layers, lowest priority first
    layers: Vec<PathBuf>,
    /// Writable layer, applied last
    local: PathBuf,
}

impl ConfigLoader {
    /// Create a loader resolving the standard layers under `prefix`.
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            layers: vec![PathBuf::from(paths::OS_CONFIG_FILE)],
            local: PathBuf::from(paths::LOCAL_CONFIG_FILE),
        }
    }

    /// Create a loader for the running system.
    pub fn system() -> Self {
        Self::new("/")
    }

    /// Replace the read-only layers.
    pub fn layers(mut self, layers: Vec<PathBuf>) -> Self {
        self.layers = layers;
        self
    }

    /// Replace the writable layer.
    pub fn local(mut self, local: impl Into<PathBuf>) -> Self {
        self.local = local.into();
        self
    }

    /// Get the resolved path of the writable layer.
    pub fn local_path(&self) -> PathBuf {
        self.resolve(&self.local)
    }

    /// Load the boot configuration.
    pub fn load(&self) -> Result<BootConfig> {
        let merged = self.load_table()?;
        Ok(Value::Table(merged).try_into()?)
    }

    /// Load the `[power]` table, defaulting every missing key.
    pub fn load_power(&self) -> Result<PowerConfig> {
        match self.load_table()?.remove("power") {
            Some(value) => Ok(value.try_into()?),
            None => Ok(PowerConfig::default()),
        }
    }

    /// Persist a single dotted key into the writable layer.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let path = self.local_path();
        let mut table = read_table(&path)?.unwrap_or_default();
        insert_dotted(&mut table, key, value.into())?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| Error::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content = toml::to_string_pretty(&table)?;
        std::fs::write(&path, content).map_err(|source| Error::Write {
            path: path.clone(),
            source,
        })?;

        debug!(key = key, path = %path.display(), "Persisted configuration key");
        Ok(())
    }

    fn load_table(&self) -> Result<Table> {
        let mut merged = Table::new();
        for layer in self.layers.iter().chain(std::iter::once(&self.local)) {
            let path = self.resolve(layer);
            if let Some(table) = read_table(&path)? {
                debug!(path = %path.display(), "Merging configuration layer");
                merge_tables(&mut merged, table);
            }
        }
        Ok(merged)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match path.strip_prefix("/") {
            Ok(relative) => self.prefix.join(relative),
            Err(_) => self.prefix.join(path),
        }
    }
}

/// Read a TOML table, `None` if the file does not exist.
fn read_table(path: &Path) -> Result<Option<Table>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(Error::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let table = content.parse::<Table>().map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(table))
}

/// Merge `overlay` into `base`, recursing into tables.
fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn insert_dotted(table: &mut Table, key: &str, value: Value) -> Result<()> {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(Error::InvalidKey {
            key: key.to_string(),
            reason: "empty key segment".to_string(),
        });
    }

    let (last, parents) = parts.split_last().ok_or_else(|| Error::InvalidKey {
        key: key.to_string(),
        reason: "empty key".to_string(),
    })?;

    let mut current = table;
    for part in parents {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Table(Table::new()));
        current = match entry {
            Value::Table(t) => t,
            _ => {
                return Err(Error::InvalidKey {
                    key: key.to_string(),
                    reason: format!("{} is not a table", part),
                })
            }
        };
    }

    current.insert(last.to_string(), value);
    Ok(())
}
