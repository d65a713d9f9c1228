//! Facts about the invoking process that steer a power operation.

use crate::error::{Error, Result};
use config::PowerConfig;
use std::path::{Path, PathBuf};

/// Where and how the power command was invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerContext {
    /// Basename of the invoked program
    pub program: String,
    /// Full argument vector, program name included
    pub argv: Vec<String>,
    /// Already running inside the power container
    pub inside_power_container: bool,
    /// Relaunch disabled by the environment
    pub skip_relaunch: bool,
    /// Cgroup membership file of the current process
    pub cgroup_path: PathBuf,
}

impl PowerContext {
    /// Build a context from an argument vector and an environment lookup.
    pub fn new<F>(argv: Vec<String>, config: &PowerConfig, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let program = argv
            .first()
            .map(|arg0| program_name(arg0))
            .unwrap_or_default();
        let is_true = |key: &str| env(key).map(|v| v == "true").unwrap_or(false);

        Self {
            program,
            inside_power_container: is_true(&config.marker_env),
            skip_relaunch: is_true(&config.no_relaunch_env),
            cgroup_path: config.cgroup_path.clone(),
            argv,
        }
    }

    /// Build a context from the real process environment.
    pub fn from_env(argv: Vec<String>, config: &PowerConfig) -> Self {
        Self::new(argv, config, |key| std::env::var(key).ok())
    }

    /// Arguments after the program name.
    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or(&[])
    }

    /// Id of the container this process runs in.
    pub fn current_container_id(&self) -> Result<String> {
        let content = std::fs::read_to_string(&self.cgroup_path)?;
        parse_container_id(&content).ok_or_else(|| Error::NoContainerId(self.cgroup_path.clone()))
    }
}

/// Basename of an `argv[0]`.
pub fn program_name(arg0: &str) -> String {
    Path::new(arg0)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| arg0.to_string())
}

/// Extract the last 64 hex digit container id from cgroup membership lines.
///
/// Handles both `/docker/<id>` and systemd `docker-<id>.scope` layouts.
pub fn parse_container_id(cgroup: &str) -> Option<String> {
    cgroup
        .lines()
        .filter_map(|line| line.splitn(3, ':').nth(2))
        .flat_map(|path| path.split('/'))
        .map(|component| {
            let component = component.strip_prefix("docker-").unwrap_or(component);
            component.strip_suffix(".scope").unwrap_or(component)
        })
        .filter(|component| component.len() == 64 && component.chars().all(|c| c.is_ascii_hexdigit()))
        .last()
        .map(str::to_string)
}
