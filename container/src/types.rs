//! Container metadata and request types.

use serde::{Deserialize, Serialize};

/// A container known to the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Full container id
    pub id: String,
    /// Container name without the leading slash
    pub name: String,
    /// Image reference the container was created from
    pub image: String,
    /// Whether the container runs privileged
    pub privileged: bool,
    /// PID namespace mode (`host` or empty)
    pub pid_mode: String,
    /// Propagation mode of each mount
    pub mount_propagation: Vec<String>,
}

/// Host-side settings of a container to create.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pid_mode: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes_from: Vec<String>,
    pub privileged: bool,
}

/// Everything needed to create a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: Vec<String>,
    pub host_config: HostConfig,
}

/// How a container exited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ExitInfo {
    #[serde(rename = "StatusCode")]
    pub status_code: i64,
}

/// Selects containers to list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Include stopped containers
    pub all: bool,
    /// Only containers in one of these states
    pub status: Vec<String>,
}

impl ListFilter {
    /// Running containers only.
    pub fn running() -> Self {
        Self {
            all: true,
            status: vec!["running".to_string()],
        }
    }
}

/// Body of `POST /containers/create`.
#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct CreateBody<'a> {
    pub image: &'a str,
    pub cmd: &'a [String],
    pub env: &'a [String],
    pub host_config: &'a HostConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct CreateResponse {
    pub id: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub(crate) struct InspectResponse {
    pub id: String,
    pub name: String,
    pub config: InspectConfig,
    pub host_config: InspectHostConfig,
    pub mounts: Vec<InspectMount>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub(crate) struct InspectConfig {
    pub image: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub(crate) struct InspectHostConfig {
    pub privileged: bool,
    pub pid_mode: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub(crate) struct InspectMount {
    pub propagation: String,
}

impl From<InspectResponse> for ContainerHandle {
    fn from(r: InspectResponse) -> Self {
        Self {
            id: r.id,
            name: r.name.trim_start_matches('/').to_string(),
            image: r.config.image,
            privileged: r.host_config.privileged,
            pid_mode: r.host_config.pid_mode,
            mount_propagation: r.mounts.into_iter().map(|m| m.propagation).collect(),
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub(crate) struct ListEntry {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
}

impl From<ListEntry> for ContainerHandle {
    fn from(e: ListEntry) -> Self {
        let name = e
            .names
            .first()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default();
        Self {
            id: e.id,
            name,
            image: e.image,
            ..Default::default()
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct ApiMessage {
    pub message: String,
}
