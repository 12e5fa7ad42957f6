//! Container data model shared by every backend.
//!
//! A [`ContainerConfig`] is populated by build steps and handed to
//! [`ContainerManager::create_container`]. Backends store a clone; the caller's
//! value is never mutated afterwards.
//!
//! ```text
//!   ┌─────────┐  start  ┌─────────┐  stop   ┌─────────┐  remove  ┌─────────┐
//!   │ Created │ ──────► │ Started │ ──────► │ Stopped │ ───────► │ Removed │
//!   └─────────┘         └────┬────┘         └─────────┘          └─────────┘
//!                            │ process exits                          ▲
//!                            ▼                                        │
//!                       ┌─────────┐               remove              │
//!                       │ Exited  │ ──────────────────────────────────┘
//!                       └─────────┘
//! ```
//!
//! [`ContainerManager::create_container`]: crate::manager::ContainerManager::create_container

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Volumes
// =============================================================================

/// What a volume projects into the execution environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeType {
    /// Source tree bind mount.
    Bind,
    /// Build cache directory.
    Cache,
    /// Engine control socket.
    Socket,
}

/// A host resource projected into a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub kind: VolumeType,
    /// Path on the host.
    pub source: String,
    /// Path inside the container.
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

impl Volume {
    /// Creates a read-write bind mount.
    pub fn bind(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: VolumeType::Bind,
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    /// Creates a cache mount.
    pub fn cache(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: VolumeType::Cache,
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    /// Renders the engine bind specification (`source:target[:ro]`).
    pub fn to_bind_spec(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source, self.target)
        } else {
            format!("{}:{}", self.source, self.target)
        }
    }
}

// =============================================================================
// Container Configuration
// =============================================================================

/// Resource limits applied to a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// Memory limit in bytes.
    pub memory_bytes: Option<i64>,
    /// CPU quota in units of 10^-9 CPUs.
    pub nano_cpus: Option<i64>,
}

/// Everything a backend needs to create a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Image reference.
    pub image: String,
    /// Optional container name.
    pub name: Option<String>,
    pub cmd: Vec<String>,
    pub entrypoint: Vec<String>,
    /// Environment in declaration order.
    pub env: Vec<(String, String)>,
    pub volumes: Vec<Volume>,
    pub working_dir: Option<String>,
    pub resources: Resources,
    /// Target platform (`os/arch`).
    pub platform: Option<String>,
    /// Secrets exposed to the process as environment variables.
    pub secrets: BTreeMap<String, String>,
    /// Rendered script to run once the container is up.
    pub script: Option<String>,
}

impl ContainerConfig {
    /// Creates a config for the given image.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = cmd.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_entrypoint<I, S>(mut self, entrypoint: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entrypoint = entrypoint.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_volume(mut self, volume: Volume) -> Self {
        self.volumes.push(volume);
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(key.into(), value.into());
        self
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn with_resources(mut self, resources: Resources) -> Self {
        self.resources = resources;
        self
    }

    /// Returns the full argv: entrypoint followed by cmd.
    pub fn argv(&self) -> Vec<String> {
        self.entrypoint.iter().chain(self.cmd.iter()).cloned().collect()
    }

    /// Returns env and secrets as `KEY=VALUE` pairs, secrets last.
    pub fn env_pairs(&self) -> Vec<String> {
        self.env
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .chain(self.secrets.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }

    /// Returns the volume mounted at the working directory, if any.
    pub fn working_dir_volume(&self) -> Option<&Volume> {
        let dir = self.working_dir.as_deref()?;
        self.volumes
            .iter()
            .find(|v| v.target.trim_end_matches('/') == dir.trim_end_matches('/'))
    }
}

/// Credentials for registry operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
    /// Registry host the credentials apply to.
    pub server: Option<String>,
}

// =============================================================================
// Container State
// =============================================================================

/// Lifecycle status of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Started,
    /// Stopped by request.
    Stopped,
    /// Main process exited on its own.
    Exited,
    Removed,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Started => write!(f, "started"),
            Self::Stopped => write!(f, "stopped"),
            Self::Exited => write!(f, "exited"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// A container as tracked by its owning backend.
#[derive(Debug, Clone)]
pub struct Container {
    pub id: String,
    pub config: ContainerConfig,
    pub status: ContainerStatus,
    pub exit_code: Option<i64>,
    pub created: DateTime<Utc>,
}

impl Container {
    /// Creates a container record in the `Created` state.
    pub fn new(id: impl Into<String>, config: ContainerConfig) -> Self {
        Self {
            id: id.into(),
            config,
            status: ContainerStatus::Created,
            exit_code: None,
            created: Utc::now(),
        }
    }

    /// Returns a listing entry for this container.
    pub fn summary(&self) -> ContainerSummary {
        ContainerSummary {
            id: self.id.clone(),
            image: self.config.image.clone(),
            status: self.status.to_string(),
        }
    }

    /// Returns true while the main process may still be running.
    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Started
    }
}

/// Entry returned by [`ContainerManager::container_list`].
///
/// [`ContainerManager::container_list`]: crate::manager::ContainerManager::container_list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub image: String,
    pub status: String,
}

/// Condition awaited by [`ContainerManager::wait_container`].
///
/// [`ContainerManager::wait_container`]: crate::manager::ContainerManager::wait_container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WaitCondition {
    #[default]
    NotRunning,
    NextExit,
    Removed,
}

impl WaitCondition {
    /// Engine API spelling of the condition.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRunning => "not-running",
            Self::NextExit => "next-exit",
            Self::Removed => "removed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_joins_entrypoint_and_cmd() {
        let config = ContainerConfig::new("golang")
            .with_entrypoint(["sh", "-c"])
            .with_cmd(["go build ./..."]);
        assert_eq!(config.argv(), vec!["sh", "-c", "go build ./..."]);
    }

    #[test]
    fn env_pairs_put_secrets_last() {
        let config = ContainerConfig::new("golang")
            .with_secret("TOKEN", "s3cr3t")
            .with_env("GOOS", "linux");
        assert_eq!(config.env_pairs(), vec!["GOOS=linux", "TOKEN=s3cr3t"]);
    }

    #[test]
    fn working_dir_volume_ignores_trailing_slash() {
        let config = ContainerConfig::new("golang")
            .with_volume(Volume::cache("/tmp/cache", "/cache"))
            .with_volume(Volume::bind("/home/ci/project", "/src/"))
            .with_working_dir("/src");
        assert_eq!(
            config.working_dir_volume().map(|v| v.source.as_str()),
            Some("/home/ci/project")
        );
    }

    #[test]
    fn bind_spec_marks_read_only() {
        let mut volume = Volume::bind("/a", "/b");
        assert_eq!(volume.to_bind_spec(), "/a:/b");
        volume.read_only = true;
        assert_eq!(volume.to_bind_spec(), "/a:/b:ro");
    }
}
