//! # Mock Runtime - Deterministic In-Memory Backend
//!
//! Implements [`ContainerManager`] over in-memory tables. Nothing is
//! executed; every operation only updates the tables and the call counters,
//! which makes pipelines testable without an engine.
//!
//! ## Scripted Behavior
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | `start_container` | status `started`, logs `container starting`, `container running` |
//! | `stop_container` | status `stopped`, appends `container stopped` |
//! | `container_logs` | lines joined by `\n`; no seeded logs → not found |
//! | `build_multi_arch_image` | one image per platform, named with [`platform_tag`] |
//! | `pull_image` | fails for names registered with [`MockRuntime::inject_pull_error`] |
//!
//! [`ContainerManager`]: crate::manager::ContainerManager
//! [`platform_tag`]: crate::manager::platform_tag

use crate::container::{
    Container, ContainerConfig, ContainerStatus, ContainerSummary, RegistryAuth, WaitCondition,
};
use crate::error::{Error, Result};
use crate::image::{ImageInfo, dockerfile_checksum};
use crate::manager::{ByteStream, ContainerManager, ExecOutput, stream_from_bytes};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Log line seeded when a container starts.
pub const LOG_STARTING: &str = "container starting";
/// Log line seeded when a container starts.
pub const LOG_RUNNING: &str = "container running";
/// Log line appended when a container stops.
pub const LOG_STOPPED: &str = "container stopped";

/// Operation counters, for asserting which side effects a caller triggered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub create: usize,
    pub start: usize,
    pub stop: usize,
    pub remove: usize,
    pub exec: usize,
    pub pull: usize,
    pub build: usize,
}

impl MockCalls {
    /// Total number of recorded calls.
    pub fn total(&self) -> usize {
        self.create + self.start + self.stop + self.remove + self.exec + self.pull + self.build
    }
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    containers: HashMap<String, Container>,
    logs: HashMap<String, Vec<String>>,
    files: HashMap<(String, String), Vec<u8>>,
    images: HashMap<String, ImageInfo>,
    pull_errors: HashMap<String, String>,
    build_errors: HashMap<String, String>,
    execs: Vec<(String, Vec<String>)>,
    exec_exit_code: i64,
    exec_output: Vec<u8>,
    calls: MockCalls,
}

/// In-memory test double for [`ContainerManager`].
///
/// Thread-safe; all tables live behind one `RwLock`.
#[derive(Default)]
pub struct MockRuntime {
    state: RwLock<MockState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MockState>> {
        self.state
            .read()
            .map_err(|e| Error::Internal(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MockState>> {
        self.state
            .write()
            .map_err(|e| Error::Internal(format!("lock poisoned: {}", e)))
    }

    // =========================================================================
    // Test Controls
    // =========================================================================

    /// Makes `pull_image(image)` fail with `reason`.
    pub fn inject_pull_error(&self, image: impl Into<String>, reason: impl Into<String>) {
        if let Ok(mut state) = self.write() {
            state.pull_errors.insert(image.into(), reason.into());
        }
    }

    /// Makes `build_image(name)` fail with `reason`.
    pub fn inject_build_error(&self, name: impl Into<String>, reason: impl Into<String>) {
        if let Ok(mut state) = self.write() {
            state.build_errors.insert(name.into(), reason.into());
        }
    }

    /// Sets the exit code a container reports from `wait_container`.
    pub fn set_exit_code(&self, id: &str, code: i64) -> Result<()> {
        let mut state = self.write()?;
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| Error::ContainerNotFound(id.to_string()))?;
        container.exit_code = Some(code);
        Ok(())
    }

    /// Sets the exit code and output of every subsequent exec.
    pub fn set_exec_result(&self, exit_code: i64, output: impl Into<Vec<u8>>) {
        if let Ok(mut state) = self.write() {
            state.exec_exit_code = exit_code;
            state.exec_output = output.into();
        }
    }

    /// Seeds an image as if it had been pulled.
    pub fn add_image(&self, name: impl Into<String>) {
        let name = name.into();
        if let Ok(mut state) = self.write() {
            let info = ImageInfo {
                id: format!("sha256:{}", dockerfile_checksum(name.as_bytes())),
                name: name.clone(),
                platform: None,
                dockerfile: None,
            };
            state.images.insert(name, info);
        }
    }

    /// Returns the operation counters.
    pub fn calls(&self) -> MockCalls {
        self.read().map(|s| s.calls).unwrap_or_default()
    }

    /// Returns every exec as `(container id, argv)`.
    pub fn execs(&self) -> Vec<(String, Vec<String>)> {
        self.read().map(|s| s.execs.clone()).unwrap_or_default()
    }

    /// Returns the status of a container.
    pub fn status(&self, id: &str) -> Result<ContainerStatus> {
        let state = self.read()?;
        state
            .containers
            .get(id)
            .map(|c| c.status)
            .ok_or_else(|| Error::ContainerNotFound(id.to_string()))
    }

    /// Returns the seeded log lines of a container.
    pub fn log_lines(&self, id: &str) -> Vec<String> {
        self.read()
            .ok()
            .and_then(|s| s.logs.get(id).cloned())
            .unwrap_or_default()
    }

    /// Returns the content copied to `path` in a container.
    pub fn file(&self, id: &str, path: &str) -> Option<Vec<u8>> {
        self.read()
            .ok()
            .and_then(|s| s.files.get(&(id.to_string(), path.to_string())).cloned())
    }
}

fn require<'a>(state: &'a MockState, id: &str) -> Result<&'a Container> {
    state
        .containers
        .get(id)
        .ok_or_else(|| Error::ContainerNotFound(id.to_string()))
}

fn require_mut<'a>(state: &'a mut MockState, id: &str) -> Result<&'a mut Container> {
    state
        .containers
        .get_mut(id)
        .ok_or_else(|| Error::ContainerNotFound(id.to_string()))
}

fn collect_files(dir: &Path, dest: &str, out: &mut Vec<(String, Vec<u8>)>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let target = format!("{}/{}", dest.trim_end_matches('/'), name);
        if entry.file_type()?.is_dir() {
            collect_files(&entry.path(), &target, out)?;
        } else {
            out.push((target, std::fs::read(entry.path())?));
        }
    }
    Ok(())
}

#[async_trait]
impl ContainerManager for MockRuntime {
    fn name(&self) -> &str {
        "test"
    }

    async fn create_container(
        &self,
        config: &ContainerConfig,
        _auth: Option<&RegistryAuth>,
    ) -> Result<String> {
        let mut state = self.write()?;
        state.calls.create += 1;
        state.next_id += 1;
        let id = format!("mock-{}", state.next_id);
        state
            .containers
            .insert(id.clone(), Container::new(id.clone(), config.clone()));
        debug!("mock: created container {} from {}", id, config.image);
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let mut state = self.write()?;
        state.calls.start += 1;
        require_mut(&mut state, id)?.status = ContainerStatus::Started;
        state.logs.insert(
            id.to_string(),
            vec![LOG_STARTING.to_string(), LOG_RUNNING.to_string()],
        );
        Ok(())
    }

    async fn stop_container(&self, id: &str, _signal: Option<&str>) -> Result<()> {
        let mut state = self.write()?;
        state.calls.stop += 1;
        require_mut(&mut state, id)?.status = ContainerStatus::Stopped;
        state
            .logs
            .entry(id.to_string())
            .or_default()
            .push(LOG_STOPPED.to_string());
        Ok(())
    }

    async fn remove_container(&self, id: &str, _force: bool) -> Result<()> {
        let mut state = self.write()?;
        state.calls.remove += 1;
        state
            .containers
            .remove(id)
            .ok_or_else(|| Error::ContainerNotFound(id.to_string()))?;
        state.logs.remove(id);
        state.files.retain(|(owner, _), _| owner != id);
        Ok(())
    }

    async fn commit_container(&self, id: &str, image: &str) -> Result<String> {
        let mut state = self.write()?;
        let platform = require(&state, id)?.config.platform.clone();
        let digest = dockerfile_checksum(format!("{}:{}", id, image).as_bytes());
        let image_id = format!("sha256:{}", digest);
        state.images.insert(
            image.to_string(),
            ImageInfo {
                name: image.to_string(),
                id: image_id.clone(),
                platform,
                dockerfile: None,
            },
        );
        Ok(image_id)
    }

    async fn container_list(&self, all: bool) -> Result<Vec<ContainerSummary>> {
        let state = self.read()?;
        let mut list: Vec<_> = state
            .containers
            .values()
            .filter(|c| all || c.is_running())
            .map(Container::summary)
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }

    async fn container_logs(
        &self,
        id: &str,
        _stdout: bool,
        _stderr: bool,
        _follow: bool,
    ) -> Result<ByteStream> {
        let state = self.read()?;
        require(&state, id)?;
        let lines = state
            .logs
            .get(id)
            .ok_or_else(|| Error::ContainerNotFound(id.to_string()))?;
        Ok(stream_from_bytes(lines.join("\n")))
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerConfig> {
        let state = self.read()?;
        Ok(require(&state, id)?.config.clone())
    }

    async fn wait_container(&self, id: &str, _condition: WaitCondition) -> Result<i64> {
        let mut state = self.write()?;
        let container = require_mut(&mut state, id)?;
        if container.status == ContainerStatus::Started {
            container.status = ContainerStatus::Exited;
        }
        let code = *container.exit_code.get_or_insert(0);
        Ok(code)
    }

    async fn exec_container(&self, id: &str, cmd: &[String], attach: bool) -> Result<ExecOutput> {
        let mut state = self.write()?;
        state.calls.exec += 1;
        require(&state, id)?;
        state.execs.push((id.to_string(), cmd.to_vec()));
        if !attach {
            return Ok(ExecOutput {
                exit_code: None,
                output: stream_from_bytes(Vec::new()),
            });
        }
        Ok(ExecOutput {
            exit_code: Some(state.exec_exit_code),
            output: stream_from_bytes(state.exec_output.clone()),
        })
    }

    async fn copy_content_to_container(&self, id: &str, content: &[u8], dest: &str) -> Result<()> {
        let mut state = self.write()?;
        require(&state, id)?;
        state
            .files
            .insert((id.to_string(), dest.to_string()), content.to_vec());
        Ok(())
    }

    async fn copy_directory_to_container(&self, id: &str, src: &Path, dest: &str) -> Result<()> {
        require(&*self.read()?, id)?;
        let mut files = Vec::new();
        collect_files(src, dest, &mut files)?;
        let mut state = self.write()?;
        for (path, content) in files {
            state.files.insert((id.to_string(), path), content);
        }
        Ok(())
    }

    async fn copy_to_container(&self, id: &str, src: &Path, dest: &str) -> Result<()> {
        let content = std::fs::read(src)?;
        self.copy_content_to_container(id, &content, dest).await
    }

    async fn copy_file_from_container(&self, id: &str, path: &str) -> Result<Vec<u8>> {
        let state = self.read()?;
        require(&state, id)?;
        state
            .files
            .get(&(id.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} not found in container {}", path, id),
                ))
            })
    }

    async fn build_image(
        &self,
        dockerfile: &[u8],
        name: &str,
        platform: Option<&str>,
    ) -> Result<ByteStream> {
        let mut state = self.write()?;
        state.calls.build += 1;
        if let Some(reason) = state.build_errors.get(name) {
            return Err(Error::BuildFailed {
                image: name.to_string(),
                reason: reason.clone(),
            });
        }
        state.images.insert(
            name.to_string(),
            ImageInfo {
                name: name.to_string(),
                id: format!("sha256:{}", dockerfile_checksum(dockerfile)),
                platform: platform.map(str::to_string),
                dockerfile: Some(dockerfile.to_vec()),
            },
        );
        Ok(stream_from_bytes(format!("Successfully built {}\n", name)))
    }

    async fn list_images(&self) -> Result<Vec<ImageInfo>> {
        let state = self.read()?;
        let mut images: Vec<_> = state.images.values().cloned().collect();
        images.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(images)
    }

    async fn pull_image(&self, image: &str, _auth: Option<&RegistryAuth>) -> Result<()> {
        let mut state = self.write()?;
        state.calls.pull += 1;
        if let Some(reason) = state.pull_errors.get(image) {
            return Err(Error::ImagePullFailed {
                reference: image.to_string(),
                reason: reason.clone(),
            });
        }
        let info = ImageInfo {
            name: image.to_string(),
            id: format!("sha256:{}", dockerfile_checksum(image.as_bytes())),
            platform: None,
            dockerfile: None,
        };
        state.images.insert(image.to_string(), info);
        Ok(())
    }

    async fn tag_image(&self, source: &str, target: &str) -> Result<()> {
        let mut state = self.write()?;
        let mut alias = state
            .images
            .get(source)
            .cloned()
            .ok_or_else(|| Error::ImageNotFound(source.to_string()))?;
        alias.name = target.to_string();
        state.images.insert(target.to_string(), alias);
        Ok(())
    }

    async fn push_image(&self, image: &str, _auth: Option<&RegistryAuth>) -> Result<()> {
        let state = self.read()?;
        if !state.images.contains_key(image) {
            return Err(Error::ImageNotFound(image.to_string()));
        }
        Ok(())
    }

    async fn remove_image(&self, image: &str, _force: bool) -> Result<()> {
        let mut state = self.write()?;
        state
            .images
            .remove(image)
            .map(|_| ())
            .ok_or_else(|| Error::ImageNotFound(image.to_string()))
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageInfo> {
        let state = self.read()?;
        state
            .images
            .get(image)
            .cloned()
            .ok_or_else(|| Error::ImageNotFound(image.to_string()))
    }
}
