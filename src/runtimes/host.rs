//! # Host Runtime - Containers as Host Processes
//!
//! Implements [`ContainerManager`] without a container engine: a "container"
//! is a native process tree started on the host. Used when builds must run on
//! machines that have no Docker or Podman.
//!
//! ## Lifecycle
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | `create_container` | store config, mint random id, create `<state_root>/<id>/` |
//! | `start_container` | spawn `entrypoint ++ cmd`, pipe stdout/stderr into buffers |
//! | (background) | waiter task owns the child and publishes its exit code |
//! | `wait_container` | block on the waiter's barrier |
//! | `container_logs` | drain the captured buffers |
//! | `stop_container` | ask the waiter to kill the child |
//! | `remove_container` | drop the entry, delete the state directory |
//!
//! ## Virtual Targets
//!
//! A container path cannot be written on the host, so the backend declares a
//! set of [`VirtualTarget`]s, each resolved to a file in the container's state
//! directory. By default only [`SCRIPT_PATH`] is declared. Content copied to
//! a virtual target has every `<working_dir>/` prefix stripped, so a script
//! written against the mount path runs relative to the real source tree.
//! Copies to undeclared destinations are not supported.
//!
//! ## Working Directory
//!
//! The process runs in the host source of the volume mounted at the
//! configured working directory. Without such a volume it runs in the
//! working directory itself when that exists on the host, else in the
//! current directory.
//!
//! ## Locking
//!
//! The whole container table sits behind one `RwLock`, including for
//! single-container log reads. The lock is never held across an `.await`.
//!
//! [`ContainerManager`]: crate::manager::ContainerManager

use crate::constants::{
    CONTAINER_ID_BYTES, CONTAINER_ID_LEN, SCRIPT_PATH, SIGNALED_EXIT_CODE, default_state_root,
};
use crate::container::{
    Container, ContainerConfig, ContainerStatus, ContainerSummary, RegistryAuth, WaitCondition,
};
use crate::error::{Error, Result};
use crate::image::{ImageInfo, dockerfile_checksum};
use crate::manager::{ByteStream, ContainerManager, ExecOutput, stream_from_bytes};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const BACKEND: &str = "host";

/// A container path backed by a file in the container's state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualTarget {
    /// Path as seen by build steps.
    pub container_path: String,
    /// File name inside the state directory.
    pub file_name: String,
}

impl VirtualTarget {
    pub fn new(container_path: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            container_path: container_path.into(),
            file_name: file_name.into(),
        }
    }

    /// The build script destination.
    pub fn script() -> Self {
        Self::new(SCRIPT_PATH, "script.sh")
    }
}

/// Output captured from a child's pipes.
type Buffer = Arc<Mutex<Vec<u8>>>;

struct HostContainer {
    record: Container,
    dir: PathBuf,
    workdir: PathBuf,
    stdout: Buffer,
    stderr: Buffer,
    /// Exit barrier; `None` until started.
    exit: Option<watch::Receiver<Option<i64>>>,
    kill: Option<oneshot::Sender<()>>,
}

impl HostContainer {
    /// Status with a finished process reported as exited.
    fn effective_status(&self) -> (ContainerStatus, Option<i64>) {
        let exited = self.exit.as_ref().and_then(|rx| *rx.borrow());
        match (self.record.status, exited) {
            (ContainerStatus::Started, Some(code)) => (ContainerStatus::Exited, Some(code)),
            (status, code) => (status, self.record.exit_code.or(code)),
        }
    }
}

/// Runs containers as host processes.
pub struct HostRuntime {
    state_root: PathBuf,
    targets: Vec<VirtualTarget>,
    containers: RwLock<HashMap<String, HostContainer>>,
    images: RwLock<HashMap<String, ImageInfo>>,
}

impl HostRuntime {
    /// Creates a host runtime under the default state root.
    pub fn new() -> Self {
        Self::with_state_root(default_state_root())
    }

    /// Creates a host runtime with a custom state root.
    pub fn with_state_root(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
            targets: vec![VirtualTarget::script()],
            containers: RwLock::new(HashMap::new()),
            images: RwLock::new(HashMap::new()),
        }
    }

    /// Declares an additional virtual target.
    pub fn with_virtual_target(mut self, target: VirtualTarget) -> Self {
        self.targets.push(target);
        self
    }

    /// Returns the state root.
    pub fn state_root(&self) -> &Path {
        &self.state_root
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, HostContainer>>> {
        self.containers
            .read()
            .map_err(|e| Error::Internal(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, HostContainer>>> {
        self.containers
            .write()
            .map_err(|e| Error::Internal(format!("lock poisoned: {}", e)))
    }

    fn images_read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, ImageInfo>>> {
        self.images
            .read()
            .map_err(|e| Error::Internal(format!("lock poisoned: {}", e)))
    }

    fn images_write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, ImageInfo>>> {
        self.images
            .write()
            .map_err(|e| Error::Internal(format!("lock poisoned: {}", e)))
    }

    fn target(&self, container_path: &str) -> Option<&VirtualTarget> {
        self.targets.iter().find(|t| t.container_path == container_path)
    }

    /// Maps virtual targets in `args` to their host files.
    fn resolve_args(&self, dir: &Path, args: &[String]) -> Vec<String> {
        args.iter()
            .map(|arg| match self.target(arg) {
                Some(target) => dir.join(&target.file_name).to_string_lossy().into_owned(),
                None => arg.clone(),
            })
            .collect()
    }

    /// Returns what an exec or process needs from a container entry.
    fn launch_context(&self, id: &str) -> Result<(PathBuf, PathBuf, ContainerConfig)> {
        let containers = self.read()?;
        let c = containers
            .get(id)
            .ok_or_else(|| Error::ContainerNotFound(id.to_string()))?;
        Ok((c.dir.clone(), c.workdir.clone(), c.record.config.clone()))
    }
}

impl Default for HostRuntime {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Mints a path-safe random container id.
pub fn new_container_id() -> String {
    let bytes: [u8; CONTAINER_ID_BYTES] = rand::random();
    let mut id = URL_SAFE_NO_PAD.encode(bytes);
    id.truncate(CONTAINER_ID_LEN);
    id
}

/// Rewrites content so paths under the working directory become relative.
///
/// `<wd>/x` becomes `x`, and a bare `<wd>` becomes `.`. Only whole path
/// components match: `/usr/src` and `/src2` are left alone for `/src`.
pub fn strip_working_dir(content: &[u8], working_dir: Option<&str>) -> Vec<u8> {
    let Some(dir) = working_dir
        .map(|d| d.trim_end_matches('/'))
        .filter(|d| !d.is_empty())
    else {
        return content.to_vec();
    };
    let Ok(text) = std::str::from_utf8(content) else {
        return content.to_vec();
    };

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find(dir) {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + dir.len()..];
        let at_boundary = !out.chars().next_back().is_some_and(is_path_char);

        match after.chars().next() {
            Some('/') if at_boundary => {
                rest = &after[1..];
                if !rest.chars().next().is_some_and(is_path_char) {
                    out.push('.');
                }
            }
            next if at_boundary && !next.is_some_and(is_path_char) => {
                out.push('.');
                rest = after;
            }
            _ => {
                out.push_str(dir);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out.into_bytes()
}

fn is_path_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '/' | '.' | '-' | '_')
}

/// Resolves the host directory a container's processes run in.
fn resolve_workdir(config: &ContainerConfig) -> PathBuf {
    if let Some(volume) = config.working_dir_volume() {
        return PathBuf::from(&volume.source);
    }
    if let Some(dir) = config.working_dir.as_deref().map(Path::new)
        && dir.is_dir()
    {
        return dir.to_path_buf();
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn exit_code_of(status: std::io::Result<ExitStatus>) -> i64 {
    match status {
        Ok(status) => status.code().map(i64::from).unwrap_or(SIGNALED_EXIT_CODE),
        Err(e) => {
            warn!("failed to reap host process: {}", e);
            SIGNALED_EXIT_CODE
        }
    }
}

fn spawn_reader<R>(mut pipe: R, sink: Buffer) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    if let Ok(mut buf) = sink.lock() {
                        buf.extend_from_slice(&chunk[..n]);
                    }
                }
                Err(e) => {
                    debug!("host pipe read ended: {}", e);
                    break;
                }
            }
        }
    })
}

fn snapshot(buffer: &Buffer) -> Vec<u8> {
    buffer.lock().map(|b| b.clone()).unwrap_or_default()
}

fn host_command(argv: &[String], workdir: &Path, config: &ContainerConfig) -> Command {
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..]).current_dir(workdir).stdin(Stdio::null());
    let env = config.env.iter().map(|(k, v)| (k, v));
    for (key, value) in env.chain(config.secrets.iter()) {
        cmd.env(key, value);
    }
    cmd
}

// =============================================================================
// ContainerManager Implementation
// =============================================================================

#[async_trait]
impl ContainerManager for HostRuntime {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn create_container(
        &self,
        config: &ContainerConfig,
        _auth: Option<&RegistryAuth>,
    ) -> Result<String> {
        let id = new_container_id();
        let dir = self.state_root.join(&id);
        std::fs::create_dir_all(&dir).map_err(|e| Error::CreateFailed {
            image: config.image.clone(),
            reason: format!("cannot create {}: {}", dir.display(), e),
        })?;

        let entry = HostContainer {
            record: Container::new(id.clone(), config.clone()),
            workdir: resolve_workdir(config),
            dir,
            stdout: Buffer::default(),
            stderr: Buffer::default(),
            exit: None,
            kill: None,
        };

        self.write()?.insert(id.clone(), entry);
        info!("Created host container {} ({})", id, config.image);
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        debug!("Starting host container {}", id);
        let mut containers = self.write()?;
        let c = containers
            .get_mut(id)
            .ok_or_else(|| Error::ContainerNotFound(id.to_string()))?;

        if c.record.status != ContainerStatus::Created {
            return Err(Error::InvalidState {
                id: id.to_string(),
                state: c.record.status.to_string(),
                expected: "created".to_string(),
            });
        }

        let argv = self.resolve_args(&c.dir, &c.record.config.argv());
        let (exit_tx, exit_rx) = watch::channel(None);

        if argv.is_empty() {
            debug!("host container {} has no command: exiting immediately", id);
            let _ = exit_tx.send(Some(0));
            c.exit = Some(exit_rx);
            c.record.status = ContainerStatus::Started;
            return Ok(());
        }

        let mut child = host_command(&argv, &c.workdir, &c.record.config)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::StartFailed {
                id: id.to_string(),
                reason: format!("failed to spawn {}: {}", argv[0], e),
            })?;

        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(spawn_reader(out, c.stdout.clone()));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(spawn_reader(err, c.stderr.clone()));
        }

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let container_id = id.to_string();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        warn!("failed to kill host container {}: {}", container_id, e);
                    }
                    child.wait().await
                }
            };
            // Pipes hit EOF once the process is gone; flush them before
            // releasing waiters so logs are complete.
            for reader in readers {
                let _ = reader.await;
            }
            let code = exit_code_of(status);
            debug!("host container {} exited with {}", container_id, code);
            let _ = exit_tx.send(Some(code));
        });

        c.exit = Some(exit_rx);
        c.kill = Some(kill_tx);
        c.record.status = ContainerStatus::Started;
        info!("Started host container {} ({})", id, argv.join(" "));
        Ok(())
    }

    async fn stop_container(&self, id: &str, signal: Option<&str>) -> Result<()> {
        debug!("Stopping host container {} (signal={:?})", id, signal);
        let mut containers = self.write()?;
        let c = containers
            .get_mut(id)
            .ok_or_else(|| Error::ContainerNotFound(id.to_string()))?;

        if let Some(kill) = c.kill.take() {
            let _ = kill.send(());
        }
        if c.record.status == ContainerStatus::Started {
            c.record.status = ContainerStatus::Stopped;
        }
        info!("Stopped host container {}", id);
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        let mut containers = self.write()?;
        let c = containers
            .get(id)
            .ok_or_else(|| Error::ContainerNotFound(id.to_string()))?;

        let (status, _) = c.effective_status();
        if status == ContainerStatus::Started && !force {
            return Err(Error::InvalidState {
                id: id.to_string(),
                state: status.to_string(),
                expected: "stopped".to_string(),
            });
        }

        let Some(mut c) = containers.remove(id) else {
            return Err(Error::ContainerNotFound(id.to_string()));
        };
        drop(containers);

        if let Some(kill) = c.kill.take() {
            let _ = kill.send(());
        }
        if let Err(e) = std::fs::remove_dir_all(&c.dir)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("failed to remove {}: {}", c.dir.display(), e);
        }
        info!("Removed host container {}", id);
        Ok(())
    }

    async fn commit_container(&self, _id: &str, _image: &str) -> Result<String> {
        Err(Error::not_supported(BACKEND, "commit_container"))
    }

    async fn container_list(&self, all: bool) -> Result<Vec<ContainerSummary>> {
        let containers = self.read()?;
        let mut list: Vec<_> = containers
            .values()
            .filter_map(|c| {
                let (status, _) = c.effective_status();
                (all || status == ContainerStatus::Started).then(|| ContainerSummary {
                    id: c.record.id.clone(),
                    image: c.record.config.image.clone(),
                    status: status.to_string(),
                })
            })
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }

    async fn container_logs(
        &self,
        id: &str,
        stdout: bool,
        stderr: bool,
        follow: bool,
    ) -> Result<ByteStream> {
        if follow {
            let running = {
                let containers = self.read()?;
                let c = containers
                    .get(id)
                    .ok_or_else(|| Error::ContainerNotFound(id.to_string()))?;
                c.exit.is_some()
            };
            if running {
                self.wait_container(id, WaitCondition::NotRunning).await?;
            }
        }

        let containers = self.read()?;
        let c = containers
            .get(id)
            .ok_or_else(|| Error::ContainerNotFound(id.to_string()))?;
        let mut out = Vec::new();
        if stdout {
            out.extend(snapshot(&c.stdout));
        }
        if stderr {
            out.extend(snapshot(&c.stderr));
        }
        Ok(stream_from_bytes(out))
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerConfig> {
        let containers = self.read()?;
        containers
            .get(id)
            .map(|c| c.record.config.clone())
            .ok_or_else(|| Error::ContainerNotFound(id.to_string()))
    }

    async fn wait_container(&self, id: &str, _condition: WaitCondition) -> Result<i64> {
        let mut exit = {
            let containers = self.read()?;
            let c = containers
                .get(id)
                .ok_or_else(|| Error::ContainerNotFound(id.to_string()))?;
            c.exit.clone().ok_or_else(|| Error::InvalidState {
                id: id.to_string(),
                state: c.record.status.to_string(),
                expected: "started".to_string(),
            })?
        };

        let code = {
            let resolved = exit
                .wait_for(Option::is_some)
                .await
                .map_err(|_| Error::Internal(format!("waiter for container {} vanished", id)))?;
            (*resolved).unwrap_or(SIGNALED_EXIT_CODE)
        };

        if let Some(c) = self.write()?.get_mut(id) {
            c.record.exit_code = Some(code);
            if c.record.status == ContainerStatus::Started {
                c.record.status = ContainerStatus::Exited;
            }
        }
        Ok(code)
    }

    async fn exec_container(&self, id: &str, cmd: &[String], attach: bool) -> Result<ExecOutput> {
        if cmd.is_empty() {
            return Err(Error::ExecFailed {
                container: id.to_string(),
                reason: "empty command".to_string(),
            });
        }

        let (dir, workdir, config) = self.launch_context(id)?;
        let argv = self.resolve_args(&dir, cmd);
        debug!("Executing {:?} in host container {}", argv, id);

        let mut command = host_command(&argv, &workdir, &config);

        if !attach {
            command.stdout(Stdio::null()).stderr(Stdio::null());
            command.spawn().map_err(|e| Error::ExecFailed {
                container: id.to_string(),
                reason: format!("failed to spawn {}: {}", argv[0], e),
            })?;
            return Ok(ExecOutput {
                exit_code: None,
                output: stream_from_bytes(Vec::new()),
            });
        }

        let out = command.output().await.map_err(|e| Error::ExecFailed {
            container: id.to_string(),
            reason: format!("failed to run {}: {}", argv[0], e),
        })?;

        let exit_code = exit_code_of(Ok(out.status));
        debug!("Exec in host container {} completed with exit code {}", id, exit_code);

        let mut output = out.stdout;
        output.extend(out.stderr);
        Ok(ExecOutput {
            exit_code: Some(exit_code),
            output: stream_from_bytes(output),
        })
    }

    async fn copy_content_to_container(&self, id: &str, content: &[u8], dest: &str) -> Result<()> {
        let (dir, _, config) = self.launch_context(id)?;
        let target = self
            .target(dest)
            .ok_or_else(|| Error::not_supported(BACKEND, format!("copy to {}", dest)))?;

        let path = dir.join(&target.file_name);
        let content = strip_working_dir(content, config.working_dir.as_deref());
        tokio::fs::write(&path, content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).await?;
        }

        debug!("copied {} to {} for host container {}", dest, path.display(), id);
        Ok(())
    }

    async fn copy_directory_to_container(&self, _id: &str, _src: &Path, dest: &str) -> Result<()> {
        Err(Error::not_supported(BACKEND, format!("copy directory to {}", dest)))
    }

    async fn copy_to_container(&self, _id: &str, _src: &Path, dest: &str) -> Result<()> {
        Err(Error::not_supported(BACKEND, format!("copy file to {}", dest)))
    }

    async fn copy_file_from_container(&self, id: &str, path: &str) -> Result<Vec<u8>> {
        let (dir, workdir, config) = self.launch_context(id)?;

        let host_path = if let Some(target) = self.target(path) {
            dir.join(&target.file_name)
        } else {
            let relative = config
                .working_dir
                .as_deref()
                .map(|wd| wd.trim_end_matches('/'))
                .filter(|wd| !wd.is_empty())
                .and_then(|wd| path.strip_prefix(wd))
                .and_then(|rest| rest.strip_prefix('/').or((rest.is_empty()).then_some(rest)));
            match relative {
                Some(rel) => workdir.join(rel),
                None => PathBuf::from(path),
            }
        };

        Ok(tokio::fs::read(&host_path).await?)
    }

    async fn build_image(
        &self,
        dockerfile: &[u8],
        name: &str,
        platform: Option<&str>,
    ) -> Result<ByteStream> {
        self.images_write()?.insert(
            name.to_string(),
            ImageInfo {
                name: name.to_string(),
                id: format!("sha256:{}", dockerfile_checksum(dockerfile)),
                platform: platform.map(str::to_string),
                dockerfile: Some(dockerfile.to_vec()),
            },
        );
        info!("host runtime recorded image {} without building", name);
        Ok(stream_from_bytes(format!(
            "host runtime: recorded {} (no image build on host)\n",
            name
        )))
    }

    async fn list_images(&self) -> Result<Vec<ImageInfo>> {
        let mut images: Vec<_> = self.images_read()?.values().cloned().collect();
        images.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(images)
    }

    async fn pull_image(&self, image: &str, _auth: Option<&RegistryAuth>) -> Result<()> {
        debug!("host runtime: pull of {} is a no-op", image);
        self.images_write()?
            .entry(image.to_string())
            .or_insert_with(|| ImageInfo {
                name: image.to_string(),
                id: format!("sha256:{}", dockerfile_checksum(image.as_bytes())),
                platform: None,
                dockerfile: None,
            });
        Ok(())
    }

    async fn tag_image(&self, source: &str, target: &str) -> Result<()> {
        let mut images = self.images_write()?;
        let mut alias = images
            .get(source)
            .cloned()
            .ok_or_else(|| Error::ImageNotFound(source.to_string()))?;
        alias.name = target.to_string();
        images.insert(target.to_string(), alias);
        Ok(())
    }

    async fn push_image(&self, image: &str, _auth: Option<&RegistryAuth>) -> Result<()> {
        Err(Error::not_supported(BACKEND, format!("push {}", image)))
    }

    async fn remove_image(&self, image: &str, _force: bool) -> Result<()> {
        self.images_write()?
            .remove(image)
            .map(|_| ())
            .ok_or_else(|| Error::ImageNotFound(image.to_string()))
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageInfo> {
        self.images_read()?
            .get(image)
            .cloned()
            .ok_or_else(|| Error::ImageNotFound(image.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_path_safe_and_fixed_length() {
        for _ in 0..64 {
            let id = new_container_id();
            assert_eq!(id.len(), CONTAINER_ID_LEN);
            assert!(
                id.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
                "unexpected character in {}",
                id
            );
        }
    }

    #[test]
    fn ids_differ() {
        assert_ne!(new_container_id(), new_container_id());
    }

    #[test]
    fn strips_working_dir_prefix() {
        let script = b"cd /src/cmd/app && go build -o /src/bin/app .\n";
        assert_eq!(
            strip_working_dir(script, Some("/src")),
            b"cd cmd/app && go build -o bin/app .\n".to_vec()
        );
    }

    #[test]
    fn strips_bare_working_dir() {
        assert_eq!(
            strip_working_dir(b"cd /src && make\n", Some("/src/")),
            b"cd . && make\n".to_vec()
        );
        assert_eq!(strip_working_dir(b"ls /src/", Some("/src")), b"ls .".to_vec());
        assert_eq!(
            strip_working_dir(b"cp \"/src\" /usr/src /src2", Some("/src")),
            b"cp \".\" /usr/src /src2".to_vec()
        );
    }

    #[test]
    fn strip_without_working_dir_is_identity() {
        let script = b"echo /src/x";
        assert_eq!(strip_working_dir(script, None), script.to_vec());
        assert_eq!(strip_working_dir(script, Some("/")), script.to_vec());
    }

    #[test]
    fn resolves_virtual_args() {
        let runtime = HostRuntime::with_state_root("/tmp/state");
        let args = vec!["sh".to_string(), SCRIPT_PATH.to_string()];
        let resolved = runtime.resolve_args(Path::new("/tmp/state/abc"), &args);
        assert_eq!(resolved, vec!["sh", "/tmp/state/abc/script.sh"]);
    }
}
