//! ContainerManager trait - the uniform backend contract.
//!
//! Every execution substrate (a container engine, the host process tree, an
//! in-memory double) implements this trait. Build steps only ever talk to a
//! `dyn ContainerManager`, so the same pipeline runs against any of them.
//!
//! # Contract
//!
//! - Operations after `create_container` reference only ids it returned.
//!   Unknown ids fail with [`Error::ContainerNotFound`]; unknown images with
//!   [`Error::ImageNotFound`]. Neither case panics.
//! - Streams ([`ByteStream`]) are drained and dropped by the caller.
//! - A command that runs and exits non-zero is not an error: its exit code
//!   is returned for the caller to inspect.
//! - `build_multi_arch_image` is a fan-out over `build_image` per platform.
//!   The first failing platform aborts the call and its error is returned.
//!   Images already built for earlier platforms are kept.
//!
//! # Implementations
//!
//! - `EngineRuntime`: Docker and Podman through the Docker API
//! - `HostRuntime`: containers emulated as host processes
//! - `MockRuntime`: deterministic in-memory double for tests

use crate::container::{ContainerConfig, ContainerSummary, RegistryAuth, WaitCondition};
use crate::error::{Error, Result};
use crate::image::ImageInfo;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::path::Path;
use tracing::debug;

// =============================================================================
// Streams
// =============================================================================

/// Byte stream returned by log, exec and build operations.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Wraps an in-memory buffer as a single-chunk stream.
pub fn stream_from_bytes(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    if data.is_empty() {
        return empty_stream();
    }
    stream::once(async move { Ok(data) }).boxed()
}

/// Returns a stream that yields nothing.
pub fn empty_stream() -> ByteStream {
    stream::empty().boxed()
}

/// Reads a stream to completion, stopping at the first error.
pub async fn drain(mut stream: ByteStream) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

/// Reads a stream to completion as (lossy) UTF-8.
pub async fn drain_string(stream: ByteStream) -> Result<String> {
    let bytes = drain(stream).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

// =============================================================================
// Operation Results
// =============================================================================

/// Result of [`ContainerManager::exec_container`].
pub struct ExecOutput {
    /// Exit code, `None` when the exec was detached.
    pub exit_code: Option<i64>,
    /// Combined stdout/stderr of the command.
    pub output: ByteStream,
}

impl ExecOutput {
    /// Returns true if the command ran to completion with exit code 0.
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

impl std::fmt::Debug for ExecOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecOutput")
            .field("exit_code", &self.exit_code)
            .finish_non_exhaustive()
    }
}

/// Result of [`ContainerManager::build_multi_arch_image`].
pub struct MultiArchBuild {
    /// Concatenated build output of every platform.
    pub logs: ByteStream,
    /// One tag per platform, in platform order.
    pub tags: Vec<String>,
}

/// Returns the per-platform tag used by multi-arch builds.
///
/// `platform_tag("app", "linux/arm64")` is `app-linux-arm64`.
pub fn platform_tag(name: &str, platform: &str) -> String {
    format!("{}-{}", name, platform.replace('/', "-"))
}

/// Builds `name` once per platform through `manager.build_image`.
///
/// Stops at the first failure. Earlier platform images are left in place.
pub async fn build_per_platform<M>(
    manager: &M,
    dockerfile: &[u8],
    name: &str,
    platforms: &[String],
) -> Result<MultiArchBuild>
where
    M: ContainerManager + ?Sized,
{
    if platforms.is_empty() {
        return Err(Error::BuildFailed {
            image: name.to_string(),
            reason: "no target platforms".to_string(),
        });
    }

    let mut logs = Vec::new();
    let mut tags = Vec::with_capacity(platforms.len());

    for platform in platforms {
        let tag = platform_tag(name, platform);
        debug!("building {} for {}", tag, platform);
        let stream = manager.build_image(dockerfile, &tag, Some(platform)).await?;
        logs.extend(drain(stream).await?);
        tags.push(tag);
    }

    Ok(MultiArchBuild {
        logs: stream_from_bytes(logs),
        tags,
    })
}

// =============================================================================
// ContainerManager Trait
// =============================================================================

/// Polymorphic execution backend.
///
/// # Lifecycle
///
/// ```text
/// create_container → start_container → [exec_container / copy_*] → wait_container
///                  → stop_container → remove_container
/// ```
#[async_trait]
pub trait ContainerManager: Send + Sync {
    /// Returns the backend id (`docker`, `podman`, `host`, `test`).
    fn name(&self) -> &str;

    // =========================================================================
    // Container Lifecycle
    // =========================================================================

    /// Creates a container and returns its id. The config is copied.
    async fn create_container(
        &self,
        config: &ContainerConfig,
        auth: Option<&RegistryAuth>,
    ) -> Result<String>;

    /// Starts a created container.
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Stops a container, optionally with a named signal.
    async fn stop_container(&self, id: &str, signal: Option<&str>) -> Result<()>;

    /// Removes a container.
    async fn remove_container(&self, id: &str, force: bool) -> Result<()>;

    /// Snapshots a container's filesystem as an image and returns its id.
    async fn commit_container(&self, id: &str, image: &str) -> Result<String>;

    /// Lists containers; stopped ones only when `all` is set.
    async fn container_list(&self, all: bool) -> Result<Vec<ContainerSummary>>;

    /// Returns the container's output.
    async fn container_logs(
        &self,
        id: &str,
        stdout: bool,
        stderr: bool,
        follow: bool,
    ) -> Result<ByteStream>;

    /// Returns the config the container was created with.
    async fn inspect_container(&self, id: &str) -> Result<ContainerConfig>;

    /// Blocks until `condition` holds and returns the exit code.
    async fn wait_container(&self, id: &str, condition: WaitCondition) -> Result<i64>;

    /// Runs a command in a started container.
    async fn exec_container(&self, id: &str, cmd: &[String], attach: bool) -> Result<ExecOutput>;

    // =========================================================================
    // File Transfer
    // =========================================================================

    /// Writes `content` to `dest` inside the container.
    async fn copy_content_to_container(&self, id: &str, content: &[u8], dest: &str) -> Result<()>;

    /// Copies a host directory tree into the container at `dest`.
    async fn copy_directory_to_container(&self, id: &str, src: &Path, dest: &str) -> Result<()>;

    /// Copies a single host file into the container at `dest`.
    async fn copy_to_container(&self, id: &str, src: &Path, dest: &str) -> Result<()>;

    /// Reads a file from the container.
    async fn copy_file_from_container(&self, id: &str, path: &str) -> Result<Vec<u8>>;

    // =========================================================================
    // Images
    // =========================================================================

    /// Builds an image from a Dockerfile and returns the build output.
    async fn build_image(
        &self,
        dockerfile: &[u8],
        name: &str,
        platform: Option<&str>,
    ) -> Result<ByteStream>;

    /// Builds one image per platform.
    ///
    /// The default fans out over [`build_image`](Self::build_image); the
    /// build context and credentials are for engines that need them.
    async fn build_multi_arch_image(
        &self,
        dockerfile: &[u8],
        context: Option<&Path>,
        name: &str,
        platforms: &[String],
        auth: Option<&RegistryAuth>,
    ) -> Result<MultiArchBuild> {
        let _ = (context, auth);
        build_per_platform(self, dockerfile, name, platforms).await
    }

    async fn list_images(&self) -> Result<Vec<ImageInfo>>;

    async fn pull_image(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<()>;

    /// Adds `target` as an alias of `source`.
    async fn tag_image(&self, source: &str, target: &str) -> Result<()>;

    async fn push_image(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<()>;

    async fn remove_image(&self, image: &str, force: bool) -> Result<()>;

    async fn inspect_image(&self, image: &str) -> Result<ImageInfo>;
}
