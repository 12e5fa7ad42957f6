//! # Engine Runtime - Docker and Podman via the Docker API
//!
//! Thin proxy from [`ContainerManager`] to a container engine's HTTP API over
//! its control socket, using `bollard`. Docker and Podman share this
//! implementation: Podman serves a Docker-compatible API on the socket
//! reported by `podman info`.
//!
//! | Runtime | Socket |
//! |---------|--------|
//! | docker  | `/var/run/docker.sock` |
//! | podman  | resolved by [`podman_socket`] |
//!
//! ## Not-Found Mapping
//!
//! Engine 404 responses become [`Error::ContainerNotFound`] or
//! [`Error::ImageNotFound`], so callers see the same failures as with the
//! host and mock backends.
//!
//! ## Config Snapshots
//!
//! Configs passed to `create_container` are kept so `inspect_container`
//! returns exactly what was supplied. Containers created elsewhere are
//! described from the engine's inspect response.
//!
//! [`ContainerManager`]: crate::manager::ContainerManager
//! [`podman_socket`]: crate::socket::podman_socket

use crate::constants::{DOCKER_SOCKET, ENGINE_TIMEOUT_SECS};
use crate::container::{
    ContainerConfig, ContainerSummary, RegistryAuth, Resources, Volume, VolumeType, WaitCondition,
};
use crate::error::{Error, Result};
use crate::image::{ImageInfo, ImageRef};
use crate::manager::{
    ByteStream, ContainerManager, ExecOutput, MultiArchBuild, platform_tag, stream_from_bytes,
};
use crate::runtimes::host::new_container_id;
use crate::socket::podman_socket;
use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config as EngineConfig, CreateContainerOptions, DownloadFromContainerOptions,
    KillContainerOptions, ListContainersOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, UploadToContainerOptions, WaitContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::{
    BuildImageOptions, CommitContainerOptions, CreateImageOptions, ListImagesOptions,
    PushImageOptions, RemoveImageOptions, TagImageOptions,
};
use bollard::models::{ContainerInspectResponse, HostConfig};
use bollard::{API_DEFAULT_VERSION, Docker};
use futures::StreamExt;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::RwLock;
use tracing::{debug, info, warn};

/// Seconds a container gets to exit after SIGTERM on stop.
const STOP_GRACE_SECS: i64 = 10;

#[derive(Debug, Clone, Copy)]
enum Missing {
    Container,
    Image,
}

/// Converts an engine error, mapping 404 to the not-found variants.
fn engine_error(err: bollard::errors::Error, what: Missing, name: &str) -> Error {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => match what {
            Missing::Container => Error::ContainerNotFound(name.to_string()),
            Missing::Image => Error::ImageNotFound(name.to_string()),
        },
        other => Error::Engine(other),
    }
}

fn credentials(auth: Option<&RegistryAuth>) -> Option<DockerCredentials> {
    auth.map(|a| DockerCredentials {
        username: Some(a.username.clone()),
        password: Some(a.password.clone()),
        serveraddress: a.server.clone(),
        ..Default::default()
    })
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}

/// Splits `/a/b/file` into `("/a/b", "file")`.
fn split_dest(dest: &str) -> (String, String) {
    match dest.rsplit_once('/') {
        Some(("", file)) => ("/".to_string(), file.to_string()),
        Some((dir, file)) => (dir.to_string(), file.to_string()),
        None => (".".to_string(), dest.to_string()),
    }
}

/// Commit options that tag the new image as `reference`.
fn commit_options(id: &str, reference: &ImageRef) -> CommitContainerOptions<String> {
    CommitContainerOptions {
        container: id.to_string(),
        repo: reference.repository(),
        tag: reference.tag.clone(),
        pause: true,
        ..Default::default()
    }
}

/// Packs a single file into an in-memory tar archive.
fn tar_file(name: &str, content: &[u8], mode: u32) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(mode);
    header.set_cksum();
    builder.append_data(&mut header, name, content)?;
    Ok(builder.into_inner()?)
}

/// Packs a Dockerfile and optional context directory for a build.
fn build_context(dockerfile: &[u8], context: Option<&Path>) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    if let Some(dir) = context {
        builder.append_dir_all(".", dir)?;
    }
    let mut header = tar::Header::new_gnu();
    header.set_size(dockerfile.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, "Dockerfile", dockerfile)?;
    Ok(builder.into_inner()?)
}

/// Converts a caller config into the engine's create body.
pub fn engine_config(config: &ContainerConfig) -> EngineConfig<String> {
    let binds: Vec<String> = config.volumes.iter().map(Volume::to_bind_spec).collect();
    let host_config = HostConfig {
        binds: (!binds.is_empty()).then_some(binds),
        memory: config.resources.memory_bytes,
        nano_cpus: config.resources.nano_cpus,
        ..Default::default()
    };

    EngineConfig {
        image: Some(config.image.clone()),
        cmd: non_empty(&config.cmd),
        entrypoint: non_empty(&config.entrypoint),
        env: non_empty(&config.env_pairs()),
        working_dir: config.working_dir.clone(),
        tty: Some(false),
        host_config: Some(host_config),
        ..Default::default()
    }
}

/// Describes a container the engine knows but this process did not create.
pub fn config_from_inspect(inspect: &ContainerInspectResponse) -> ContainerConfig {
    let mut config = ContainerConfig::default();

    if let Some(c) = &inspect.config {
        config.image = c.image.clone().unwrap_or_default();
        config.cmd = c.cmd.clone().unwrap_or_default();
        config.entrypoint = c.entrypoint.clone().unwrap_or_default();
        config.working_dir = c.working_dir.clone().filter(|d| !d.is_empty());
        config.env = c
            .env
            .iter()
            .flatten()
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
    }

    if let Some(h) = &inspect.host_config {
        config.volumes = h
            .binds
            .iter()
            .flatten()
            .filter_map(|bind| {
                let mut parts = bind.splitn(3, ':');
                let source = parts.next()?;
                let target = parts.next()?;
                Some(Volume {
                    kind: VolumeType::Bind,
                    source: source.to_string(),
                    target: target.to_string(),
                    read_only: parts.next().is_some_and(|opts| opts.split(',').any(|o| o == "ro")),
                })
            })
            .collect();
        config.resources = Resources {
            memory_bytes: h.memory.filter(|m| *m > 0),
            nano_cpus: h.nano_cpus.filter(|c| *c > 0),
        };
    }

    config.name = inspect
        .name
        .as_deref()
        .map(|n| n.trim_start_matches('/').to_string());
    config.platform = inspect.platform.clone().filter(|p| !p.is_empty());
    config
}

/// Docker-API backend shared by Docker and Podman.
pub struct EngineRuntime {
    name: &'static str,
    docker: Docker,
    configs: RwLock<HashMap<String, ContainerConfig>>,
}

impl EngineRuntime {
    /// Connects to Docker's well-known socket.
    pub fn docker() -> Result<Self> {
        Self::connect("docker", Path::new(DOCKER_SOCKET))
    }

    /// Connects to the socket reported by `podman info`.
    pub fn podman() -> Result<Self> {
        let socket = podman_socket().ok_or_else(|| Error::RuntimeUnavailable {
            runtime: "podman".to_string(),
            reason: "podman socket could not be resolved".to_string(),
        })?;
        Self::connect("podman", &socket)
    }

    /// Connects to an engine socket.
    pub fn connect(name: &'static str, socket: &Path) -> Result<Self> {
        let docker = Docker::connect_with_unix(
            &socket.to_string_lossy(),
            ENGINE_TIMEOUT_SECS,
            API_DEFAULT_VERSION,
        )
        .map_err(|e| Error::RuntimeUnavailable {
            runtime: name.to_string(),
            reason: format!("cannot connect to {}: {}", socket.display(), e),
        })?;

        info!("{} runtime using socket {}", name, socket.display());
        Ok(Self {
            name,
            docker,
            configs: RwLock::new(HashMap::new()),
        })
    }

    fn stored_config(&self, id: &str) -> Result<Option<ContainerConfig>> {
        let configs = self
            .configs
            .read()
            .map_err(|e| Error::Internal(format!("lock poisoned: {}", e)))?;
        Ok(configs.get(id).cloned())
    }

    async fn upload(&self, id: &str, dir: &str, archive: Vec<u8>) -> Result<()> {
        let options = UploadToContainerOptions {
            path: dir.to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(id, Some(options), archive.into())
            .await
            .map_err(|e| engine_error(e, Missing::Container, id))
    }

    async fn build(
        &self,
        dockerfile: &[u8],
        context: Option<&Path>,
        name: &str,
        platform: Option<&str>,
        auth: Option<&RegistryAuth>,
    ) -> Result<Vec<u8>> {
        let archive = build_context(dockerfile, context)?;
        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: name.to_string(),
            platform: platform.unwrap_or_default().to_string(),
            rm: true,
            ..Default::default()
        };
        let registry_config = auth.and_then(|a| {
            let server = a.server.clone()?;
            Some(HashMap::from([(server, credentials(Some(a))?)]))
        });

        debug!("{}: building {} ({:?})", self.name, name, platform);
        let mut stream = self
            .docker
            .build_image(options, registry_config, Some(archive.into()));

        let mut logs = Vec::new();
        while let Some(item) = stream.next().await {
            let info = item?;
            if let Some(error) = info.error {
                return Err(Error::BuildFailed {
                    image: name.to_string(),
                    reason: error,
                });
            }
            if let Some(line) = info.stream {
                logs.extend_from_slice(line.as_bytes());
            }
        }
        info!("{}: built image {}", self.name, name);
        Ok(logs)
    }
}

#[async_trait]
impl ContainerManager for EngineRuntime {
    fn name(&self) -> &str {
        self.name
    }

    async fn create_container(
        &self,
        config: &ContainerConfig,
        auth: Option<&RegistryAuth>,
    ) -> Result<String> {
        let options = CreateContainerOptions {
            name: config
                .name
                .clone()
                .unwrap_or_else(|| format!("buildrun-{}", new_container_id().to_lowercase())),
            platform: config.platform.clone(),
        };

        let created = match self
            .docker
            .create_container(Some(options.clone()), engine_config(config))
            .await
        {
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("{}: image {} missing, pulling", self.name, config.image);
                self.pull_image(&config.image, auth).await?;
                self.docker
                    .create_container(Some(options), engine_config(config))
                    .await
            }
            other => other,
        }
        .map_err(|e| Error::CreateFailed {
            image: config.image.clone(),
            reason: e.to_string(),
        })?;

        for warning in &created.warnings {
            warn!("{}: create {}: {}", self.name, created.id, warning);
        }

        self.configs
            .write()
            .map_err(|e| Error::Internal(format!("lock poisoned: {}", e)))?
            .insert(created.id.clone(), config.clone());

        info!("{}: created container {} ({})", self.name, created.id, config.image);
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| engine_error(e, Missing::Container, id))?;
        info!("{}: started container {}", self.name, id);
        Ok(())
    }

    async fn stop_container(&self, id: &str, signal: Option<&str>) -> Result<()> {
        match signal {
            Some(signal) => self
                .docker
                .kill_container(id, Some(KillContainerOptions { signal }))
                .await,
            None => self
                .docker
                .stop_container(id, Some(StopContainerOptions { t: STOP_GRACE_SECS }))
                .await,
        }
        .map_err(|e| engine_error(e, Missing::Container, id))?;
        info!("{}: stopped container {}", self.name, id);
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| engine_error(e, Missing::Container, id))?;

        if let Ok(mut configs) = self.configs.write() {
            configs.remove(id);
        }
        info!("{}: removed container {}", self.name, id);
        Ok(())
    }

    async fn commit_container(&self, id: &str, image: &str) -> Result<String> {
        let reference = ImageRef::parse(image)?;
        self.docker
            .commit_container(commit_options(id, &reference), EngineConfig::<String>::default())
            .await
            .map_err(|e| engine_error(e, Missing::Container, id))?;

        let info = self.inspect_image(image).await?;
        info!("{}: committed {} as {}", self.name, id, image);
        Ok(info.id)
    }

    async fn container_list(&self, all: bool) -> Result<Vec<ContainerSummary>> {
        let options = ListContainersOptions::<String> {
            all,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                status: c.state.unwrap_or_default(),
            })
            .collect())
    }

    async fn container_logs(
        &self,
        id: &str,
        stdout: bool,
        stderr: bool,
        follow: bool,
    ) -> Result<ByteStream> {
        // Surface a missing container now rather than mid-stream.
        self.docker
            .inspect_container(id, None)
            .await
            .map_err(|e| engine_error(e, Missing::Container, id))?;

        let options = LogsOptions::<String> {
            follow,
            stdout,
            stderr,
            ..Default::default()
        };
        let owner = id.to_string();
        Ok(self
            .docker
            .logs(id, Some(options))
            .map(move |item| {
                item.map(|output| output.into_bytes())
                    .map_err(|e| engine_error(e, Missing::Container, &owner))
            })
            .boxed())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerConfig> {
        let inspect = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|e| engine_error(e, Missing::Container, id))?;

        if let Some(config) = self.stored_config(id)? {
            return Ok(config);
        }
        if let Some(full_id) = inspect.id.as_deref()
            && let Some(config) = self.stored_config(full_id)?
        {
            return Ok(config);
        }
        Ok(config_from_inspect(&inspect))
    }

    async fn wait_container(&self, id: &str, condition: WaitCondition) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: condition.as_str(),
        };
        let mut stream = self.docker.wait_container(id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Non-zero exits arrive as this error; the code is the result.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(engine_error(e, Missing::Container, id)),
            None => Err(Error::Internal(format!(
                "wait on container {} ended without a status",
                id
            ))),
        }
    }

    async fn exec_container(&self, id: &str, cmd: &[String], attach: bool) -> Result<ExecOutput> {
        if cmd.is_empty() {
            return Err(Error::ExecFailed {
                container: id.to_string(),
                reason: "empty command".to_string(),
            });
        }

        let options = CreateExecOptions::<String> {
            cmd: Some(cmd.to_vec()),
            attach_stdout: Some(attach),
            attach_stderr: Some(attach),
            ..Default::default()
        };
        let exec = self
            .docker
            .create_exec(id, options)
            .await
            .map_err(|e| engine_error(e, Missing::Container, id))?;

        let start = StartExecOptions {
            detach: !attach,
            ..Default::default()
        };
        match self.docker.start_exec(&exec.id, Some(start)).await? {
            StartExecResults::Attached { mut output, .. } => {
                let mut collected = Vec::new();
                while let Some(item) = output.next().await {
                    collected.extend_from_slice(&item?.into_bytes());
                }
                let inspect = self.docker.inspect_exec(&exec.id).await?;
                debug!(
                    "{}: exec in {} exited with {:?}",
                    self.name, id, inspect.exit_code
                );
                Ok(ExecOutput {
                    exit_code: inspect.exit_code,
                    output: stream_from_bytes(collected),
                })
            }
            StartExecResults::Detached => Ok(ExecOutput {
                exit_code: None,
                output: stream_from_bytes(Vec::new()),
            }),
        }
    }

    async fn copy_content_to_container(&self, id: &str, content: &[u8], dest: &str) -> Result<()> {
        let (dir, file) = split_dest(dest);
        let archive = tar_file(&file, content, 0o755)?;
        self.upload(id, &dir, archive).await
    }

    async fn copy_directory_to_container(&self, id: &str, src: &Path, dest: &str) -> Result<()> {
        let mut builder = tar::Builder::new(Vec::new());
        builder.append_dir_all(".", src)?;
        let archive = builder.into_inner()?;
        self.upload(id, dest, archive).await
    }

    async fn copy_to_container(&self, id: &str, src: &Path, dest: &str) -> Result<()> {
        let (dir, file) = split_dest(dest);
        let mut builder = tar::Builder::new(Vec::new());
        builder.append_path_with_name(src, &file)?;
        let archive = builder.into_inner()?;
        self.upload(id, &dir, archive).await
    }

    async fn copy_file_from_container(&self, id: &str, path: &str) -> Result<Vec<u8>> {
        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };
        let mut stream = self.docker.download_from_container(id, Some(options));
        let mut archive = Vec::new();
        while let Some(chunk) = stream.next().await {
            archive.extend_from_slice(&chunk.map_err(|e| engine_error(e, Missing::Container, id))?);
        }

        let mut tar = tar::Archive::new(archive.as_slice());
        for entry in tar.entries()? {
            let mut entry = entry?;
            if entry.header().entry_type().is_file() {
                let mut content = Vec::new();
                entry.read_to_end(&mut content)?;
                return Ok(content);
            }
        }
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a file in container {}", path, id),
        )))
    }

    async fn build_image(
        &self,
        dockerfile: &[u8],
        name: &str,
        platform: Option<&str>,
    ) -> Result<ByteStream> {
        let logs = self.build(dockerfile, None, name, platform, None).await?;
        Ok(stream_from_bytes(logs))
    }

    async fn build_multi_arch_image(
        &self,
        dockerfile: &[u8],
        context: Option<&Path>,
        name: &str,
        platforms: &[String],
        auth: Option<&RegistryAuth>,
    ) -> Result<MultiArchBuild> {
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
            logs.extend(
                self.build(dockerfile, context, &tag, Some(platform), auth)
                    .await?,
            );
            tags.push(tag);
        }
        Ok(MultiArchBuild {
            logs: stream_from_bytes(logs),
            tags,
        })
    }

    async fn list_images(&self) -> Result<Vec<ImageInfo>> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String>::default()))
            .await?;
        Ok(images
            .into_iter()
            .flat_map(|image| {
                let id = image.id;
                image.repo_tags.into_iter().map(move |tag| ImageInfo {
                    name: tag,
                    id: id.clone(),
                    platform: None,
                    dockerfile: None,
                })
            })
            .collect())
    }

    async fn pull_image(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<()> {
        let reference = ImageRef::parse(image)?;
        let options = match &reference.digest {
            Some(_) => CreateImageOptions {
                from_image: reference.to_string(),
                ..Default::default()
            },
            None => CreateImageOptions {
                from_image: reference.repository(),
                tag: reference.tag.clone(),
                ..Default::default()
            },
        };

        debug!("{}: pulling {}", self.name, image);
        let mut stream = self
            .docker
            .create_image(Some(options), None, credentials(auth));
        while let Some(item) = stream.next().await {
            let progress = item.map_err(|e| Error::ImagePullFailed {
                reference: image.to_string(),
                reason: e.to_string(),
            })?;
            if let Some(error) = progress.error {
                return Err(Error::ImagePullFailed {
                    reference: image.to_string(),
                    reason: error,
                });
            }
        }
        info!("{}: pulled {}", self.name, image);
        Ok(())
    }

    async fn tag_image(&self, source: &str, target: &str) -> Result<()> {
        let reference = ImageRef::parse(target)?;
        let options = TagImageOptions {
            repo: reference.repository(),
            tag: reference.tag,
        };
        self.docker
            .tag_image(source, Some(options))
            .await
            .map_err(|e| engine_error(e, Missing::Image, source))
    }

    async fn push_image(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<()> {
        let reference = ImageRef::parse(image)?;
        let options = PushImageOptions {
            tag: reference.tag.clone(),
        };
        let mut stream =
            self.docker
                .push_image(&reference.repository(), Some(options), credentials(auth));
        while let Some(item) = stream.next().await {
            let progress = item.map_err(|e| engine_error(e, Missing::Image, image))?;
            if let Some(error) = progress.error {
                return Err(Error::Internal(format!("push of {} failed: {}", image, error)));
            }
        }
        info!("{}: pushed {}", self.name, image);
        Ok(())
    }

    async fn remove_image(&self, image: &str, force: bool) -> Result<()> {
        let options = RemoveImageOptions {
            force,
            ..Default::default()
        };
        self.docker
            .remove_image(image, Some(options), None)
            .await
            .map_err(|e| engine_error(e, Missing::Image, image))?;
        Ok(())
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageInfo> {
        let inspect = self
            .docker
            .inspect_image(image)
            .await
            .map_err(|e| engine_error(e, Missing::Image, image))?;
        let platform = match (inspect.os.as_deref(), inspect.architecture.as_deref()) {
            (Some(os), Some(arch)) => Some(format!("{}/{}", os, arch)),
            _ => None,
        };
        Ok(ImageInfo {
            name: image.to_string(),
            id: inspect.id.unwrap_or_default(),
            platform,
            dockerfile: None,
        })
    }
}
