//! Script build step: run a shell script inside a fresh container.
//!
//! ```text
//! ensure image ─► create ─► start ─► copy script ─► exec sh ─► stop ─► remove
//! ```
//!
//! The image is pulled when missing, or built from a Dockerfile through
//! [`IntermediateImage`]. A script exiting non-zero fails the step with
//! [`Error::StepFailed`] and leaves the container in place for inspection.

use crate::constants::SCRIPT_PATH;
use crate::container::{ContainerConfig, RegistryAuth};
use crate::error::{Error, Result};
use crate::image::IntermediateImage;
use crate::manager::{ContainerManager, drain_string};
use crate::steps::BuildStep;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Where a script step gets its image from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Pull the reference unless it is already present.
    Pull(String),
    /// Build from an embedded recipe, cached by checksum.
    Build(IntermediateImage),
}

pub struct ScriptStep {
    name: String,
    manager: Arc<dyn ContainerManager>,
    source: ImageSource,
    script: String,
    config: ContainerConfig,
    auth: Option<RegistryAuth>,
}

impl ScriptStep {
    /// A step running `script` in a pulled image.
    pub fn new(
        name: impl Into<String>,
        manager: Arc<dyn ContainerManager>,
        image: impl Into<String>,
        script: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            manager,
            source: ImageSource::Pull(image.into()),
            script: script.into(),
            config: ContainerConfig::default(),
            auth: None,
        }
    }

    /// A step running `script` in an intermediate image.
    pub fn from_dockerfile(
        name: impl Into<String>,
        manager: Arc<dyn ContainerManager>,
        image: IntermediateImage,
        script: impl Into<String>,
    ) -> Self {
        let mut step = Self::new(name, manager, String::new(), script);
        step.source = ImageSource::Build(image);
        step
    }

    /// Uses `config` as the container template. Its image is ignored.
    pub fn with_config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_auth(mut self, auth: RegistryAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// The image reference containers are created from.
    pub fn image(&self) -> String {
        match &self.source {
            ImageSource::Pull(image) => image.clone(),
            ImageSource::Build(intermediate) => intermediate.tag(),
        }
    }

    async fn ensure_image(&self) -> Result<()> {
        match &self.source {
            ImageSource::Build(intermediate) => {
                intermediate
                    .ensure(self.manager.as_ref(), self.config.platform.as_deref())
                    .await?;
            }
            ImageSource::Pull(image) => match self.manager.inspect_image(image).await {
                Ok(_) => debug!("image {} present", image),
                Err(e) if e.is_not_found() => {
                    self.manager.pull_image(image, self.auth.as_ref()).await?;
                }
                Err(e) => return Err(e),
            },
        }
        Ok(())
    }

    fn container_config(&self) -> ContainerConfig {
        let mut config = self.config.clone();
        config.image = self.image();
        config.script = Some(self.script.clone());
        if config.cmd.is_empty() && config.entrypoint.is_empty() {
            config.cmd = vec!["sleep".to_string(), "infinity".to_string()];
        }
        config
    }
}

#[async_trait]
impl BuildStep for ScriptStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn images(&self) -> Vec<String> {
        vec![self.image()]
    }

    async fn run(&self) -> Result<()> {
        self.ensure_image().await?;

        let manager = &self.manager;
        let id = manager
            .create_container(&self.container_config(), self.auth.as_ref())
            .await?;
        manager.start_container(&id).await?;
        manager
            .copy_content_to_container(&id, self.script.as_bytes(), SCRIPT_PATH)
            .await?;

        let cmd = ["sh".to_string(), SCRIPT_PATH.to_string()];
        let exec = manager.exec_container(&id, &cmd, true).await?;
        let exit_code = exec.exit_code;
        let output = drain_string(exec.output).await?;
        for line in output.lines() {
            debug!(step = %self.name, "{}", line);
        }

        if exit_code != Some(0) {
            return Err(Error::StepFailed {
                step: self.name.clone(),
                reason: format!(
                    "script exited with {} in container {}: {}",
                    exit_code.map_or_else(|| "unknown status".to_string(), |c| c.to_string()),
                    id,
                    output.lines().last().unwrap_or_default()
                ),
            });
        }

        manager.stop_container(&id, None).await?;
        manager.remove_container(&id, false).await?;
        info!("Script step {} finished in {}", self.name, manager.name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtimes::MockRuntime;

    #[test]
    fn default_command_keeps_container_alive() {
        let step = ScriptStep::new("lint", Arc::new(MockRuntime::new()), "alpine:3.20", "true");
        let config = step.container_config();
        assert_eq!(config.image, "alpine:3.20");
        assert_eq!(config.cmd, vec!["sleep", "infinity"]);
        assert_eq!(config.script.as_deref(), Some("true"));
    }

    #[test]
    fn built_image_uses_checksum_tag() {
        let image = IntermediateImage::new("buildrun.local", "go", b"FROM golang:1.22\n".to_vec());
        let tag = image.tag();
        let step = ScriptStep::from_dockerfile("go", Arc::new(MockRuntime::new()), image, "go vet");
        assert_eq!(step.images(), vec![tag]);
    }
}
