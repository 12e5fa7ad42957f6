//! # buildrun
//!
//! **Container Runtime Abstraction for Build Pipelines**
//!
//! This crate runs build steps (shell scripts, image builds) against a
//! uniform container interface, whatever executes them: a Docker or Podman
//! engine, plain host processes, or an in-memory double.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            buildrun                                 │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────────┐    │
//! │  │                  BuildSteps Scheduler                       │    │
//! │  │   sync steps in order │ async steps spawned │ join barrier  │    │
//! │  └─────────────────────────────────────────────────────────────┘    │
//! │                              │                                      │
//! │  ┌───────────────────────────┼───────────────────────────────┐      │
//! │  │                  ContainerManager Trait                   │      │
//! │  │  create → start → exec / copy → wait → stop → remove      │      │
//! │  │  build │ pull │ tag │ push │ inspect images               │      │
//! │  └───────────────────────────┼───────────────────────────────┘      │
//! │                              │                                      │
//! │  ┌───────────────────────────┼───────────────────────────────┐      │
//! │  │                  RuntimeRegistry                          │      │
//! │  │  BUILDRUN_CONTAINER_RUNTIME │ PATH probe │ one-shot init  │      │
//! │  └───────────────────────────────────────────────────────────┘      │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                      Runtime Backends                               │
//! │  ┌──────────────┐  ┌───────────────┐  ┌──────────────┐              │
//! │  │EngineRuntime │  │  HostRuntime  │  │ MockRuntime  │              │
//! │  │docker/podman │  │ host processes│  │  in-memory   │              │
//! │  │  Docker API  │  │ virtual paths │  │   tables     │              │
//! │  └──────────────┘  └───────────────┘  └──────────────┘              │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Container Lifecycle
//!
//! ```text
//!   ┌─────────┐   create   ┌─────────┐   start   ┌─────────┐
//!   │ (none)  │ ─────────► │ Created │ ────────► │ Started │
//!   └─────────┘            └─────────┘           └────┬────┘
//!                               │                     │ stop / exit
//!                               │ remove              ▼
//!                               │               ┌──────────────┐
//!                               ▼               │Stopped/Exited│
//!                          ┌─────────┐  remove  └──────────────┘
//!                          │ Removed │ ◄──────────────┘
//!                          └─────────┘
//! ```
//!
//! # Failure Model
//!
//! | Source | Outcome |
//! |--------|---------|
//! | unknown container / image | `ContainerNotFound` / `ImageNotFound` |
//! | command exits non-zero | exit code returned, not an error |
//! | sync build step fails | remaining steps skipped, error returned |
//! | async build step fails | [`fatal::terminate`] by default |
//! | runtime unresolvable | `Configuration`, fatal at the entry point |
//!
//! # Example
//!
//! ```rust,ignore
//! use buildrun::{BuildSteps, RuntimeRegistry, ScriptStep};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> buildrun::Result<()> {
//!     let registry = RuntimeRegistry::new();
//!     let manager = registry.get_or_init()?;
//!
//!     let mut steps = BuildSteps::new("ci");
//!     steps.add(Arc::new(ScriptStep::new("test", manager, "golang:1.22", "go test ./...")));
//!     steps.run(None).await
//! }
//! ```

pub mod constants;
pub mod container;
pub mod error;
pub mod fatal;
pub mod image;
pub mod manager;
pub mod script;
pub mod socket;
pub mod steps;

pub mod runtimes;

// Re-exports
pub use constants::*;
pub use container::{
    Container, ContainerConfig, ContainerStatus, ContainerSummary, RegistryAuth, Resources,
    Volume, VolumeType, WaitCondition,
};
pub use error::{Error, Result};
pub use image::{CacheOutcome, ImageInfo, ImageRef, IntermediateImage};
pub use manager::{ByteStream, ContainerManager, ExecOutput, MultiArchBuild, platform_tag};
pub use runtimes::{
    EngineRuntime, HostRuntime, MockRuntime, RuntimeKind, RuntimeRegistry, VirtualTarget,
    detect_runtime,
};
pub use script::ScriptStep;
pub use steps::{AsyncFailureHandler, BuildStep, BuildSteps};
