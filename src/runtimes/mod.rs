//! Runtime backends, detection and one-shot construction.
//!
//! ## Resolution Order
//!
//! 1. [`RUNTIME_ENV`] set to `docker`, `podman` or `test` selects that
//!    runtime. Any other value is a fatal configuration error.
//! 2. Unset: `PATH` is probed for a `docker` binary, then `podman`.
//! 3. Nothing found: fatal configuration error.
//!
//! The host backend is never auto-selected; callers opt into it with
//! [`RuntimeRegistry::from_manager`].
//!
//! ## One-Shot Construction
//!
//! [`RuntimeRegistry`] is created once at the entry point and passed down.
//! The backend is built on first use and memoized, and so is a construction
//! failure: every later call reports the same error.

pub mod engine;
pub mod host;
pub mod mock;

pub use self::engine::EngineRuntime;
pub use self::host::{HostRuntime, VirtualTarget};
pub use self::mock::{MockCalls, MockRuntime};

use crate::constants::RUNTIME_ENV;
use crate::error::{Error, Result};
use crate::manager::ContainerManager;
use std::ffi::OsStr;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

// =============================================================================
// Runtime Kind
// =============================================================================

/// Container runtime selectable through [`RUNTIME_ENV`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeKind {
    Docker,
    Podman,
    /// In-memory mock backend.
    Test,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
            Self::Test => "test",
        }
    }
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            "test" => Ok(Self::Test),
            other => Err(Error::Configuration(format!(
                "{} must be one of docker, podman, test (got '{}')",
                RUNTIME_ENV, other
            ))),
        }
    }
}

// =============================================================================
// Detection
// =============================================================================

/// Detects the runtime from the environment.
pub fn detect_runtime() -> Result<RuntimeKind> {
    let selection = std::env::var(RUNTIME_ENV).ok();
    let path = std::env::var_os("PATH");
    detect_runtime_from(selection.as_deref(), path.as_deref())
}

/// Detects the runtime from an explicit selection value and `PATH`.
pub fn detect_runtime_from(selection: Option<&str>, path: Option<&OsStr>) -> Result<RuntimeKind> {
    if let Some(value) = selection.map(str::trim).filter(|v| !v.is_empty()) {
        let kind = value.parse()?;
        debug!("runtime {} selected by {}", kind, RUNTIME_ENV);
        return Ok(kind);
    }

    for (binary, kind) in [("docker", RuntimeKind::Docker), ("podman", RuntimeKind::Podman)] {
        if find_in_path(binary, path).is_some() {
            debug!("runtime {} detected on PATH", kind);
            return Ok(kind);
        }
    }

    Err(Error::Configuration(format!(
        "no container runtime found: set {} or install docker or podman",
        RUNTIME_ENV
    )))
}

/// Returns the first `PATH` entry containing an executable `binary`.
pub fn find_in_path(binary: &str, path: Option<&OsStr>) -> Option<std::path::PathBuf> {
    let path = path?;
    std::env::split_paths(path)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// =============================================================================
// Registry
// =============================================================================

/// Memoized construction failure.
#[derive(Debug, Clone)]
struct InitFailure {
    runtime: String,
    reason: String,
    configuration: bool,
}

impl InitFailure {
    fn from_error(runtime: &str, err: &Error) -> Self {
        match err {
            Error::Configuration(reason) => Self {
                runtime: runtime.to_string(),
                reason: reason.clone(),
                configuration: true,
            },
            other => Self {
                runtime: runtime.to_string(),
                reason: other.to_string(),
                configuration: false,
            },
        }
    }

    fn to_error(&self) -> Error {
        if self.configuration {
            Error::Configuration(self.reason.clone())
        } else {
            Error::RuntimeUnavailable {
                runtime: self.runtime.clone(),
                reason: self.reason.clone(),
            }
        }
    }
}

type InitResult = std::result::Result<Arc<dyn ContainerManager>, InitFailure>;

/// Constructs exactly one backend per registry.
///
/// ```rust,ignore
/// let registry = RuntimeRegistry::new();
/// let manager = registry.get_or_init()?;
/// let steps = build_pipeline(manager.clone());
/// ```
pub struct RuntimeRegistry {
    kind: Option<RuntimeKind>,
    runtime: OnceLock<InitResult>,
}

impl RuntimeRegistry {
    /// Creates a registry that detects the runtime on first use.
    pub fn new() -> Self {
        Self {
            kind: None,
            runtime: OnceLock::new(),
        }
    }

    /// Creates a registry for an explicit runtime, skipping detection.
    pub fn with_kind(kind: RuntimeKind) -> Self {
        Self {
            kind: Some(kind),
            runtime: OnceLock::new(),
        }
    }

    /// Creates a registry around an already constructed backend.
    pub fn from_manager(manager: Arc<dyn ContainerManager>) -> Self {
        let runtime = OnceLock::new();
        let _ = runtime.set(Ok(manager));
        Self {
            kind: None,
            runtime,
        }
    }

    /// Returns the backend, constructing it on the first call.
    pub fn get_or_init(&self) -> Result<Arc<dyn ContainerManager>> {
        self.runtime
            .get_or_init(|| self.construct())
            .clone()
            .map_err(|failure| failure.to_error())
    }

    /// Returns true once construction has been attempted.
    pub fn is_initialized(&self) -> bool {
        self.runtime.get().is_some()
    }

    fn construct(&self) -> InitResult {
        let kind = match self.kind {
            Some(kind) => kind,
            None => detect_runtime().map_err(|e| InitFailure::from_error("auto", &e))?,
        };

        let manager: Arc<dyn ContainerManager> = match kind {
            RuntimeKind::Test => Arc::new(MockRuntime::new()),
            RuntimeKind::Docker => Arc::new(
                EngineRuntime::docker().map_err(|e| InitFailure::from_error(kind.as_str(), &e))?,
            ),
            RuntimeKind::Podman => Arc::new(
                EngineRuntime::podman().map_err(|e| InitFailure::from_error(kind.as_str(), &e))?,
            ),
        };

        info!("container runtime initialized: {}", manager.name());
        Ok(manager)
    }
}

impl Default for RuntimeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
