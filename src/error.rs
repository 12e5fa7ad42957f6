//! Error types for the build runtime layer.
//!
//! Errors fall into two classes. Recoverable errors (a missing container, a
//! failed build step) are returned to the caller as values. Fatal errors
//! (an unusable environment, a failed asynchronous step) are reported through
//! [`crate::fatal`], the only place allowed to terminate the process.

/// Result type alias for build runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the build runtime layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Container Lifecycle Errors
    // =========================================================================
    /// Container not found in the owning backend's table.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Container create failed.
    #[error("failed to create container from '{image}': {reason}")]
    CreateFailed { image: String, reason: String },

    /// Container start failed.
    #[error("failed to start container '{id}': {reason}")]
    StartFailed { id: String, reason: String },

    /// Container is in wrong state for operation.
    #[error("container '{id}' is in state '{state}', expected '{expected}'")]
    InvalidState {
        id: String,
        state: String,
        expected: String,
    },

    /// Exec could not be launched. A command that runs and exits non-zero is
    /// reported through its exit code instead.
    #[error("exec failed in container '{container}': {reason}")]
    ExecFailed { container: String, reason: String },

    // =========================================================================
    // Image Errors
    // =========================================================================
    /// Image not found in the backend's image table.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// Failed to parse image reference.
    #[error("invalid image reference '{reference}': {reason}")]
    InvalidImageReference { reference: String, reason: String },

    /// Image pull failed.
    #[error("failed to pull image '{reference}': {reason}")]
    ImagePullFailed { reference: String, reason: String },

    /// Image build failed.
    #[error("failed to build image '{image}': {reason}")]
    BuildFailed { image: String, reason: String },

    // =========================================================================
    // Runtime Errors
    // =========================================================================
    /// Runtime could not be constructed.
    #[error("runtime '{runtime}' not available: {reason}")]
    RuntimeUnavailable { runtime: String, reason: String },

    /// Operation not supported by this backend.
    #[error("operation not supported by {backend} runtime: {operation}")]
    NotSupported { backend: String, operation: String },

    /// Environment cannot be used (unresolvable runtime, bad variable).
    #[error("configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Build Step Errors
    // =========================================================================
    /// Synchronous build step failed.
    #[error("build step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    /// Asynchronous build step failed.
    #[error("async build step '{step}' failed: {reason}")]
    AsyncStepFailed { step: String, reason: String },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Container engine API error.
    #[error("engine error: {0}")]
    Engine(#[from] bollard::errors::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for [`Error::NotSupported`].
    pub fn not_supported(backend: &str, operation: impl Into<String>) -> Self {
        Self::NotSupported {
            backend: backend.to_string(),
            operation: operation.into(),
        }
    }

    /// Returns true for container or image lookups that missed.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ContainerNotFound(_) | Self::ImageNotFound(_))
    }

    /// Returns true if the error must terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::AsyncStepFailed { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_not_found() {
        assert!(Error::ContainerNotFound("abc".into()).is_not_found());
        assert!(Error::ImageNotFound("golang".into()).is_not_found());
        assert!(!Error::Internal("x".into()).is_not_found());
    }

    #[test]
    fn classifies_fatal() {
        assert!(Error::Configuration("bad".into()).is_fatal());
        assert!(
            Error::AsyncStepFailed {
                step: "lint".into(),
                reason: "exit 1".into()
            }
            .is_fatal()
        );
        assert!(
            !Error::StepFailed {
                step: "build".into(),
                reason: "exit 1".into()
            }
            .is_fatal()
        );
    }
}
