//! # Build Runtime Constants
//!
//! Environment variable names, well-known paths and sizing constants shared
//! by the runtime backends and the build-step layer. These are the single
//! source of truth for values that cross module boundaries.
//!
//! ## Cross-References
//!
//! - [`crate::runtimes`]: runtime selection variable, host state root
//! - [`crate::socket`]: engine control-socket paths
//! - [`crate::image`]: default registry hosts
//! - [`crate::script`]: virtual script destination

use std::path::PathBuf;

// =============================================================================
// Environment Variables
// =============================================================================

/// Selects the container runtime: `docker`, `podman` or `test`.
///
/// When unset, the runtime is detected by probing `PATH`.
pub const RUNTIME_ENV: &str = "BUILDRUN_CONTAINER_RUNTIME";

/// Overrides the host backend's state root.
pub const STATE_DIR_ENV: &str = "BUILDRUN_STATE_DIR";

/// Registry used to name intermediate images.
pub const REGISTRY_ENV: &str = "BUILDRUN_REGISTRY";

// =============================================================================
// Engine Sockets
// =============================================================================

/// Docker's well-known control socket.
pub const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Scheme prefix stripped from socket addresses reported by engines.
pub const UNIX_SCHEME: &str = "unix://";

/// Path at which a projected engine socket appears inside build containers.
pub const SOCKET_MOUNT_TARGET: &str = "/var/run/docker.sock";

/// Client timeout (seconds) when connecting to an engine socket.
pub const ENGINE_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// Images
// =============================================================================

/// Registry host assumed when an image reference names none.
pub const DEFAULT_REGISTRY_HOST: &str = "docker.io";

/// Registry used to name intermediate images when [`REGISTRY_ENV`] is unset.
pub const DEFAULT_INTERMEDIATE_REGISTRY: &str = "buildrun.local";

/// Tag used when an image reference carries none.
pub const DEFAULT_TAG: &str = "latest";

// =============================================================================
// Containers
// =============================================================================

/// Virtual destination of the rendered build script inside a container.
pub const SCRIPT_PATH: &str = "/buildrun/script.sh";

/// Random bytes drawn per host container id.
///
/// A multiple of 3 so base64 encodes to whole 4-character groups and the id
/// is never cut inside an encoding group.
pub const CONTAINER_ID_BYTES: usize = 12;

/// Length of a host container id (base64url of [`CONTAINER_ID_BYTES`]).
pub const CONTAINER_ID_LEN: usize = CONTAINER_ID_BYTES / 3 * 4;

/// Exit code reported for a host process killed by a signal.
pub const SIGNALED_EXIT_CODE: i64 = 137;

/// Returns the host backend's default state root.
///
/// Honors [`STATE_DIR_ENV`], otherwise a directory under the system temp dir.
pub fn default_state_root() -> PathBuf {
    std::env::var_os(STATE_DIR_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("buildrun-host"))
}

/// Returns the registry used for intermediate images.
pub fn intermediate_registry() -> String {
    std::env::var(REGISTRY_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_INTERMEDIATE_REGISTRY.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn id_length_matches_encoding() {
        assert_eq!(CONTAINER_ID_BYTES % 3, 0);
        assert_eq!(CONTAINER_ID_LEN, 16);
    }

    #[test]
    #[serial]
    fn state_root_honors_env() {
        temp_env::with_var(STATE_DIR_ENV, Some("/custom/state"), || {
            assert_eq!(default_state_root(), PathBuf::from("/custom/state"));
        });
        temp_env::with_var(STATE_DIR_ENV, None::<&str>, || {
            assert!(default_state_root().ends_with("buildrun-host"));
        });
    }

    #[test]
    #[serial]
    fn registry_falls_back_to_default() {
        temp_env::with_var(REGISTRY_ENV, None::<&str>, || {
            assert_eq!(intermediate_registry(), DEFAULT_INTERMEDIATE_REGISTRY);
        });
        temp_env::with_var(REGISTRY_ENV, Some("ghcr.io/acme"), || {
            assert_eq!(intermediate_registry(), "ghcr.io/acme");
        });
    }
}
