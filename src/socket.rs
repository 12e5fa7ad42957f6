//! Engine control-socket resolution and socket projection.
//!
//! Some build steps drive the container engine themselves (building images
//! from inside a build container). For those, the engine's control socket is
//! bind-mounted into the container at [`SOCKET_MOUNT_TARGET`].
//!
//! | Runtime | Socket source |
//! |---------|---------------|
//! | docker  | [`DOCKER_SOCKET`] |
//! | podman  | `podman info --format json` → `host.remoteSocket.path` |
//! | test    | none |
//!
//! A failing probe means the runtime is absent; it is never an error.

use crate::constants::{DOCKER_SOCKET, SOCKET_MOUNT_TARGET, UNIX_SCHEME};
use crate::container::{Volume, VolumeType};
use crate::runtimes::RuntimeKind;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, warn};

/// Resolves the control socket of the given runtime.
pub fn engine_socket(kind: RuntimeKind) -> Option<PathBuf> {
    match kind {
        RuntimeKind::Docker => Some(PathBuf::from(DOCKER_SOCKET)),
        RuntimeKind::Podman => podman_socket(),
        RuntimeKind::Test => None,
    }
}

/// Returns the volume projecting the runtime's socket into a container.
pub fn socket_volume(kind: RuntimeKind) -> Option<Volume> {
    let source = engine_socket(kind)?;
    Some(Volume {
        kind: VolumeType::Socket,
        source: source.to_string_lossy().into_owned(),
        target: SOCKET_MOUNT_TARGET.to_string(),
        read_only: false,
    })
}

/// Asks the Podman CLI for its remote socket path.
pub fn podman_socket() -> Option<PathBuf> {
    let output = match Command::new("podman").args(["info", "--format", "json"]).output() {
        Ok(output) => output,
        Err(e) => {
            debug!("podman info could not run: {}", e);
            return None;
        }
    };

    if !output.status.success() {
        warn!(
            "podman info exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return None;
    }

    parse_podman_info(&output.stdout)
}

/// Extracts `host.remoteSocket.path` from `podman info` JSON output.
pub fn parse_podman_info(json: &[u8]) -> Option<PathBuf> {
    let info: serde_json::Value = serde_json::from_slice(json).ok()?;
    let path = info
        .pointer("/host/remoteSocket/path")
        .and_then(serde_json::Value::as_str)?;
    let path = path.strip_prefix(UNIX_SCHEME).unwrap_or(path);
    if path.is_empty() {
        return None;
    }
    Some(PathBuf::from(path))
}
