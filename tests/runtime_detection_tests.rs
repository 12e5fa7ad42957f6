//! Tests for runtime detection and the runtime registry.
//!
//! Tests that touch `BUILDRUN_CONTAINER_RUNTIME` are serialized.

use buildrun::constants::RUNTIME_ENV;
use buildrun::runtimes::{detect_runtime, detect_runtime_from, find_in_path};
use buildrun::{ContainerManager, Error, HostRuntime, MockRuntime, RuntimeKind, RuntimeRegistry};
use serial_test::serial;
use std::ffi::OsString;
use std::sync::Arc;

#[cfg(unix)]
fn fake_binary(dir: &std::path::Path, name: &str) {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, "#!/bin/sh\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

// =============================================================================
// Detection Tests
// =============================================================================

#[test]
fn test_selection_test_ignores_path() {
    let empty = tempfile::tempdir().unwrap();
    let path = OsString::from(empty.path());
    assert_eq!(
        detect_runtime_from(Some("test"), Some(path.as_os_str())).unwrap(),
        RuntimeKind::Test
    );
    assert_eq!(detect_runtime_from(Some("test"), None).unwrap(), RuntimeKind::Test);
}

#[test]
fn test_unrecognized_selection_is_fatal() {
    let err = detect_runtime_from(Some("lxc"), None).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_nothing_on_path_is_fatal() {
    let empty = tempfile::tempdir().unwrap();
    let path = OsString::from(empty.path());
    let err = detect_runtime_from(None, Some(path.as_os_str())).unwrap_err();
    assert!(err.is_fatal());
}

#[cfg(unix)]
#[test]
fn test_path_search_prefers_docker() {
    let bin = tempfile::tempdir().unwrap();
    fake_binary(bin.path(), "podman");
    let path = OsString::from(bin.path());
    assert_eq!(detect_runtime_from(None, Some(path.as_os_str())).unwrap(), RuntimeKind::Podman);

    fake_binary(bin.path(), "docker");
    assert_eq!(detect_runtime_from(None, Some(path.as_os_str())).unwrap(), RuntimeKind::Docker);
}

#[cfg(unix)]
#[test]
fn test_non_executable_is_ignored() {
    let bin = tempfile::tempdir().unwrap();
    std::fs::write(bin.path().join("docker"), "").unwrap();
    let path = OsString::from(bin.path());
    assert!(find_in_path("docker", Some(path.as_os_str())).is_none());
}

#[test]
#[serial]
fn test_env_selects_test_runtime() {
    temp_env::with_var(RUNTIME_ENV, Some("test"), || {
        assert_eq!(detect_runtime().unwrap(), RuntimeKind::Test);
    });
}

#[test]
#[serial]
fn test_env_invalid_value_is_fatal() {
    temp_env::with_var(RUNTIME_ENV, Some("kubernetes"), || {
        let err = detect_runtime().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("kubernetes"));
    });
}

// =============================================================================
// Registry Tests
// =============================================================================

#[test]
fn test_registry_builds_test_runtime_once() {
    let registry = RuntimeRegistry::with_kind(RuntimeKind::Test);
    assert!(!registry.is_initialized());

    let first = registry.get_or_init().unwrap();
    let second = registry.get_or_init().unwrap();
    assert!(registry.is_initialized());
    assert_eq!(first.name(), "test");
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
#[serial]
fn test_registry_failure_is_sticky() {
    let registry = temp_env::with_var(RUNTIME_ENV, Some("bogus"), || {
        let registry = RuntimeRegistry::new();
        assert!(registry.get_or_init().is_err());
        registry
    });
    temp_env::with_var(RUNTIME_ENV, Some("test"), || {
        let err = registry.get_or_init().err().unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    });
}

#[test]
fn test_registry_from_manager_skips_detection() {
    let registry = RuntimeRegistry::from_manager(Arc::new(HostRuntime::new()));
    assert!(registry.is_initialized());
    assert_eq!(registry.get_or_init().unwrap().name(), "host");

    let registry = RuntimeRegistry::from_manager(Arc::new(MockRuntime::new()));
    assert_eq!(registry.get_or_init().unwrap().name(), "test");
}
