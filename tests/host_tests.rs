//! Tests for the host-process runtime.
//!
//! Runs real processes through `sh`, so these tests are unix-only.
#![cfg(unix)]

use buildrun::constants::SCRIPT_PATH;
use buildrun::manager::drain_string;
use buildrun::{
    ContainerConfig, ContainerManager, ContainerStatus, Error, HostRuntime, VirtualTarget, Volume,
    WaitCondition,
};
use tempfile::TempDir;

fn runtime() -> (TempDir, HostRuntime) {
    let state = tempfile::tempdir().unwrap();
    let runtime = HostRuntime::with_state_root(state.path());
    (state, runtime)
}

fn shell(script: &str) -> ContainerConfig {
    ContainerConfig::new("host").with_cmd(["sh", "-c", script])
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_run_and_collect_logs() {
    let (_state, host) = runtime();
    let id = host.create_container(&shell("echo hi; echo oops >&2"), None).await.unwrap();
    host.start_container(&id).await.unwrap();

    assert_eq!(host.wait_container(&id, WaitCondition::NotRunning).await.unwrap(), 0);

    let stdout = drain_string(host.container_logs(&id, true, false, false).await.unwrap())
        .await
        .unwrap();
    assert_eq!(stdout, "hi\n");
    let both = drain_string(host.container_logs(&id, true, true, false).await.unwrap())
        .await
        .unwrap();
    assert_eq!(both, "hi\noops\n");
}

#[tokio::test]
async fn test_exit_code_is_reported() {
    let (_state, host) = runtime();
    let id = host.create_container(&shell("exit 7"), None).await.unwrap();
    host.start_container(&id).await.unwrap();
    assert_eq!(host.wait_container(&id, WaitCondition::NotRunning).await.unwrap(), 7);

    let list = host.container_list(true).await.unwrap();
    assert_eq!(list[0].status, ContainerStatus::Exited.to_string());
}

#[tokio::test]
async fn test_follow_logs_waits_for_exit() {
    let (_state, host) = runtime();
    let id = host
        .create_container(&shell("sleep 0.2; echo done"), None)
        .await
        .unwrap();
    host.start_container(&id).await.unwrap();

    let logs = drain_string(host.container_logs(&id, true, true, true).await.unwrap())
        .await
        .unwrap();
    assert_eq!(logs, "done\n");
}

#[tokio::test]
async fn test_stop_kills_process() {
    let (_state, host) = runtime();
    let id = host.create_container(&shell("sleep 30"), None).await.unwrap();
    host.start_container(&id).await.unwrap();

    host.stop_container(&id, None).await.unwrap();
    let code = host.wait_container(&id, WaitCondition::NotRunning).await.unwrap();
    assert_ne!(code, 0);

    host.remove_container(&id, false).await.unwrap();
    assert!(host.inspect_container(&id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_remove_running_requires_force() {
    let (_state, host) = runtime();
    let id = host.create_container(&shell("sleep 30"), None).await.unwrap();
    host.start_container(&id).await.unwrap();

    let err = host.remove_container(&id, false).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
    host.remove_container(&id, true).await.unwrap();
}

#[tokio::test]
async fn test_remove_deletes_state_dir() {
    let (state, host) = runtime();
    let id = host.create_container(&shell("true"), None).await.unwrap();
    assert!(state.path().join(&id).is_dir());

    host.remove_container(&id, false).await.unwrap();
    assert!(!state.path().join(&id).exists());
}

#[tokio::test]
async fn test_create_then_inspect_returns_same_config() {
    let (_state, host) = runtime();
    let config = shell("true")
        .with_env("A", "1")
        .with_secret("TOKEN", "s3cr3t")
        .with_working_dir("/src");
    let id = host.create_container(&config, None).await.unwrap();
    assert_eq!(host.inspect_container(&id).await.unwrap(), config);
}

#[tokio::test]
async fn test_unknown_id_not_found() {
    let (_state, host) = runtime();
    assert!(host.start_container("nope").await.unwrap_err().is_not_found());
    assert!(host.stop_container("nope", None).await.unwrap_err().is_not_found());
    assert!(
        host.wait_container("nope", WaitCondition::NotRunning)
            .await
            .unwrap_err()
            .is_not_found()
    );
    assert!(host.container_logs("nope", true, true, false).await.err().unwrap().is_not_found());
}

#[tokio::test]
async fn test_env_and_secrets_reach_process() {
    let (_state, host) = runtime();
    let config = shell("echo $A-$TOKEN")
        .with_env("A", "1")
        .with_secret("TOKEN", "s3cr3t");
    let id = host.create_container(&config, None).await.unwrap();
    host.start_container(&id).await.unwrap();
    host.wait_container(&id, WaitCondition::NotRunning).await.unwrap();

    let logs = drain_string(host.container_logs(&id, true, false, false).await.unwrap())
        .await
        .unwrap();
    assert_eq!(logs, "1-s3cr3t\n");
}

// =============================================================================
// Virtual Target Tests
// =============================================================================

#[tokio::test]
async fn test_script_runs_relative_to_mounted_source() {
    let (_state, host) = runtime();
    let src = tempfile::tempdir().unwrap();
    std::fs::write(src.path().join("VERSION"), "1.2.3\n").unwrap();

    let config = ContainerConfig::new("host")
        .with_volume(Volume::bind(src.path().to_string_lossy(), "/src"))
        .with_working_dir("/src");
    let id = host.create_container(&config, None).await.unwrap();
    host.start_container(&id).await.unwrap();

    host.copy_content_to_container(&id, b"cat /src/VERSION\n", SCRIPT_PATH)
        .await
        .unwrap();
    let copied = host.copy_file_from_container(&id, SCRIPT_PATH).await.unwrap();
    assert_eq!(copied, b"cat VERSION\n");

    let cmd = vec!["sh".to_string(), SCRIPT_PATH.to_string()];
    let out = host.exec_container(&id, &cmd, true).await.unwrap();
    assert_eq!(out.exit_code, Some(0));
    assert_eq!(drain_string(out.output).await.unwrap(), "1.2.3\n");
}

#[tokio::test]
async fn test_script_cd_into_bare_working_dir() {
    let (_state, host) = runtime();
    let src = tempfile::tempdir().unwrap();
    std::fs::write(src.path().join("VERSION"), "1.2.3\n").unwrap();

    let config = ContainerConfig::new("host")
        .with_volume(Volume::bind(src.path().to_string_lossy(), "/src"))
        .with_working_dir("/src");
    let id = host.create_container(&config, None).await.unwrap();
    host.start_container(&id).await.unwrap();

    host.copy_content_to_container(&id, b"cd /src && cat VERSION\n", SCRIPT_PATH)
        .await
        .unwrap();
    let copied = host.copy_file_from_container(&id, SCRIPT_PATH).await.unwrap();
    assert_eq!(copied, b"cd . && cat VERSION\n");

    let cmd = vec!["sh".to_string(), SCRIPT_PATH.to_string()];
    let out = host.exec_container(&id, &cmd, true).await.unwrap();
    assert_eq!(out.exit_code, Some(0));
    assert_eq!(drain_string(out.output).await.unwrap(), "1.2.3\n");
}

#[tokio::test]
async fn test_custom_virtual_target() {
    let state = tempfile::tempdir().unwrap();
    let host = HostRuntime::with_state_root(state.path())
        .with_virtual_target(VirtualTarget::new("/etc/buildrun/env", "env"));
    let id = host.create_container(&shell("true"), None).await.unwrap();

    host.copy_content_to_container(&id, b"A=1\n", "/etc/buildrun/env")
        .await
        .unwrap();
    assert_eq!(std::fs::read(state.path().join(&id).join("env")).unwrap(), b"A=1\n");
}

#[tokio::test]
async fn test_copy_to_undeclared_path_not_supported() {
    let (_state, host) = runtime();
    let id = host.create_container(&shell("true"), None).await.unwrap();

    let err = host
        .copy_content_to_container(&id, b"x", "/usr/local/bin/tool")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotSupported { .. }));
}

#[tokio::test]
async fn test_engine_only_operations_not_supported() {
    let (_state, host) = runtime();
    let id = host.create_container(&shell("true"), None).await.unwrap();

    assert!(matches!(
        host.commit_container(&id, "app:1").await.unwrap_err(),
        Error::NotSupported { .. }
    ));
    assert!(matches!(
        host.push_image("app:1", None).await.unwrap_err(),
        Error::NotSupported { .. }
    ));
    assert!(matches!(
        host.copy_directory_to_container(&id, std::path::Path::new("/tmp"), "/src")
            .await
            .unwrap_err(),
        Error::NotSupported { .. }
    ));
}

#[tokio::test]
async fn test_images_are_recorded_not_built() {
    let (_state, host) = runtime();
    host.build_image(b"FROM scratch\n", "tool:1", None).await.unwrap();
    host.tag_image("tool:1", "tool:latest").await.unwrap();

    let names: Vec<_> = host
        .list_images()
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.name)
        .collect();
    assert_eq!(names, vec!["tool:1", "tool:latest"]);
    assert!(host.inspect_image("other").await.unwrap_err().is_not_found());
}
