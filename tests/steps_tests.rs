//! Tests for the build-step scheduler and the script step.
//!
//! Async failures are captured with a recording handler instead of the
//! default process-terminating one.

use async_trait::async_trait;
use buildrun::constants::SCRIPT_PATH;
use buildrun::{
    BuildStep, BuildSteps, ContainerManager, ContainerStatus, Error, IntermediateImage,
    MockRuntime, Result, ScriptStep, fatal,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Step with a scripted outcome that records whether it ran.
struct Scripted {
    name: &'static str,
    fail: bool,
    delay: Duration,
    ran: AtomicBool,
    images: Vec<String>,
}

impl Scripted {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail: false,
            delay: Duration::ZERO,
            ran: AtomicBool::new(false),
            images: vec![format!("{}:latest", name)],
        })
    }

    fn failing(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Arc::into_inner(Self::new(name)).unwrap()
        })
    }

    fn slow(name: &'static str, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            fail,
            delay: Duration::from_millis(100),
            ..Arc::into_inner(Self::new(name)).unwrap()
        })
    }

    fn ran(&self) -> bool {
        self.ran.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BuildStep for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    fn images(&self) -> Vec<String> {
        self.images.clone()
    }

    async fn run(&self) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.ran.store(true, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Internal(format!("{} failed", self.name)));
        }
        Ok(())
    }
}

fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(Error) + Send + Sync + 'static) {
    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&failures);
    let handler = move |err: Error| {
        if let Error::AsyncStepFailed { step, .. } = err {
            sink.lock().unwrap().push(step);
        }
    };
    (failures, handler)
}

// =============================================================================
// Scheduler Tests
// =============================================================================

#[tokio::test]
async fn test_sync_failure_skips_rest_but_joins_async() {
    let a = Scripted::failing("a");
    let b = Scripted::slow("b", false);
    let c = Scripted::new("c");
    let (failures, handler) = recorder();

    // B is registered before A so it is already spawned when A fails.
    let mut steps = BuildSteps::new("ci").with_async_failure_handler(handler);
    steps.add_async(b.clone()).add(a.clone()).add(c.clone());

    let err = steps.run(None).await.unwrap_err();
    assert!(matches!(err, Error::StepFailed { ref step, .. } if step == "a"));
    assert!(a.ran());
    assert!(b.ran(), "async step must finish before run returns");
    assert!(!c.ran(), "steps after a sync failure never run");
    assert!(failures.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_sync_failure_before_async_never_spawns_it() {
    let a = Scripted::failing("a");
    let b = Scripted::new("b");
    let c = Scripted::new("c");

    let mut steps = BuildSteps::new("ci");
    steps.add(a.clone()).add_async(b.clone()).add(c.clone());

    assert!(steps.run(None).await.is_err());
    assert!(!b.ran());
    assert!(!c.ran());
}

#[tokio::test]
async fn test_async_failure_goes_to_handler() {
    let a = Scripted::new("a");
    let b = Scripted::slow("b", true);
    let c = Scripted::new("c");
    let (failures, handler) = recorder();

    let mut steps = BuildSteps::new("ci").with_async_failure_handler(handler);
    steps.add(a.clone()).add_async(b.clone()).add(c.clone());

    // The sync part succeeded, so run itself succeeds.
    steps.run(None).await.unwrap();
    assert!(a.ran() && b.ran() && c.ran());
    assert_eq!(*failures.lock().unwrap(), vec!["b".to_string()]);
}

#[tokio::test]
async fn test_async_panic_goes_to_handler() {
    struct Panics;

    #[async_trait]
    impl BuildStep for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        async fn run(&self) -> Result<()> {
            panic!("step blew up");
        }
    }

    let (failures, handler) = recorder();
    let mut steps = BuildSteps::new("ci").with_async_failure_handler(handler);
    steps.add_async(Arc::new(Panics));

    steps.run(None).await.unwrap();
    assert_eq!(*failures.lock().unwrap(), vec!["panics".to_string()]);
}

#[tokio::test]
async fn test_configuration_error_stays_fatal() {
    struct NeedsToken;

    #[async_trait]
    impl BuildStep for NeedsToken {
        fn name(&self) -> &str {
            "release"
        }

        async fn run(&self) -> Result<()> {
            Err(Error::Configuration("GITHUB_TOKEN is not set".to_string()))
        }
    }

    let mut steps = BuildSteps::new("ci");
    steps.add(Arc::new(NeedsToken));

    let err = steps.run(None).await.unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "{:?}", err);
    assert!(err.is_fatal());
    assert_eq!(fatal::exit_code(&err), 2);
}

/// Set in the re-executed test binary that hosts the terminating run.
const TERMINATE_CHILD_ENV: &str = "BUILDRUN_TERMINATE_CHILD";

#[test]
fn test_default_handler_terminates_on_async_failure() {
    if std::env::var_os(TERMINATE_CHILD_ENV).is_some() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let mut steps = BuildSteps::new("ci");
            steps.add_async(Scripted::failing("publish"));
            let _ = steps.run(None).await;
        });
        // Reaching this point means the process survived the failure.
        return;
    }

    let status = std::process::Command::new(std::env::current_exe().unwrap())
        .args([
            "test_default_handler_terminates_on_async_failure",
            "--exact",
            "--nocapture",
            "--test-threads=1",
        ])
        .env(TERMINATE_CHILD_ENV, "1")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .unwrap();
    assert!(!status.success());
    assert_eq!(status.code(), Some(1));
}

#[tokio::test]
async fn test_filter_runs_only_named_step() {
    let a = Scripted::new("a");
    let b = Scripted::new("b");

    let mut steps = BuildSteps::new("ci");
    steps.add(a.clone()).add(b.clone());

    steps.run(Some("b")).await.unwrap();
    assert!(!a.ran());
    assert!(b.ran());
}

#[tokio::test]
async fn test_steps_run_in_order() {
    struct Ordered(&'static str, usize, Arc<AtomicUsize>);

    #[async_trait]
    impl BuildStep for Ordered {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self) -> Result<()> {
            let seen = self.2.fetch_add(1, Ordering::SeqCst);
            if seen != self.1 {
                return Err(Error::Internal(format!("{} ran at {}", self.0, seen)));
            }
            Ok(())
        }
    }

    let counter = Arc::new(AtomicUsize::new(0));
    let mut steps = BuildSteps::new("ci");
    for (i, name) in ["one", "two", "three"].into_iter().enumerate() {
        steps.add(Arc::new(Ordered(name, i, counter.clone())));
    }
    steps.run(None).await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_images_has_no_side_effects() {
    let mock = Arc::new(MockRuntime::new());
    let manager: Arc<dyn ContainerManager> = mock.clone();

    let mut steps = BuildSteps::new("ci");
    steps
        .add(Arc::new(ScriptStep::new(
            "lint",
            manager.clone(),
            "golangci/golangci-lint:v1",
            "golangci-lint run",
        )))
        .add(Arc::new(ScriptStep::new("test", manager, "golang:1.22", "go test ./...")));

    assert_eq!(steps.images(Some("test")), vec!["golang:1.22"]);
    assert_eq!(steps.images(None).len(), 2);
    assert_eq!(mock.calls().total(), 0);
}

// =============================================================================
// Script Step Tests
// =============================================================================

#[tokio::test]
async fn test_script_step_full_cycle() {
    let mock = Arc::new(MockRuntime::new());
    let step = ScriptStep::new("test", mock.clone(), "golang:1.22", "go test ./...\n");

    step.run().await.unwrap();

    let calls = mock.calls();
    assert_eq!((calls.pull, calls.create, calls.start), (1, 1, 1));
    assert_eq!((calls.exec, calls.stop, calls.remove), (1, 1, 1));

    let execs = mock.execs();
    assert_eq!(execs.len(), 1);
    assert_eq!(execs[0].1, vec!["sh".to_string(), SCRIPT_PATH.to_string()]);
    assert!(mock.container_list(true).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_script_step_skips_pull_for_present_image() {
    let mock = Arc::new(MockRuntime::new());
    mock.add_image("golang:1.22");

    ScriptStep::new("test", mock.clone(), "golang:1.22", "true")
        .run()
        .await
        .unwrap();
    assert_eq!(mock.calls().pull, 0);
}

#[tokio::test]
async fn test_script_step_failure_keeps_container() {
    let mock = Arc::new(MockRuntime::new());
    mock.set_exec_result(1, "FAIL: TestParse\n");

    let err = ScriptStep::new("test", mock.clone(), "golang:1.22", "go test ./...")
        .run()
        .await
        .unwrap_err();
    match err {
        Error::StepFailed { step, reason } => {
            assert_eq!(step, "test");
            assert!(reason.contains("FAIL: TestParse"), "{}", reason);
        }
        other => panic!("unexpected error: {}", other),
    }

    let execs = mock.execs();
    let id = &execs[0].0;
    assert_eq!(mock.status(id).unwrap(), ContainerStatus::Started);
    assert_eq!(mock.file(id, SCRIPT_PATH).unwrap(), b"go test ./...");
    assert_eq!(mock.calls().remove, 0);
}

#[tokio::test]
async fn test_script_step_pull_failure_is_step_failure() {
    let mock = Arc::new(MockRuntime::new());
    mock.inject_pull_error("private/tool:1", "unauthorized");

    let mut steps = BuildSteps::new("ci");
    steps.add(Arc::new(ScriptStep::new("tool", mock.clone(), "private/tool:1", "tool")));

    let err = steps.run(None).await.unwrap_err();
    assert!(matches!(err, Error::StepFailed { ref step, .. } if step == "tool"));
    assert_eq!(mock.calls().create, 0);
}

#[tokio::test]
async fn test_script_step_builds_intermediate_image_once() {
    let mock = Arc::new(MockRuntime::new());
    let dockerfile = b"FROM alpine\nRUN apk add protoc\n".to_vec();
    let image = IntermediateImage::new("buildrun.local", "protoc", dockerfile);
    let tag = image.tag();

    let mut steps = BuildSteps::new("ci");
    steps
        .add(Arc::new(ScriptStep::from_dockerfile(
            "gen",
            mock.clone(),
            image.clone(),
            "protoc",
        )))
        .add(Arc::new(ScriptStep::from_dockerfile(
            "gen-again",
            mock.clone(),
            image,
            "protoc",
        )));
    steps.run(None).await.unwrap();

    assert_eq!(mock.calls().build, 1);
    assert_eq!(mock.calls().pull, 0);
    assert!(mock.inspect_image(&tag).await.is_ok());
}
