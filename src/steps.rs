//! # Build Steps - Ordered Sync/Async Scheduling
//!
//! A [`BuildSteps`] list holds named build units. Each is registered either
//! synchronously (awaited in place) or asynchronously (spawned and joined at
//! the end of the run).
//!
//! ## Execution
//!
//! ```text
//! run(filter)
//!   │
//!   ├─ step A (sync)   ── await ── Err → stop scheduling, remember error
//!   ├─ step B (async)  ── tokio::spawn ──────────────┐
//!   ├─ step C (sync)   ── await                      │
//!   │                                                │
//!   └─ join barrier ◄────────────────────────────────┘
//!        └─ async Err / panic → AsyncFailureHandler
//! ```
//!
//! A sync failure is returned to the caller once every spawned step has
//! finished. Spawned steps are never cancelled.
//!
//! An async failure goes to the [`AsyncFailureHandler`]. The default handler
//! is [`fatal::terminate`], so a failing background step ends the process
//! while a failing foreground step is an ordinary error value.

use crate::error::{Error, Result};
use crate::fatal;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Receives failures of asynchronous steps.
pub type AsyncFailureHandler = Arc<dyn Fn(Error) + Send + Sync>;

/// A named build unit.
#[async_trait]
pub trait BuildStep: Send + Sync {
    /// Name used for filtering and diagnostics.
    fn name(&self) -> &str;

    /// Images this step needs. Must not touch any backend.
    fn images(&self) -> Vec<String> {
        Vec::new()
    }

    async fn run(&self) -> Result<()>;
}

struct Registered {
    step: Arc<dyn BuildStep>,
    asynchronous: bool,
}

/// Ordered list of build steps.
pub struct BuildSteps {
    name: String,
    steps: Vec<Registered>,
    on_async_failure: AsyncFailureHandler,
}

impl BuildSteps {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            on_async_failure: Arc::new(|err: Error| {
                fatal::terminate(&err);
            }),
        }
    }

    /// Replaces the async failure handler.
    pub fn with_async_failure_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        self.on_async_failure = Arc::new(handler);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a step awaited in place.
    pub fn add(&mut self, step: Arc<dyn BuildStep>) -> &mut Self {
        self.steps.push(Registered {
            step,
            asynchronous: false,
        });
        self
    }

    /// Registers a step spawned in the background.
    pub fn add_async(&mut self, step: Arc<dyn BuildStep>) -> &mut Self {
        self.steps.push(Registered {
            step,
            asynchronous: true,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|r| r.step.name()).collect()
    }

    fn selected<'a>(&'a self, filter: Option<&'a str>) -> impl Iterator<Item = &'a Registered> {
        self.steps
            .iter()
            .filter(move |r| filter.is_none_or(|f| r.step.name() == f))
    }

    /// Images declared by the selected steps, in order.
    pub fn images(&self, filter: Option<&str>) -> Vec<String> {
        self.selected(filter).flat_map(|r| r.step.images()).collect()
    }

    /// Runs the selected steps.
    ///
    /// Returns the first sync failure, after all spawned steps have joined.
    pub async fn run(&self, filter: Option<&str>) -> Result<()> {
        info!("Running build steps {} (filter: {:?})", self.name, filter);

        let mut spawned: Vec<(String, JoinHandle<Result<()>>)> = Vec::new();
        let mut outcome = Ok(());

        for registered in self.selected(filter) {
            let name = registered.step.name().to_string();

            if registered.asynchronous {
                debug!("Spawning async step {}", name);
                let step = Arc::clone(&registered.step);
                spawned.push((name, tokio::spawn(async move { step.run().await })));
                continue;
            }

            debug!("Running step {}", name);
            if let Err(e) = registered.step.run().await {
                error!("Step {} failed: {}", name, e);
                outcome = Err(match e {
                    Error::StepFailed { .. } => e,
                    e if e.is_fatal() => e,
                    other => Error::StepFailed {
                        step: name,
                        reason: other.to_string(),
                    },
                });
                break;
            }
            info!("Step {} completed", name);
        }

        for (name, handle) in spawned {
            let reason = match handle.await {
                Ok(Ok(())) => {
                    info!("Async step {} completed", name);
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(join) if join.is_panic() => "step panicked".to_string(),
                Err(join) => join.to_string(),
            };
            error!("Async step {} failed: {}", name, reason);
            (self.on_async_failure)(Error::AsyncStepFailed { step: name, reason });
        }

        outcome
    }
}
