//! Pull-request workflow engine.
//!
//! A [`Worker`] owns the run configuration and the three injected
//! capabilities, and drives either [`Worker::process_existing`] or
//! [`Worker::start_new`]. Each step is wrapped by [`in_stage`] so the first
//! failure aborts the run tagged with the stage it happened in.

pub mod branch;
pub mod process;
pub mod prompt;
pub mod report;
pub mod start;
pub mod types;

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::exec::CommandRunner;
use crate::platform::HostingService;
use crate::workspace::VersionControl;

pub use types::{
    ErrorKind, ProcessOutcome, Stage, StartOutcome, WorkOrder, WorkflowConfig, WorkflowError,
    WorkflowResult,
};

/// Commit message for changes left behind by the agent.
pub const AUTOMATED_COMMIT_MESSAGE: &str = "Automated changes by kratt worker";

pub struct Worker {
    config: WorkflowConfig,
    git: Arc<dyn VersionControl>,
    hosting: Arc<dyn HostingService>,
    runner: Arc<dyn CommandRunner>,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(
        config: WorkflowConfig,
        git: Arc<dyn VersionControl>,
        hosting: Arc<dyn HostingService>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            git,
            hosting,
            runner,
            cancel: CancellationToken::new(),
        })
    }

    /// Tie runs to an upstream token, e.g. one cancelled on Ctrl+C.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }
}

/// Run one step, converting its failure into a [`WorkflowError`] for `stage`.
pub(crate) async fn in_stage<T, F>(stage: Stage, step: F) -> WorkflowResult<T>
where
    F: Future<Output = Result<T>>,
{
    tracing::debug!(stage = %stage, "Entering stage");
    step.await.map_err(|source| {
        tracing::error!(stage = %stage, error = %source, "Stage failed");
        WorkflowError::new(stage, source)
    })
}
