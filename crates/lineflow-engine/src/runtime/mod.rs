//! Host runtimes that execute an assembled pipeline.

mod local;

use std::sync::Arc;

use anyhow::anyhow;
use lineflow_types::SubmitError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::assembler::PipelinePlan;
use crate::result::RunSummary;

pub use local::LocalRuntime;

/// Accepts assembled pipelines for execution.
pub trait HostRuntime {
    /// Start running `plan`.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::AlreadyRunning`] if a pipeline with the same
    /// name is live, or [`SubmitError::Rejected`] if the runtime cannot run
    /// the plan.
    fn submit(&self, plan: PipelinePlan) -> Result<RunHandle, SubmitError>;
}

/// A submitted pipeline run.
#[derive(Debug)]
pub struct RunHandle {
    pipeline: String,
    shutdown: Arc<watch::Sender<bool>>,
    task: Option<JoinHandle<anyhow::Result<RunSummary>>>,
}

impl RunHandle {
    pub(crate) fn new(
        pipeline: String,
        shutdown: Arc<watch::Sender<bool>>,
        task: JoinHandle<anyhow::Result<RunSummary>>,
    ) -> Self {
        Self {
            pipeline,
            shutdown,
            task: Some(task),
        }
    }

    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Ask the sources to stop. In-flight records still drain through the
    /// transforms.
    pub fn shutdown(&self) {
        tracing::info!(pipeline = self.pipeline, "Shutdown requested");
        self.shutdown.send_replace(true);
    }

    /// Wait for the run to finish. Cancel-safe; may be awaited again after
    /// being dropped mid-wait.
    ///
    /// # Errors
    ///
    /// Returns the error that failed the run, or an error if the run task
    /// panicked or was already collected.
    pub async fn wait(&mut self) -> anyhow::Result<RunSummary> {
        let task = self
            .task
            .as_mut()
            .ok_or_else(|| anyhow!("run of pipeline {} already collected", self.pipeline))?;
        let joined = task.await;
        self.task = None;
        joined.map_err(|e| anyhow!("pipeline run task panicked: {e}"))?
    }
}
