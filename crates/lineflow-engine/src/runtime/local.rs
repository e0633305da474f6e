//! Single-machine host runtime.
//!
//! Sources run on blocking threads, transform instances on tokio tasks, and
//! edges are bounded channels sized by `lineflow.runtime.max_pending`. Each
//! transform instance owns one subprocess bridge and writes to the sink
//! partition numbered after it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use lineflow_state::{SqliteStateBackend, StateBackend};
use lineflow_types::state::{PipelineId, RunStatus};
use lineflow_types::{Record, SubmitError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use super::{HostRuntime, RunHandle};
use crate::assembler::{combine_metadata, PipelinePlan};
use crate::bridge::{error_channel, ErrorReporter, ProcessSpec, SubprocessBridge};
use crate::config::{PipelineConfig, SourceConfig};
use crate::connectors::{
    merge_checkpoints, Checkpoint, FileBlobSource, LocalLogSink, LocalLogSource, RecordSink,
    RecordSource, SourceItem, TopicRouter,
};
use crate::result::{InstanceSummary, RunSummary};

const STATE_FILE: &str = "state.db";
const LOG_DIR: &str = "log";

/// Runs pipelines in-process against the local connectors.
#[derive(Debug, Clone, Default)]
pub struct LocalRuntime {
    running: Arc<Mutex<HashSet<String>>>,
}

impl LocalRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory the local partitioned log lives in.
    #[must_use]
    pub fn log_root(local_dir: &Path) -> PathBuf {
        local_dir.join(LOG_DIR)
    }

    /// Location of the state database.
    #[must_use]
    pub fn state_path(local_dir: &Path) -> PathBuf {
        local_dir.join(STATE_FILE)
    }

    /// Whether a pipeline with this name is currently running.
    #[must_use]
    pub fn is_running(&self, pipeline: &str) -> bool {
        self.running
            .lock()
            .map(|set| set.contains(pipeline))
            .unwrap_or(false)
    }
}

/// Removes the pipeline name from the running set when the run ends.
struct RunningGuard {
    running: Arc<Mutex<HashSet<String>>>,
    pipeline: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.running.lock() {
            set.remove(&self.pipeline);
        }
    }
}

impl HostRuntime for LocalRuntime {
    fn submit(&self, plan: PipelinePlan) -> Result<RunHandle, SubmitError> {
        let name = plan.pipeline.clone();
        if matches!(plan.config.source, SourceConfig::RemoteObjectStore(_)) {
            return Err(SubmitError::Rejected {
                name,
                reason: "the local runtime has no connector for the remote object store source"
                    .into(),
            });
        }

        {
            let mut running = self.running.lock().map_err(|_| SubmitError::Rejected {
                name: name.clone(),
                reason: "runtime registry poisoned".into(),
            })?;
            if !running.insert(name.clone()) {
                return Err(SubmitError::AlreadyRunning(name));
            }
        }
        let guard = RunningGuard {
            running: Arc::clone(&self.running),
            pipeline: name.clone(),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);
        let task_shutdown = Arc::clone(&shutdown_tx);
        let task = tokio::spawn(async move {
            let _guard = guard;
            run_plan(plan, task_shutdown, shutdown_rx).await
        });

        tracing::info!(pipeline = name, "Pipeline submitted");
        Ok(RunHandle::new(name, shutdown_tx, task))
    }
}

async fn run_plan(
    plan: PipelinePlan,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<RunSummary> {
    let start = Instant::now();
    let config = Arc::clone(&plan.config);
    let pipeline_id = PipelineId::new(config.name.clone());

    let state_path = LocalRuntime::state_path(&config.runtime.local_dir);
    let state: Arc<dyn StateBackend> = Arc::new(
        SqliteStateBackend::open(&state_path)
            .with_context(|| format!("failed to open state at {}", state_path.display()))?,
    );

    let state_for_run = Arc::clone(&state);
    let pipeline_for_run = pipeline_id.clone();
    let run_id = tokio::task::spawn_blocking(move || state_for_run.start_run(&pipeline_for_run))
        .await
        .context("start_run task panicked")?
        .context("failed to record run start")?;

    tracing::info!(pipeline = config.name, run_id, "Starting pipeline run");
    let outcome = execute(&plan, Arc::clone(&state), &pipeline_id, shutdown_tx, shutdown_rx).await;

    let (status, stats) = match &outcome {
        Ok(summary) => (RunStatus::Completed, summary.stats()),
        Err(e) => (
            RunStatus::Failed,
            lineflow_types::state::RunStats {
                error_message: Some(format!("{e:#}")),
                ..Default::default()
            },
        ),
    };
    let state_for_complete = Arc::clone(&state);
    let recorded = tokio::task::spawn_blocking(move || {
        state_for_complete.complete_run(run_id, status, &stats)?;
        state_for_complete.get_run(run_id)
    })
    .await
    .context("complete_run task panicked")?
    .context("failed to record run completion")?;

    let mut summary = outcome?;
    summary.run_id = run_id;
    if let Some(run) = recorded {
        summary.started_at = Some(run.started_at);
        summary.finished_at = run.finished_at;
    }
    summary.duration_secs = start.elapsed().as_secs_f64();
    tracing::info!(
        pipeline = summary.pipeline,
        run_id,
        records_read = summary.records_read,
        records_out = summary.records_out(),
        records_dropped = summary.records_dropped(),
        restarts = summary.restarts(),
        errors_reported = summary.errors_reported(),
        duration_secs = summary.duration_secs,
        "Pipeline run finished"
    );
    Ok(summary)
}

struct SourceOutcome {
    records_read: u64,
    checkpoints: Vec<Checkpoint>,
}

#[allow(clippy::too_many_lines)]
async fn execute(
    plan: &PipelinePlan,
    state: Arc<dyn StateBackend>,
    pipeline_id: &PipelineId,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<RunSummary> {
    let config = &plan.config;
    let source_count = usize::try_from(plan.source_parallelism)?;
    let transform_count = usize::try_from(plan.transform_parallelism)?;
    let capacity = config.runtime.max_pending;

    let mut senders = Vec::with_capacity(transform_count);
    let mut receivers = Vec::with_capacity(transform_count);
    for _ in 0..transform_count {
        let (tx, rx) = mpsc::channel::<Record>(capacity);
        senders.push(tx);
        receivers.push(rx);
    }

    let (reporter, mut error_rx) = error_channel();
    let mut transforms: JoinSet<Result<InstanceSummary>> = JoinSet::new();
    for (instance, rx) in receivers.into_iter().enumerate() {
        transforms.spawn(run_transform(
            instance,
            Arc::clone(config),
            rx,
            reporter.clone(),
        ));
    }
    drop(reporter);

    let mut sources: JoinSet<Result<SourceOutcome>> = JoinSet::new();
    for instance in 0..source_count {
        let targets: Vec<mpsc::Sender<Record>> = if plan.repartition {
            senders.clone()
        } else {
            vec![senders[instance % transform_count].clone()]
        };
        let config = Arc::clone(config);
        let state = Arc::clone(&state);
        let pipeline_id = pipeline_id.clone();
        let shutdown = shutdown_rx.clone();
        let combine = plan.combine_metadata;
        sources.spawn_blocking(move || {
            run_source(
                instance,
                &config,
                state.as_ref(),
                &pipeline_id,
                &targets,
                &shutdown,
                combine,
            )
        });
    }
    drop(senders);

    let mut first_error: Option<anyhow::Error> = None;
    let mut records_read = 0;
    let mut checkpoints = Vec::new();
    while let Some(joined) = sources.join_next().await {
        match joined {
            Ok(Ok(outcome)) => {
                records_read += outcome.records_read;
                checkpoints.extend(outcome.checkpoints);
            }
            Ok(Err(e)) => {
                tracing::error!(error = %format!("{e:#}"), "Source failed, stopping pipeline");
                shutdown_tx.send_replace(true);
                first_error.get_or_insert(e);
            }
            Err(join_err) => {
                shutdown_tx.send_replace(true);
                first_error.get_or_insert(anyhow::anyhow!("source task panicked: {join_err}"));
            }
        }
    }

    let mut instances = Vec::with_capacity(transform_count);
    while let Some(joined) = transforms.join_next().await {
        match joined {
            Ok(Ok(summary)) => instances.push(summary),
            Ok(Err(e)) => {
                tracing::error!(error = %format!("{e:#}"), "Transform instance failed");
                first_error.get_or_insert(e);
            }
            Err(join_err) => {
                first_error.get_or_insert(anyhow::anyhow!("transform task panicked: {join_err}"));
            }
        }
    }
    instances.sort_by_key(|s| s.instance);

    for reported in error_rx.drain() {
        if let Some(summary) = instances.iter_mut().find(|s| s.instance == reported.instance) {
            summary.errors_reported += 1;
        }
        tracing::warn!(instance = reported.instance, error = %reported.error, "Pipeline error reported");
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    let merged = merge_checkpoints(checkpoints);
    let pipeline_for_commit = pipeline_id.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        for cp in &merged {
            state
                .set_cursor(&pipeline_for_commit, &cp.stream, &cp.value)
                .with_context(|| format!("failed to store cursor for {}", cp.stream))?;
            tracing::debug!(stream = %cp.stream, value = cp.value, "Cursor stored");
        }
        Ok(())
    })
    .await
    .context("cursor commit task panicked")??;

    Ok(RunSummary {
        pipeline: config.name.clone(),
        records_read,
        instances,
        ..RunSummary::default()
    })
}

fn open_source(
    instance: u32,
    config: &PipelineConfig,
    state: &dyn StateBackend,
    pipeline_id: &PipelineId,
) -> Result<Box<dyn RecordSource>> {
    match &config.source {
        SourceConfig::Log(log) => {
            let root = LocalRuntime::log_root(&config.runtime.local_dir);
            Ok(Box::new(LocalLogSource::open(
                &root,
                log,
                instance,
                state,
                pipeline_id,
            )?))
        }
        SourceConfig::FileBlob(blob) => Ok(Box::new(FileBlobSource::open(
            blob,
            instance,
            state,
            pipeline_id,
        )?)),
        SourceConfig::RemoteObjectStore(_) => {
            anyhow::bail!("no local connector for the remote object store source")
        }
    }
}

fn to_record(item: SourceItem, combine: bool) -> Option<Record> {
    let line = match (&item.metadata, combine) {
        (Some(meta), true) => combine_metadata(&meta.origin, &item.content, meta.line),
        _ => item.content,
    };
    match Record::new(line) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping source item that is not a single line");
            None
        }
    }
}

/// Read one source instance to exhaustion or shutdown.
///
/// With one target the instance keeps natural partitioning; with several it
/// round-robins, starting at its own index.
fn run_source(
    instance: usize,
    config: &PipelineConfig,
    state: &dyn StateBackend,
    pipeline_id: &PipelineId,
    targets: &[mpsc::Sender<Record>],
    shutdown: &watch::Receiver<bool>,
    combine: bool,
) -> Result<SourceOutcome> {
    let mut source = open_source(u32::try_from(instance)?, config, state, pipeline_id)
        .with_context(|| format!("failed to open source instance {instance}"))?;

    let mut records_read = 0;
    let mut next_target = instance;
    while !*shutdown.borrow() {
        let Some(item) = source.next_item()? else {
            break;
        };
        records_read += 1;
        let Some(record) = to_record(item, combine) else {
            continue;
        };
        let target = &targets[next_target % targets.len()];
        next_target += 1;
        if target.blocking_send(record).is_err() {
            tracing::warn!(instance, "Transform side closed, stopping source");
            break;
        }
    }

    tracing::debug!(instance, records_read, "Source instance finished");
    Ok(SourceOutcome {
        records_read,
        checkpoints: source.checkpoints(),
    })
}

async fn run_transform(
    instance: usize,
    config: Arc<PipelineConfig>,
    mut rx: mpsc::Receiver<Record>,
    reporter: ErrorReporter,
) -> Result<InstanceSummary> {
    let partition = u32::try_from(instance)?;
    let mut sink = LocalLogSink::new(LocalRuntime::log_root(&config.runtime.local_dir), partition);
    let router = TopicRouter::from(&config.sink);
    let mut bridge = SubprocessBridge::new(ProcessSpec::from(&config.transform), instance, reporter);
    let mut summary = InstanceSummary {
        instance,
        ..InstanceSummary::default()
    };

    let result = async {
        while let Some(record) = rx.recv().await {
            summary.records_in += 1;
            let Some(batch) = bridge.execute(&record).await else {
                summary.records_dropped += 1;
                continue;
            };
            summary.batches += 1;
            for out in &batch {
                sink.write(&router.route(out), out)?;
                summary.records_out += 1;
            }
        }
        sink.flush()
    }
    .await;

    bridge.stop().await;
    summary.restarts = bridge.restarts();
    result.with_context(|| format!("transform instance {instance} failed"))?;
    tracing::debug!(
        instance,
        records_in = summary.records_in,
        records_out = summary.records_out,
        "Transform instance finished"
    );
    Ok(summary)
}
