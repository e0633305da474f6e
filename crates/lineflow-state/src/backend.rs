//! State backend trait definition.
//!
//! [`StateBackend`] defines the storage contract for source cursors and run
//! history. Model types live in [`lineflow_types::state`].

use lineflow_types::state::{CursorState, PipelineId, RunRecord, RunStats, RunStatus, StreamName};

use crate::error;

/// Storage contract for pipeline state.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn StateBackend>`.
pub trait StateBackend: Send + Sync {
    /// Read the cursor for a (pipeline, stream) pair.
    ///
    /// Returns `Ok(None)` when no cursor has been persisted yet.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_cursor(
        &self,
        pipeline: &PipelineId,
        stream: &StreamName,
    ) -> error::Result<Option<CursorState>>;

    /// Upsert the cursor for a (pipeline, stream) pair.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn set_cursor(&self, pipeline: &PipelineId, stream: &StreamName, value: &str)
        -> error::Result<()>;

    /// Record the start of a run, returning its ID.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn start_run(&self, pipeline: &PipelineId) -> error::Result<i64>;

    /// Finalize a run with its status and counters.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()>;

    /// Read a run back by ID.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure
    /// or if the stored row cannot be decoded.
    fn get_run(&self, run_id: i64) -> error::Result<Option<RunRecord>>;
}
