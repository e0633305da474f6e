//! Run result types.

use lineflow_types::state::RunStats;
use serde::Serialize;

/// Counters of one transform instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstanceSummary {
    pub instance: usize,
    pub records_in: u64,
    pub batches: u64,
    pub records_out: u64,
    /// Records lost to a failed delivery.
    pub records_dropped: u64,
    pub restarts: u64,
    pub errors_reported: u64,
}

/// Result of a pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub pipeline: String,
    pub run_id: i64,
    pub records_read: u64,
    pub instances: Vec<InstanceSummary>,
    pub duration_secs: f64,
    /// Timestamps as recorded in run history (ISO-8601, UTC).
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl RunSummary {
    #[must_use]
    pub fn records_in(&self) -> u64 {
        self.instances.iter().map(|i| i.records_in).sum()
    }

    #[must_use]
    pub fn records_out(&self) -> u64 {
        self.instances.iter().map(|i| i.records_out).sum()
    }

    #[must_use]
    pub fn records_dropped(&self) -> u64 {
        self.instances.iter().map(|i| i.records_dropped).sum()
    }

    #[must_use]
    pub fn restarts(&self) -> u64 {
        self.instances.iter().map(|i| i.restarts).sum()
    }

    #[must_use]
    pub fn errors_reported(&self) -> u64 {
        self.instances.iter().map(|i| i.errors_reported).sum()
    }

    /// Counters as persisted in run history.
    #[must_use]
    pub fn stats(&self) -> RunStats {
        RunStats {
            records_in: self.records_in(),
            records_out: self.records_out(),
            records_dropped: self.records_dropped(),
            restarts: self.restarts(),
            error_message: None,
        }
    }
}
