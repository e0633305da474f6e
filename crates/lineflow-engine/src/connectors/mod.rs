//! Source and sink connectors.
//!
//! Connectors are synchronous: the runtime drives sources on blocking
//! threads and sinks from the transform task that owns them.

pub mod file_blob;
pub mod local_log;
pub mod topic;

use std::collections::BTreeMap;

use lineflow_types::state::StreamName;
use lineflow_types::Record;

pub use file_blob::FileBlobSource;
pub use local_log::{LocalLogSink, LocalLogSource};
pub use topic::TopicRouter;

/// Where a blob line came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobOrigin {
    pub origin: String,
    /// 1-based line number within the origin.
    pub line: u64,
}

/// One unit read by a source, before any metadata folding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceItem {
    pub content: String,
    pub metadata: Option<BlobOrigin>,
}

impl SourceItem {
    #[must_use]
    pub fn plain(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: None,
        }
    }
}

/// A resumable position to persist once a source is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub stream: StreamName,
    pub value: String,
    /// Whether the reporting instance read everything it was assigned on
    /// this stream. Streams shared by several instances are only safe to
    /// advance to the lowest position of an instance that stopped early.
    pub exhausted: bool,
}

pub trait RecordSource: Send {
    /// Next item, or `None` once the source has nothing more to read.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be read.
    fn next_item(&mut self) -> anyhow::Result<Option<SourceItem>>;

    /// Positions reached so far.
    fn checkpoints(&self) -> Vec<Checkpoint>;
}

pub trait RecordSink: Send {
    /// Append `record` to `topic`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    fn write(&mut self, topic: &str, record: &Record) -> anyhow::Result<()>;

    /// Make everything written so far durable.
    ///
    /// # Errors
    ///
    /// Returns an error if buffered data cannot be flushed.
    fn flush(&mut self) -> anyhow::Result<()>;
}

/// Merge checkpoints from several instances into one per stream.
///
/// When any instance stopped early on a stream, the lowest position among
/// those instances wins, since everything before it is known to be read.
/// Otherwise the greatest position wins.
#[must_use]
pub fn merge_checkpoints<I>(checkpoints: I) -> Vec<Checkpoint>
where
    I: IntoIterator<Item = Checkpoint>,
{
    let mut merged: BTreeMap<StreamName, Checkpoint> = BTreeMap::new();
    for cp in checkpoints {
        let combined = match merged.remove(&cp.stream) {
            Some(existing) => combine(existing, cp),
            None => cp,
        };
        merged.insert(combined.stream.clone(), combined);
    }
    merged.into_values().collect()
}

fn combine(a: Checkpoint, b: Checkpoint) -> Checkpoint {
    match (a.exhausted, b.exhausted) {
        (true, false) => b,
        (false, true) => a,
        (true, true) if is_after(&b.value, &a.value) => b,
        (true, true) => a,
        (false, false) if is_after(&b.value, &a.value) => a,
        (false, false) => b,
    }
}

/// Numeric comparison when both values are offsets, name order otherwise.
fn is_after(candidate: &str, existing: &str) -> bool {
    match (candidate.parse::<u64>(), existing.parse::<u64>()) {
        (Ok(a), Ok(b)) => a > b,
        _ => candidate > existing,
    }
}
