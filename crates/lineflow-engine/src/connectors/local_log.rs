//! Directory-backed partitioned log.
//!
//! Layout: `<root>/<topic>/partition-<n>.log`, one record per line.
//! Offsets are line indexes within a partition file.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use lineflow_state::StateBackend;
use lineflow_types::state::{PipelineId, StreamName};
use lineflow_types::{wire, Record};

use super::{Checkpoint, RecordSink, RecordSource, SourceItem};
use crate::config::{LogSourceConfig, StartOffset};

/// Directory holding one topic's partition files.
///
/// # Errors
///
/// Returns an error if `topic` is not a single plain path component.
pub fn topic_dir(root: &Path, topic: &str) -> Result<PathBuf> {
    let mut components = Path::new(topic).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(root.join(topic)),
        _ => bail!("invalid topic name '{topic}'"),
    }
}

/// File holding one partition of a topic.
///
/// # Errors
///
/// Same as [`topic_dir`].
pub fn partition_path(root: &Path, topic: &str, partition: u32) -> Result<PathBuf> {
    Ok(topic_dir(root, topic)?.join(format!("partition-{partition}.log")))
}

/// Cursor stream name of a partition.
#[must_use]
pub fn partition_stream(topic: &str, partition: u32) -> StreamName {
    StreamName::new(format!("{topic}/{partition}"))
}

fn count_lines(path: &Path, capacity: usize) -> Result<u64> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e).with_context(|| format!("failed to open {}", path.display())),
    };
    let mut reader = BufReader::with_capacity(capacity, file);
    let mut buf = Vec::new();
    let mut count = 0;
    while reader
        .read_until(b'\n', &mut buf)
        .with_context(|| format!("failed to read {}", path.display()))?
        > 0
    {
        count += 1;
        buf.clear();
    }
    Ok(count)
}

struct PartitionReader {
    stream: StreamName,
    path: PathBuf,
    /// First line index to emit.
    start: u64,
    /// Index of the next line in the file.
    position: u64,
    reader: Option<BufReader<File>>,
    opened: bool,
}

/// Reads the partitions assigned to one source instance, one after another.
pub struct LocalLogSource {
    partitions: Vec<PartitionReader>,
    current: usize,
    fetch_bytes: usize,
    buf: Vec<u8>,
}

impl LocalLogSource {
    /// Open the partitions `p` with `p % parallelism == instance`.
    ///
    /// Start positions come from the configured offset, else the stored
    /// cursor, else the current end of the partition.
    ///
    /// # Errors
    ///
    /// Returns an error if a partition file or the state backend cannot be read.
    pub fn open(
        root: &Path,
        config: &LogSourceConfig,
        instance: u32,
        state: &dyn StateBackend,
        pipeline: &PipelineId,
    ) -> Result<Self> {
        let mut partitions = Vec::new();
        for partition in (0..config.partitions).filter(|p| p % config.parallelism == instance) {
            let path = partition_path(root, &config.topic, partition)?;
            let stream = partition_stream(&config.topic, partition);
            let start = match config.offset {
                Some(StartOffset::Earliest) => 0,
                Some(StartOffset::Explicit(n)) => n,
                Some(StartOffset::Latest) => count_lines(&path, config.fetch_bytes)?,
                None => {
                    let stored = state
                        .get_cursor(pipeline, &stream)
                        .context("failed to read stored cursor")?
                        .and_then(|c| c.value.parse::<u64>().ok());
                    match stored {
                        Some(n) => n,
                        None => count_lines(&path, config.fetch_bytes)?,
                    }
                }
            };
            tracing::debug!(instance, stream = %stream, start, "Assigned log partition");
            partitions.push(PartitionReader {
                stream,
                path,
                start,
                position: 0,
                reader: None,
                opened: false,
            });
        }
        Ok(Self {
            partitions,
            current: 0,
            fetch_bytes: config.fetch_bytes,
            buf: Vec::new(),
        })
    }
}

impl RecordSource for LocalLogSource {
    fn next_item(&mut self) -> Result<Option<SourceItem>> {
        while let Some(part) = self.partitions.get_mut(self.current) {
            if !part.opened {
                part.opened = true;
                part.reader = match File::open(&part.path) {
                    Ok(f) => Some(BufReader::with_capacity(self.fetch_bytes, f)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                    Err(e) => {
                        return Err(e)
                            .with_context(|| format!("failed to open {}", part.path.display()))
                    }
                };
            }
            let Some(reader) = part.reader.as_mut() else {
                self.current += 1;
                continue;
            };

            self.buf.clear();
            let n = reader
                .read_until(b'\n', &mut self.buf)
                .with_context(|| format!("failed to read {}", part.path.display()))?;
            if n == 0 {
                part.reader = None;
                self.current += 1;
                continue;
            }
            part.position += 1;
            if part.position <= part.start {
                continue;
            }
            let line = String::from_utf8_lossy(&self.buf);
            let line = line.strip_suffix('\n').unwrap_or(&line);
            let line = line.strip_suffix('\r').unwrap_or(line);
            return Ok(Some(SourceItem::plain(line)));
        }
        Ok(None)
    }

    fn checkpoints(&self) -> Vec<Checkpoint> {
        self.partitions
            .iter()
            .filter(|p| p.opened)
            .map(|p| Checkpoint {
                stream: p.stream.clone(),
                value: p.position.max(p.start).to_string(),
                exhausted: p.reader.is_none(),
            })
            .collect()
    }
}

/// Appends records to one partition of any topic.
pub struct LocalLogSink {
    root: PathBuf,
    partition: u32,
    writers: HashMap<String, BufWriter<File>>,
}

impl LocalLogSink {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, partition: u32) -> Self {
        Self {
            root: root.into(),
            partition,
            writers: HashMap::new(),
        }
    }

    fn writer(&mut self, topic: &str) -> Result<&mut BufWriter<File>> {
        if !self.writers.contains_key(topic) {
            let path = partition_path(&self.root, topic, self.partition)?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            self.writers.insert(topic.to_string(), BufWriter::new(file));
        }
        self.writers
            .get_mut(topic)
            .with_context(|| format!("no writer for topic '{topic}'"))
    }
}

impl RecordSink for LocalLogSink {
    fn write(&mut self, topic: &str, record: &Record) -> Result<()> {
        let line = wire::encode(record);
        self.writer(topic)?
            .write_all(line.as_bytes())
            .with_context(|| format!("failed to append to topic '{topic}'"))
    }

    fn flush(&mut self) -> Result<()> {
        for (topic, writer) in &mut self.writers {
            writer
                .flush()
                .with_context(|| format!("failed to flush topic '{topic}'"))?;
        }
        Ok(())
    }
}

impl Drop for LocalLogSink {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::error!(partition = self.partition, error = %e, "Failed to flush log sink");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lineflow_state::SqliteStateBackend;

    fn write_partition(root: &Path, topic: &str, partition: u32, lines: &[&str]) {
        let path = partition_path(root, topic, partition).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut body = lines.join("\n");
        body.push('\n');
        fs::write(path, body).unwrap();
    }

    fn config(partitions: u32, parallelism: u32, offset: Option<StartOffset>) -> LogSourceConfig {
        LogSourceConfig {
            topic: "in".into(),
            offset,
            partitions,
            fetch_bytes: 64,
            hosts: vec!["localhost".into()],
            parallelism,
        }
    }

    fn drain(source: &mut LocalLogSource) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(item) = source.next_item().unwrap() {
            out.push(item.content);
        }
        out
    }

    #[test]
    fn topic_names_must_be_plain() {
        let root = Path::new("/data");
        assert!(topic_dir(root, "clicks").is_ok());
        assert!(topic_dir(root, "../etc").is_err());
        assert!(topic_dir(root, "a/b").is_err());
        assert!(topic_dir(root, "").is_err());
    }

    #[test]
    fn earliest_reads_everything() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path(), "in", 0, &["a", "b", "c"]);
        let state = SqliteStateBackend::in_memory().unwrap();
        let mut source = LocalLogSource::open(
            dir.path(),
            &config(1, 1, Some(StartOffset::Earliest)),
            0,
            &state,
            &PipelineId::new("p"),
        )
        .unwrap();
        assert_eq!(drain(&mut source), vec!["a", "b", "c"]);
        assert_eq!(source.checkpoints()[0].value, "3");
    }

    #[test]
    fn explicit_offset_skips_lines() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path(), "in", 0, &["a", "b", "c"]);
        let state = SqliteStateBackend::in_memory().unwrap();
        let mut source = LocalLogSource::open(
            dir.path(),
            &config(1, 1, Some(StartOffset::Explicit(2))),
            0,
            &state,
            &PipelineId::new("p"),
        )
        .unwrap();
        assert_eq!(drain(&mut source), vec!["c"]);
    }

    #[test]
    fn unset_offset_resumes_from_cursor_else_end() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path(), "in", 0, &["a", "b", "c"]);
        let state = SqliteStateBackend::in_memory().unwrap();
        let pipeline = PipelineId::new("p");

        let mut fresh =
            LocalLogSource::open(dir.path(), &config(1, 1, None), 0, &state, &pipeline).unwrap();
        assert!(drain(&mut fresh).is_empty());

        state
            .set_cursor(&pipeline, &partition_stream("in", 0), "1")
            .unwrap();
        let mut resumed =
            LocalLogSource::open(dir.path(), &config(1, 1, None), 0, &state, &pipeline).unwrap();
        assert_eq!(drain(&mut resumed), vec!["b", "c"]);
    }

    #[test]
    fn instances_split_partitions() {
        let dir = tempfile::tempdir().unwrap();
        for p in 0..4 {
            let line = format!("p{p}");
            write_partition(dir.path(), "in", p, &[line.as_str()]);
        }
        let state = SqliteStateBackend::in_memory().unwrap();
        let pipeline = PipelineId::new("p");
        let cfg = config(4, 2, Some(StartOffset::Earliest));

        let mut even = LocalLogSource::open(dir.path(), &cfg, 0, &state, &pipeline).unwrap();
        let mut odd = LocalLogSource::open(dir.path(), &cfg, 1, &state, &pipeline).unwrap();
        assert_eq!(drain(&mut even), vec!["p0", "p2"]);
        assert_eq!(drain(&mut odd), vec!["p1", "p3"]);
    }

    #[test]
    fn missing_partition_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = SqliteStateBackend::in_memory().unwrap();
        let mut source = LocalLogSource::open(
            dir.path(),
            &config(2, 1, Some(StartOffset::Earliest)),
            0,
            &state,
            &PipelineId::new("p"),
        )
        .unwrap();
        assert!(source.next_item().unwrap().is_none());
    }

    #[test]
    fn sink_appends_per_topic_and_partition() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut sink = LocalLogSink::new(dir.path(), 1);
            sink.write("out", &Record::new("x").unwrap()).unwrap();
            sink.write("alt", &Record::new("y").unwrap()).unwrap();
            sink.write("out", &Record::new("z").unwrap()).unwrap();
            sink.flush().unwrap();
        }
        let out = fs::read_to_string(partition_path(dir.path(), "out", 1).unwrap()).unwrap();
        let alt = fs::read_to_string(partition_path(dir.path(), "alt", 1).unwrap()).unwrap();
        assert_eq!(out, "x\nz\n");
        assert_eq!(alt, "y\n");
    }
}
