//! Filesystem blob store source.
//!
//! Every regular file directly under the configured directory is a blob.
//! Blobs are read in name order and each line is emitted with its origin
//! (file name and 1-based line number).

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lineflow_state::StateBackend;
use lineflow_types::state::{PipelineId, StreamName};

use super::{BlobOrigin, Checkpoint, RecordSource, SourceItem};
use crate::config::{BlobSourceConfig, BlobStart};

/// Cursor stream name of a blob directory.
#[must_use]
pub fn blob_stream(path: &Path) -> StreamName {
    StreamName::new(format!("blob:{}", path.display()))
}

/// Names of the blobs under `dir`, sorted.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed.
pub fn list_blobs(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        } else {
            tracing::warn!(path = %entry.path().display(), "Skipping blob with non UTF-8 name");
        }
    }
    names.sort();
    Ok(names)
}

struct OpenBlob {
    name: String,
    reader: BufReader<File>,
    line: u64,
}

pub struct FileBlobSource {
    dir: PathBuf,
    stream: StreamName,
    pending: std::vec::IntoIter<String>,
    open: Option<OpenBlob>,
    /// Name of the last fully read blob, or the baseline marker.
    last_complete: String,
    exhausted: bool,
    buf: Vec<u8>,
}

impl FileBlobSource {
    /// Select the blobs for one instance (file index `% parallelism ==
    /// instance`) that the start policy admits.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or the state backend cannot be read.
    pub fn open(
        config: &BlobSourceConfig,
        instance: u32,
        state: &dyn StateBackend,
        pipeline: &PipelineId,
    ) -> Result<Self> {
        let stream = blob_stream(&config.path);
        let all = list_blobs(&config.path)?;

        let resume_after = match &config.start {
            BlobStart::Resume => state
                .get_cursor(pipeline, &stream)
                .context("failed to read stored marker")?
                .map(|c| c.value),
            _ => None,
        };
        let newest = all.last().cloned().unwrap_or_default();
        // Marker meaning "everything up to here is read" before this run
        // reads anything; the empty name sorts before every blob.
        let baseline = match &config.start {
            BlobStart::Earliest => String::new(),
            BlobStart::Latest => newest,
            BlobStart::Explicit(marker) => all
                .iter()
                .rev()
                .find(|name| name.as_str() < marker.as_str())
                .cloned()
                .unwrap_or_default(),
            BlobStart::Resume => resume_after.unwrap_or(newest),
        };
        let admits = |name: &str| match &config.start {
            BlobStart::Earliest => true,
            BlobStart::Latest => false,
            BlobStart::Explicit(marker) => name >= marker.as_str(),
            BlobStart::Resume => name > baseline.as_str(),
        };

        let parallelism = usize::try_from(config.parallelism).unwrap_or(1).max(1);
        let instance = usize::try_from(instance).unwrap_or(0);
        let selected: Vec<String> = all
            .into_iter()
            .enumerate()
            .filter(|(i, _)| i % parallelism == instance)
            .map(|(_, name)| name)
            .filter(|name| admits(name))
            .collect();
        tracing::debug!(
            instance,
            dir = %config.path.display(),
            start = %config.start,
            blobs = selected.len(),
            baseline = %baseline,
            "Selected blobs"
        );

        Ok(Self {
            dir: config.path.clone(),
            stream,
            pending: selected.into_iter(),
            open: None,
            last_complete: baseline,
            exhausted: false,
            buf: Vec::new(),
        })
    }
}

impl RecordSource for FileBlobSource {
    fn next_item(&mut self) -> Result<Option<SourceItem>> {
        loop {
            if self.open.is_none() {
                let Some(name) = self.pending.next() else {
                    self.exhausted = true;
                    return Ok(None);
                };
                let path = self.dir.join(&name);
                let file =
                    File::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
                self.open = Some(OpenBlob {
                    name,
                    reader: BufReader::new(file),
                    line: 0,
                });
            }
            let Some(blob) = self.open.as_mut() else {
                continue;
            };

            self.buf.clear();
            let n = blob
                .reader
                .read_until(b'\n', &mut self.buf)
                .with_context(|| format!("failed to read blob {}", blob.name))?;
            if n == 0 {
                if let Some(done) = self.open.take() {
                    self.last_complete = done.name;
                }
                continue;
            }
            blob.line += 1;
            let text = String::from_utf8_lossy(&self.buf);
            let text = text.strip_suffix('\n').unwrap_or(&text);
            let text = text.strip_suffix('\r').unwrap_or(text);
            return Ok(Some(SourceItem {
                content: text.to_string(),
                metadata: Some(BlobOrigin {
                    origin: blob.name.clone(),
                    line: blob.line,
                }),
            }));
        }
    }

    fn checkpoints(&self) -> Vec<Checkpoint> {
        vec![Checkpoint {
            stream: self.stream.clone(),
            value: self.last_complete.clone(),
            exhausted: self.exhausted,
        }]
    }
}
