//! Subprocess bridge: feeds records to a long-running external program over
//! its stdin and collects the batch it prints back on stdout.
//!
//! One record goes in as one `\n`-terminated line; the program answers with
//! zero or more lines followed by the `---` sentinel. Stderr is logged under
//! the `lineflow::subprocess` target and never parsed.

mod process;
pub mod report;

use std::time::Duration;

use lineflow_types::wire::{self, Line};
use lineflow_types::{Batch, BridgeError, Record};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

use process::SubprocessHandle;
pub use process::{ProcessSpec, SUBPROCESS_TARGET};
pub use report::{error_channel, ErrorReceiver, ErrorReporter, ReportedError};

/// Time allowed for the supervisor to reap a killed child on stop.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    NotStarted,
    Running,
    Restarting,
    Stopped,
}

/// Owns at most one child process for one transform instance.
pub struct SubprocessBridge {
    spec: ProcessSpec,
    instance: usize,
    handle: Option<SubprocessHandle>,
    state: BridgeState,
    restarts: u64,
    reporter: ErrorReporter,
}

impl SubprocessBridge {
    #[must_use]
    pub fn new(spec: ProcessSpec, instance: usize, reporter: ErrorReporter) -> Self {
        Self {
            spec,
            instance,
            handle: None,
            state: BridgeState::NotStarted,
            restarts: 0,
            reporter,
        }
    }

    #[must_use]
    pub fn state(&self) -> BridgeState {
        self.state
    }

    #[must_use]
    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    /// OS process id of the live child, if any.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().and_then(|h| h.pid)
    }

    /// Launch the program if no child is live.
    ///
    /// Launch failures are reported on the error channel and leave the bridge
    /// without a child. Returns whether a child is live afterwards.
    pub fn start(&mut self) -> bool {
        if self.handle.is_some() {
            return true;
        }
        match SubprocessHandle::spawn(&self.spec) {
            Ok(handle) => {
                self.handle = Some(handle);
                self.state = BridgeState::Running;
                true
            }
            Err(source) => {
                let command = self.spec.command_line();
                tracing::error!(
                    instance = self.instance,
                    command = %command,
                    error = %source,
                    "Unable to launch subprocess"
                );
                self.reporter
                    .report(self.instance, BridgeError::Launch { command, source });
                false
            }
        }
    }

    /// Write one record to the child, starting it first if needed.
    ///
    /// On a write failure the error is reported, the child is replaced and
    /// `false` is returned; the record is not retried.
    pub async fn deliver(&mut self, record: &Record) -> bool {
        if !self.start() {
            return false;
        }
        let Some(stdin) = self.handle.as_mut().and_then(|h| h.stdin.as_mut()) else {
            return false;
        };

        let line = wire::encode(record);
        let written = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    instance = self.instance,
                    error = %e,
                    "Error writing to stdin of subprocess, restarting"
                );
                self.reporter.report(self.instance, BridgeError::Write(e));
                self.restart().await;
                false
            }
        }
    }

    /// Read lines until the sentinel or end of stream.
    ///
    /// The sentinel is consumed and not returned. Bytes that are not valid
    /// UTF-8 are replaced, so a garbled line never ends a batch early. End of
    /// stream before the sentinel is logged and yields whatever was read; the
    /// child is not restarted.
    pub async fn drain_batch(&mut self) -> Batch {
        let mut batch = Batch::new();
        let Some(stdout) = self.handle.as_mut().and_then(|h| h.stdout.as_mut()) else {
            return batch;
        };

        let mut buf = Vec::new();
        loop {
            buf.clear();
            match stdout.read_until(b'\n', &mut buf).await {
                Ok(0) => {
                    let last = batch.last().map_or("", Record::as_str);
                    tracing::error!(
                        instance = self.instance,
                        "Unexpected EOF from subprocess, last record was: {last}"
                    );
                    return batch;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(instance = self.instance, error = %e, "Error reading from subprocess");
                    return batch;
                }
            }
            let raw = String::from_utf8_lossy(&buf);
            match wire::decode(&raw) {
                Ok(Line::End) => return batch,
                Ok(Line::Record(record)) => batch.push(record),
                Err(e) => {
                    tracing::warn!(instance = self.instance, error = %e, "Skipping malformed line from subprocess");
                }
            }
        }
    }

    /// Deliver a record and collect its batch; `None` when delivery failed.
    pub async fn execute(&mut self, record: &Record) -> Option<Batch> {
        if self.deliver(record).await {
            Some(self.drain_batch().await)
        } else {
            None
        }
    }

    /// Close the pipes and kill the child. Idempotent.
    pub async fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        handle.shutdown(STOP_GRACE).await;
        self.state = BridgeState::Stopped;
        tracing::debug!(instance = self.instance, "Subprocess bridge stopped");
    }

    async fn restart(&mut self) {
        self.state = BridgeState::Restarting;
        if let Some(handle) = self.handle.take() {
            handle.shutdown(STOP_GRACE).await;
        }
        self.restarts += 1;
        if !self.start() {
            self.state = BridgeState::NotStarted;
        }
    }
}

impl std::fmt::Debug for SubprocessBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubprocessBridge")
            .field("command", &self.spec.command_line())
            .field("instance", &self.instance)
            .field("state", &self.state)
            .field("pid", &self.pid())
            .field("restarts", &self.restarts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(argv: &[&str]) -> ProcessSpec {
        ProcessSpec {
            argv: argv.iter().map(|s| (*s).to_string()).collect(),
            directory: None,
            env: std::collections::BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn stop_before_start_is_noop() {
        let mut bridge = SubprocessBridge::new(spec(&["cat"]), 0, ErrorReporter::discard());
        bridge.stop().await;
        bridge.stop().await;
        assert_eq!(bridge.state(), BridgeState::NotStarted);
        assert!(bridge.pid().is_none());
    }

    #[tokio::test]
    async fn drain_without_child_is_empty() {
        let mut bridge = SubprocessBridge::new(spec(&["cat"]), 0, ErrorReporter::discard());
        assert!(bridge.drain_batch().await.is_empty());
    }

    #[tokio::test]
    async fn empty_command_reports_launch_error() {
        let (reporter, mut receiver) = error_channel();
        let mut bridge = SubprocessBridge::new(spec(&[]), 2, reporter);
        assert!(!bridge.start());
        let reported = receiver.drain();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].instance, 2);
        assert!(matches!(reported[0].error, BridgeError::Launch { .. }));
        assert_eq!(bridge.state(), BridgeState::NotStarted);
    }
}
