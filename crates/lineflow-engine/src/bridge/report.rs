//! Pipeline error channel.
//!
//! Bridges report failures through a cloneable [`ErrorReporter`] backed by an
//! unbounded mpsc channel; the runtime drains the [`ErrorReceiver`] into the
//! run summary once every instance has finished. Reporting never blocks and
//! never fails.

use lineflow_types::BridgeError;
use tokio::sync::mpsc;

/// A failure reported by one transform instance.
#[derive(Debug)]
pub struct ReportedError {
    pub instance: usize,
    pub error: BridgeError,
}

#[derive(Clone, Debug)]
pub struct ErrorReporter {
    sender: mpsc::UnboundedSender<ReportedError>,
}

pub struct ErrorReceiver {
    receiver: mpsc::UnboundedReceiver<ReportedError>,
}

/// Create a new reporter/receiver pair.
#[must_use]
pub fn error_channel() -> (ErrorReporter, ErrorReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (ErrorReporter { sender }, ErrorReceiver { receiver })
}

impl ErrorReporter {
    /// Report an error. Dropped silently if nobody is listening.
    pub fn report(&self, instance: usize, error: BridgeError) {
        let _ = self.sender.send(ReportedError { instance, error });
    }

    /// A reporter whose errors go nowhere.
    #[must_use]
    pub fn discard() -> Self {
        error_channel().0
    }
}

impl ErrorReceiver {
    /// Collect everything reported so far without waiting.
    pub fn drain(&mut self) -> Vec<ReportedError> {
        let mut out = Vec::new();
        while let Ok(reported) = self.receiver.try_recv() {
            out.push(reported);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_collects_in_order() {
        let (reporter, mut receiver) = error_channel();
        let clone = reporter.clone();
        reporter.report(0, BridgeError::Write(std::io::ErrorKind::BrokenPipe.into()));
        clone.report(1, BridgeError::Write(std::io::ErrorKind::BrokenPipe.into()));

        let reported = receiver.drain();
        assert_eq!(reported.len(), 2);
        assert_eq!(reported[0].instance, 0);
        assert_eq!(reported[1].instance, 1);
        assert!(receiver.drain().is_empty());
    }

    #[test]
    fn report_after_receiver_dropped_is_silent() {
        let reporter = ErrorReporter::discard();
        reporter.report(3, BridgeError::Write(std::io::ErrorKind::BrokenPipe.into()));
    }
}
