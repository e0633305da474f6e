//! Line protocol spoken with transform subprocesses.
//!
//! Input: one record per line, `\n`-terminated. Output: zero or more record
//! lines followed by exactly one [`SENTINEL`] line closing the batch for the
//! most recently delivered input. The sentinel has no escape; a subprocess
//! that prints `---` as data ends its batch early.

use crate::record::{Record, RecordError};

/// Reserved line marking the end of a batch.
pub const SENTINEL: &str = "---";

/// One decoded line of subprocess output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A record belonging to the current batch.
    Record(Record),
    /// The batch terminator.
    End,
}

/// Frame a record as one protocol line.
#[must_use]
pub fn encode(record: &Record) -> String {
    let mut line = String::with_capacity(record.len() + 1);
    line.push_str(record.as_str());
    line.push('\n');
    line
}

/// Decode one raw output line.
///
/// A trailing `\n` and then a trailing `\r` are stripped before comparing
/// against the sentinel.
///
/// # Errors
///
/// Returns [`RecordError::EmbeddedNewline`] if `raw` holds more than one line.
pub fn decode(raw: &str) -> Result<Line, RecordError> {
    let line = raw.strip_suffix('\n').unwrap_or(raw);
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line == SENTINEL {
        return Ok(Line::End);
    }
    Record::new(line).map(Line::Record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_appends_single_newline() {
        let record = Record::new("abc").unwrap();
        assert_eq!(encode(&record), "abc\n");
    }

    #[test]
    fn decode_sentinel() {
        assert_eq!(decode("---\n").unwrap(), Line::End);
        assert_eq!(decode("---").unwrap(), Line::End);
        assert_eq!(decode("---\r\n").unwrap(), Line::End);
    }

    #[test]
    fn decode_record_strips_terminator() {
        assert_eq!(
            decode("value\r\n").unwrap(),
            Line::Record(Record::new("value").unwrap())
        );
    }

    #[test]
    fn near_sentinels_are_records() {
        for raw in ["--", "----", " ---", "--- "] {
            assert!(
                matches!(decode(raw).unwrap(), Line::Record(_)),
                "{raw:?} should be a record"
            );
        }
    }

    #[test]
    fn decode_rejects_multiple_lines() {
        assert!(decode("a\nb\n").is_err());
    }
}
