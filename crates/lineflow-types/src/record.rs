//! Records: the unit of data crossing every stage boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors produced when constructing a [`Record`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// The text contains the `\n` framing delimiter.
    #[error("record contains a newline at byte {0}")]
    EmbeddedNewline(usize),
}

/// One line of UTF-8 text.
///
/// A `Record` never contains `\n`, so it can always be framed as exactly one
/// line on a subprocess pipe. Its content is otherwise opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Record(String);

/// Output produced by the transform subprocess for one input record.
pub type Batch = Vec<Record>;

impl Record {
    /// Create a record from a line of text.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::EmbeddedNewline`] if `text` contains `\n`.
    pub fn new(text: impl Into<String>) -> Result<Self, RecordError> {
        let text = text.into();
        match text.find('\n') {
            Some(pos) => Err(RecordError::EmbeddedNewline(pos)),
            None => Ok(Self(text)),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<String> for Record {
    type Error = RecordError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Record {
    type Error = RecordError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Record> for String {
    fn from(record: Record) -> Self {
        record.0
    }
}

impl AsRef<str> for Record {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
