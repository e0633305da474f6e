//! Error taxonomy shared across lineflow crates.

/// A required configuration key is missing or its value is malformed.
///
/// Validation stops at the first failure, so one `ConfigError` describes the
/// whole problem reported to the operator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (key: {key})")]
pub struct ConfigError {
    /// The offending configuration key.
    pub key: String,
    /// Human-readable cause.
    pub message: String,
}

impl ConfigError {
    pub fn missing(key: &str, what: &str) -> Self {
        Self {
            key: key.to_string(),
            message: format!("Must set {what} using the {key} property"),
        }
    }

    pub fn invalid(key: &str, value: &str, expected: &str) -> Self {
        Self {
            key: key.to_string(),
            message: format!("Invalid value '{value}', expected {expected}"),
        }
    }
}

/// Failures of the subprocess bridge that are reported to the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The transform command could not be spawned.
    #[error("failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing a record to the subprocess failed; the record was dropped.
    #[error("error writing to stdin of subprocess: {0}")]
    Write(#[source] std::io::Error),
}

/// Submission failures reported by a host runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// A pipeline with the same name is already running.
    #[error("pipeline {0} is already running")]
    AlreadyRunning(String),

    /// The runtime refused the pipeline definition.
    #[error("pipeline {name} is invalid: {reason}")]
    Rejected { name: String, reason: String },
}
