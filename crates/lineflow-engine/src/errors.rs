//! Launch error model and process exit codes.

use lineflow_types::{ConfigError, SubmitError};

pub const EXIT_OK: u8 = 0;
pub const EXIT_INVALID_CONFIG: u8 = 1;
pub const EXIT_ALREADY_RUNNING: u8 = 2;
pub const EXIT_REJECTED: u8 = 3;
pub const EXIT_RUN_FAILED: u8 = 4;

/// Everything that stops a pipeline launch.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// Missing or malformed configuration; detected before any stage starts.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The host runtime refused the pipeline.
    #[error(transparent)]
    Submit(#[from] SubmitError),

    /// The run failed after it was accepted.
    #[error("pipeline run failed: {0:#}")]
    Run(anyhow::Error),
}

impl LaunchError {
    /// Process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => EXIT_INVALID_CONFIG,
            Self::Submit(SubmitError::AlreadyRunning(_)) => EXIT_ALREADY_RUNNING,
            Self::Submit(SubmitError::Rejected { .. }) => EXIT_REJECTED,
            Self::Run(_) => EXIT_RUN_FAILED,
        }
    }
}

impl From<anyhow::Error> for LaunchError {
    fn from(e: anyhow::Error) -> Self {
        Self::Run(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        let config: LaunchError = ConfigError::missing("lineflow.pipeline", "a pipeline name").into();
        assert_eq!(config.exit_code(), 1);

        let running: LaunchError = SubmitError::AlreadyRunning("p".into()).into();
        assert_eq!(running.exit_code(), 2);

        let rejected: LaunchError = SubmitError::Rejected {
            name: "p".into(),
            reason: "no connector".into(),
        }
        .into();
        assert_eq!(rejected.exit_code(), 3);

        let failed: LaunchError = anyhow::anyhow!("disk full").into();
        assert_eq!(failed.exit_code(), 4);
        assert!(failed.to_string().contains("disk full"));
    }

    #[test]
    fn config_error_displays_transparently() {
        let err: LaunchError = ConfigError::missing("k", "a thing").into();
        assert_eq!(err.to_string(), "Must set a thing using the k property (key: k)");
    }
}
