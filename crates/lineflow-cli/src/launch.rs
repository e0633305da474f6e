//! Launch flow: configuration, assembly, submission and waiting.

use std::sync::Arc;

use anyhow::Context;
use lineflow_engine::config::keys;
use lineflow_engine::{
    assemble, ConfigStore, HostRuntime, LaunchError, LocalRuntime, PipelineConfig, RunSummary,
};

/// What a successful launch produced.
#[derive(Debug)]
pub enum Outcome {
    /// `--describe`: the plan as JSON, nothing submitted.
    Described(String),
    Completed(RunSummary),
}

/// Whether the defines ask for debug logging. Last define wins.
pub fn debug_requested(defines: &[String]) -> bool {
    defines
        .iter()
        .rev()
        .filter_map(|d| d.split_once('='))
        .find(|(k, _)| k.trim() == keys::RUNTIME_DEBUG)
        .is_some_and(|(_, v)| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1"))
}

/// Resolve, assemble and run a pipeline from `-D` defines.
///
/// Ctrl-C asks the running pipeline to shut down and waits for it to drain.
///
/// # Errors
///
/// Returns a [`LaunchError`] whose [`LaunchError::exit_code`] is the process
/// exit status.
pub async fn run(defines: &[String], describe: bool) -> Result<Outcome, LaunchError> {
    let store = ConfigStore::from_defines(defines);
    let config = PipelineConfig::from_store(&store)?;
    let plan = assemble(Arc::new(config));

    if describe {
        let json = plan.to_json().context("failed to render pipeline plan")?;
        return Ok(Outcome::Described(json));
    }

    let runtime = LocalRuntime::new();
    let mut handle = runtime.submit(plan)?;

    let finished = tokio::select! {
        result = handle.wait() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let summary = match finished {
        Some(result) => result?,
        None => {
            handle.shutdown();
            handle.wait().await?
        }
    };
    Ok(Outcome::Completed(summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn debug_flag_last_define_wins() {
        assert!(!debug_requested(&defines(&[])));
        assert!(debug_requested(&defines(&["lineflow.runtime.debug=true"])));
        assert!(!debug_requested(&defines(&[
            "lineflow.runtime.debug=true",
            "lineflow.runtime.debug=false",
        ])));
    }

    #[tokio::test]
    async fn incomplete_config_exits_one() {
        let err = run(&defines(&["lineflow.pipeline=p"]), false)
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains(keys::INPUT_LOG_TOPIC));
    }

    #[tokio::test]
    async fn describe_prints_plan_without_submitting() {
        let outcome = run(
            &defines(&[
                "lineflow.pipeline=p",
                "lineflow.input.log.topic=in",
                "lineflow.input.parallelism=1",
                "lineflow.transform.parallelism=3",
                "lineflow.transform.command=cat",
                "lineflow.output.log.topic=out",
            ]),
            true,
        )
        .await
        .unwrap();
        let Outcome::Described(json) = outcome else {
            panic!("expected a described plan");
        };
        assert!(json.contains("\"repartition\": true"));
    }

    #[tokio::test]
    async fn remote_object_store_is_rejected_with_three() {
        let dir = tempfile::tempdir().unwrap();
        let local = format!("lineflow.local.dir={}", dir.path().display());
        let err = run(
            &defines(&[
                "lineflow.pipeline=p",
                "lineflow.input.type=blob",
                "lineflow.input.blob.type=s3",
                "lineflow.input.blob.path=logs/",
                "lineflow.input.blob.s3_bucket=b",
                "lineflow.input.blob.aws_key=k",
                "lineflow.input.blob.aws_secret=s",
                "lineflow.transform.command=cat",
                "lineflow.output.log.topic=out",
                &local,
            ]),
            false,
        )
        .await
        .unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
