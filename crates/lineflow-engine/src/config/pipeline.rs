//! Resolved pipeline configuration.

use std::path::PathBuf;

use lineflow_types::ConfigError;

use super::keys::{self, Section};
use super::stage::{SinkConfig, SourceConfig, StageConfig, TransformConfig};
use super::store::ConfigStore;

/// Knobs for the host runtime, not tied to any stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub debug: bool,
    /// Capacity of every edge channel.
    pub max_pending: usize,
    /// Data directory of the local runtime.
    pub local_dir: PathBuf,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            debug: false,
            max_pending: keys::DEFAULT_MAX_PENDING,
            local_dir: PathBuf::from(keys::DEFAULT_LOCAL_DIR),
        }
    }
}

impl StageConfig for RuntimeOptions {
    const SECTION: Section = Section::Runtime;

    fn validate(store: &ConfigStore) -> Result<Self, ConfigError> {
        let debug = match store.get(keys::RUNTIME_DEBUG).map(str::trim) {
            None => false,
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => true,
                "false" | "no" | "0" => false,
                _ => return Err(ConfigError::invalid(keys::RUNTIME_DEBUG, raw, "true or false")),
            },
        };
        let max_pending = match store.parse::<usize>(keys::RUNTIME_MAX_PENDING, "a positive integer")? {
            Some(0) => {
                return Err(ConfigError::invalid(
                    keys::RUNTIME_MAX_PENDING,
                    "0",
                    "a positive integer",
                ))
            }
            Some(n) => n,
            None => keys::DEFAULT_MAX_PENDING,
        };
        Ok(Self {
            debug,
            max_pending,
            local_dir: PathBuf::from(store.get_or(keys::LOCAL_DIR, keys::DEFAULT_LOCAL_DIR).trim()),
        })
    }

    fn describe(&self) -> String {
        format!(
            "runtime: max {} pending per edge, data in {}{}",
            self.max_pending,
            self.local_dir.display(),
            if self.debug { ", debug" } else { "" }
        )
    }
}

/// Immutable snapshot of everything a pipeline needs, validated before any
/// stage instance starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub name: String,
    pub coordinator_hosts: Vec<String>,
    pub source: SourceConfig,
    pub transform: TransformConfig,
    pub sink: SinkConfig,
    pub runtime: RuntimeOptions,
}

impl PipelineConfig {
    /// Resolve the pipeline from `store`.
    ///
    /// Layers are checked in order (pipeline name, source, transform, sink,
    /// runtime) and the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] encountered.
    pub fn from_store(store: &ConfigStore) -> Result<Self, ConfigError> {
        let name = store
            .get(keys::PIPELINE)
            .map(|n| n.trim().to_string())
            .ok_or_else(|| ConfigError::missing(keys::PIPELINE, "a pipeline name"))?;
        let source = SourceConfig::validate(store)?;
        let transform = TransformConfig::validate(store)?;
        let sink = SinkConfig::validate(store)?;
        let runtime = RuntimeOptions::validate(store)?;

        let coordinator_hosts = store
            .get_or(keys::COORDINATOR_HOSTS, keys::DEFAULT_HOSTS)
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            name,
            coordinator_hosts,
            source,
            transform,
            sink,
            runtime,
        })
    }

    #[must_use]
    pub fn source_parallelism(&self) -> u32 {
        self.source.parallelism()
    }

    /// Transform parallelism, defaulting to the source parallelism.
    #[must_use]
    pub fn transform_parallelism(&self) -> u32 {
        self.transform
            .parallelism
            .unwrap_or_else(|| self.source_parallelism())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn complete() -> Vec<(&'static str, &'static str)> {
        vec![
            (keys::PIPELINE, "clicks"),
            (keys::INPUT_LOG_TOPIC, "raw"),
            (keys::TRANSFORM_COMMAND, "cat"),
            (keys::OUTPUT_LOG_TOPIC, "cooked"),
        ]
    }

    fn without(key: &str) -> ConfigStore {
        ConfigStore::from_pairs(complete().into_iter().filter(|(k, _)| *k != key))
    }

    #[test]
    fn complete_config_resolves() {
        let config = PipelineConfig::from_store(&ConfigStore::from_pairs(complete())).unwrap();
        assert_eq!(config.name, "clicks");
        assert_eq!(config.coordinator_hosts, vec!["localhost"]);
        assert_eq!(config.transform.argv, vec!["cat"]);
        assert_eq!(config.sink.topic, "cooked");
        assert_eq!(config.runtime, RuntimeOptions::default());
    }

    #[rstest]
    #[case(keys::PIPELINE)]
    #[case(keys::INPUT_LOG_TOPIC)]
    #[case(keys::TRANSFORM_COMMAND)]
    #[case(keys::OUTPUT_LOG_TOPIC)]
    fn single_missing_key_is_named(#[case] key: &str) {
        let err = PipelineConfig::from_store(&without(key)).unwrap_err();
        assert_eq!(err.key, key);
    }

    #[test]
    fn first_failing_layer_wins() {
        let store = ConfigStore::from_pairs([(keys::PIPELINE, "p"), (keys::OUTPUT_LOG_TOPIC, "o")]);
        let err = PipelineConfig::from_store(&store).unwrap_err();
        assert_eq!(err.key, keys::INPUT_LOG_TOPIC);

        let err = PipelineConfig::from_store(&ConfigStore::default()).unwrap_err();
        assert_eq!(err.key, keys::PIPELINE);
    }

    #[test]
    fn malformed_value_reported_at_owning_layer() {
        let mut pairs = complete();
        pairs.retain(|(k, _)| *k != keys::OUTPUT_LOG_TOPIC);
        pairs.push((keys::TRANSFORM_PARALLELISM, "lots"));
        let err = PipelineConfig::from_store(&ConfigStore::from_pairs(pairs)).unwrap_err();
        assert_eq!(err.key, keys::TRANSFORM_PARALLELISM);
    }

    #[rstest]
    #[case(None, None, 1, 1)]
    #[case(Some("3"), None, 3, 3)]
    #[case(Some("2"), Some("5"), 2, 5)]
    #[case(None, Some("4"), 1, 4)]
    fn transform_parallelism_follows_source(
        #[case] source: Option<&'static str>,
        #[case] transform: Option<&'static str>,
        #[case] expected_source: u32,
        #[case] expected_transform: u32,
    ) {
        let mut pairs = complete();
        if let Some(p) = source {
            pairs.push((keys::INPUT_PARALLELISM, p));
        }
        if let Some(p) = transform {
            pairs.push((keys::TRANSFORM_PARALLELISM, p));
        }
        let config = PipelineConfig::from_store(&ConfigStore::from_pairs(pairs)).unwrap();
        assert_eq!(config.source_parallelism(), expected_source);
        assert_eq!(config.transform_parallelism(), expected_transform);
    }

    #[rstest]
    #[case(keys::RUNTIME_DEBUG, "maybe")]
    #[case(keys::RUNTIME_MAX_PENDING, "0")]
    fn malformed_runtime_options(#[case] key: &'static str, #[case] value: &'static str) {
        let mut pairs = complete();
        pairs.push((key, value));
        let err = PipelineConfig::from_store(&ConfigStore::from_pairs(pairs)).unwrap_err();
        assert_eq!(err.key, key);
    }

    #[test]
    fn runtime_options_parse() {
        let mut pairs = complete();
        pairs.push((keys::RUNTIME_DEBUG, "TRUE"));
        pairs.push((keys::RUNTIME_MAX_PENDING, "16"));
        pairs.push((keys::LOCAL_DIR, "/tmp/lf"));
        let config = PipelineConfig::from_store(&ConfigStore::from_pairs(pairs)).unwrap();
        assert!(config.runtime.debug);
        assert_eq!(config.runtime.max_pending, 16);
        assert_eq!(config.runtime.local_dir, PathBuf::from("/tmp/lf"));
    }
}
