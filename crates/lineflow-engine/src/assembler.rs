//! Pipeline assembly: parallelism, repartitioning and the metadata step.

use std::sync::Arc;

use serde::Serialize;

use crate::config::{PipelineConfig, StageConfig};

/// Separator used when folding blob metadata into a record.
pub const METADATA_SEPARATOR: char = '\t';

/// One step of an assembled pipeline, in data-flow order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanStage {
    Source {
        parallelism: u32,
        description: String,
    },
    /// Round-robin redistribution between source and transform instances.
    Shuffle,
    /// Folds `(origin, content, line)` into one tab-separated record.
    CombineMetadata { format: String },
    Transform {
        parallelism: u32,
        description: String,
    },
    Sink {
        parallelism: u32,
        description: String,
    },
}

/// The assembled pipeline handed to a host runtime.
#[derive(Debug, Clone, Serialize)]
pub struct PipelinePlan {
    pub pipeline: String,
    pub source_parallelism: u32,
    pub transform_parallelism: u32,
    pub repartition: bool,
    pub combine_metadata: bool,
    pub stages: Vec<PlanStage>,
    #[serde(skip)]
    pub config: Arc<PipelineConfig>,
}

impl PipelinePlan {
    /// Pretty JSON rendering of the plan.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// A shuffle is needed only when there are more transform instances than
/// source instances; otherwise natural partitioning is kept.
#[must_use]
pub fn needs_repartition(source_parallelism: u32, transform_parallelism: u32) -> bool {
    transform_parallelism > source_parallelism
}

/// Fold blob metadata and content into the record handed to the transform.
#[must_use]
pub fn combine_metadata(origin: &str, content: &str, line_number: u64) -> String {
    format!("{origin}{METADATA_SEPARATOR}{content}{METADATA_SEPARATOR}{line_number}")
}

/// Build the plan for a validated configuration and log each stage.
#[must_use]
pub fn assemble(config: Arc<PipelineConfig>) -> PipelinePlan {
    let source_parallelism = config.source_parallelism();
    let transform_parallelism = config.transform_parallelism();
    let repartition = needs_repartition(source_parallelism, transform_parallelism);
    let combine = config.source.is_blob();

    let mut stages = Vec::with_capacity(5);
    stages.push(PlanStage::Source {
        parallelism: source_parallelism,
        description: config.source.describe(),
    });
    if repartition {
        stages.push(PlanStage::Shuffle);
    }
    if combine {
        stages.push(PlanStage::CombineMetadata {
            format: "{origin}\\t{content}\\t{line_number}".to_string(),
        });
    }
    stages.push(PlanStage::Transform {
        parallelism: transform_parallelism,
        description: config.transform.describe(),
    });
    stages.push(PlanStage::Sink {
        parallelism: transform_parallelism,
        description: config.sink.describe(),
    });

    tracing::info!(
        pipeline = config.name,
        source_parallelism,
        transform_parallelism,
        repartition,
        combine_metadata = combine,
        "Assembled pipeline"
    );
    for stage in &stages {
        match stage {
            PlanStage::Source { description, .. }
            | PlanStage::Transform { description, .. }
            | PlanStage::Sink { description, .. } => {
                tracing::info!(pipeline = config.name, "{description}");
            }
            PlanStage::Shuffle => {
                tracing::info!(pipeline = config.name, "shuffle: round-robin to transform instances");
            }
            PlanStage::CombineMetadata { .. } => {
                tracing::info!(pipeline = config.name, "combine metadata: origin, content, line number");
            }
        }
    }

    PipelinePlan {
        pipeline: config.name.clone(),
        source_parallelism,
        transform_parallelism,
        repartition,
        combine_metadata: combine,
        stages,
        config,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::keys;
    use crate::config::ConfigStore;

    fn plan(extra: &[(&str, &str)]) -> PipelinePlan {
        let mut pairs = vec![
            (keys::PIPELINE, "p"),
            (keys::TRANSFORM_COMMAND, "cat"),
            (keys::OUTPUT_LOG_TOPIC, "out"),
        ];
        pairs.extend_from_slice(extra);
        if !pairs.iter().any(|(k, _)| *k == keys::INPUT_TYPE) {
            pairs.push((keys::INPUT_LOG_TOPIC, "in"));
        }
        let config = PipelineConfig::from_store(&ConfigStore::from_pairs(pairs)).unwrap();
        assemble(Arc::new(config))
    }

    fn kinds(plan: &PipelinePlan) -> Vec<&'static str> {
        plan.stages
            .iter()
            .map(|s| match s {
                PlanStage::Source { .. } => "source",
                PlanStage::Shuffle => "shuffle",
                PlanStage::CombineMetadata { .. } => "combine",
                PlanStage::Transform { .. } => "transform",
                PlanStage::Sink { .. } => "sink",
            })
            .collect()
    }

    #[test]
    fn repartition_rule() {
        assert!(needs_repartition(2, 5));
        assert!(!needs_repartition(5, 2));
        assert!(!needs_repartition(3, 3));
    }

    #[test]
    fn log_pipeline_is_three_stages() {
        let plan = plan(&[]);
        assert_eq!(kinds(&plan), vec!["source", "transform", "sink"]);
        assert!(!plan.repartition);
        assert!(!plan.combine_metadata);
    }

    #[test]
    fn wider_transform_inserts_shuffle() {
        let plan = plan(&[
            (keys::INPUT_PARALLELISM, "2"),
            (keys::TRANSFORM_PARALLELISM, "5"),
        ]);
        assert_eq!(kinds(&plan), vec!["source", "shuffle", "transform", "sink"]);
        assert_eq!(plan.transform_parallelism, 5);
    }

    #[test]
    fn narrower_transform_keeps_partitioning() {
        let plan = plan(&[
            (keys::INPUT_PARALLELISM, "5"),
            (keys::TRANSFORM_PARALLELISM, "2"),
        ]);
        assert!(!plan.repartition);
        assert_eq!(kinds(&plan), vec!["source", "transform", "sink"]);
    }

    #[test]
    fn blob_pipeline_combines_metadata() {
        let plan = plan(&[(keys::INPUT_TYPE, "blob"), (keys::INPUT_BLOB_PATH, "/in")]);
        assert_eq!(kinds(&plan), vec!["source", "combine", "transform", "sink"]);
        assert!(plan.combine_metadata);
    }

    #[test]
    fn combine_metadata_format() {
        assert_eq!(combine_metadata("a.log", "hello world", 3), "a.log\thello world\t3");
    }

    #[test]
    fn plan_serializes_without_config() {
        let plan = plan(&[(keys::INPUT_PARALLELISM, "1"), (keys::TRANSFORM_PARALLELISM, "2")]);
        let json: serde_json::Value = serde_json::from_str(&plan.to_json().unwrap()).unwrap();
        assert_eq!(json["pipeline"], "p");
        assert_eq!(json["repartition"], true);
        assert_eq!(json["stages"][1]["kind"], "shuffle");
        assert!(json.get("config").is_none());
    }
}
