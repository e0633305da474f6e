//! Pipeline configuration: key/value store, key registry, stage variants
//! and the resolved pipeline snapshot.

pub mod keys;
pub mod pipeline;
pub mod stage;
pub mod store;

pub use pipeline::{PipelineConfig, RuntimeOptions};
pub use stage::{
    BlobSourceConfig, BlobStart, LogSourceConfig, S3SourceConfig, SinkConfig, SourceConfig,
    StageConfig, StartOffset, TransformConfig,
};
pub use store::ConfigStore;
