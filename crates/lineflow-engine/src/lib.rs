//! Configuration, assembly, subprocess bridge and local runtime for lineflow pipelines.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod assembler;
pub mod bridge;
pub mod config;
pub mod connectors;
pub mod errors;
pub mod result;
pub mod runtime;

// Re-export public API for convenience
pub use assembler::{assemble, PipelinePlan};
pub use bridge::SubprocessBridge;
pub use config::{ConfigStore, PipelineConfig};
pub use errors::LaunchError;
pub use result::RunSummary;
pub use runtime::{HostRuntime, LocalRuntime, RunHandle};
