//! Shared types for the lineflow pipeline crates.
//!
//! Holds the [`Record`](record::Record) unit of data, the subprocess line
//! protocol in [`wire`], the persisted [`state`] model, and the error
//! taxonomy shared by the engine, the state backend, and the CLI.

#![warn(clippy::pedantic)]

pub mod error;
pub mod record;
pub mod state;
pub mod wire;

pub use error::{BridgeError, ConfigError, SubmitError};
pub use record::{Batch, Record, RecordError};
