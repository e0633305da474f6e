//! Pipeline state persistence for lineflow.
//!
//! Provides the [`StateBackend`] trait and a [`SqliteStateBackend`]
//! implementation for source cursors and run history.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod sqlite;

pub use backend::StateBackend;
pub use error::StateError;
pub use sqlite::SqliteStateBackend;
