//! # grid-store
//!
//! Durable record of probe outcomes for benchgrid.
//!
//! This crate provides:
//! - [`ResultStore`]: one JSON file per probe, replaced atomically on write
//! - [`ProbeRecord`]: the flat on-disk schema and its conversion to [`grid_core::ProbeResult`]
//! - [`RunCache`]: the skip-if-done check consulted before every probe
//!
//! File names are derived from [`grid_core::ProbeKey`] and never parsed back; each record
//! carries its own identity fields.

use std::path::PathBuf;
use thiserror::Error;

pub mod cache;
pub mod record;
pub mod store;

pub use cache::RunCache;
pub use record::{ProbeRecord, RecordKind, RecordStatus};
pub use store::{read_records_file, ResultStore};

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while reading or writing results
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed record {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Invalid record: {0}")]
    Invalid(String),

    #[error(transparent)]
    Core(#[from] grid_core::CoreError),
}

impl StoreError {
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True when an artifact exists but cannot be used
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StoreError::Corrupt { .. } | StoreError::Invalid(_))
    }
}
