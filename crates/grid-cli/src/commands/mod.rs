//! Command implementations for the grid CLI

pub mod config;
pub mod report;
pub mod results;
pub mod serve;
pub mod sweep;

use anyhow::{Context, Result};
use grid_core::BenchConfig;
use grid_store::ResultStore;

/// Open the configured results directory
pub(crate) async fn open_store(config: &BenchConfig) -> Result<ResultStore> {
    ResultStore::open(&config.results_dir).await.with_context(|| {
        format!(
            "Failed to open results directory {}",
            config.results_dir.display()
        )
    })
}
