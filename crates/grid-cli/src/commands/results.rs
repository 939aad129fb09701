//! Result store maintenance

use crate::commands::open_store;
use crate::output::OutputFormatter;
use anyhow::{Context, Result};
use grid_core::BenchConfig;
use std::path::Path;

/// `grid export`
pub async fn export(config: &BenchConfig, out: &Path, formatter: &OutputFormatter) -> Result<()> {
    let store = open_store(config).await?;
    let count = store
        .export(out)
        .await
        .with_context(|| format!("Failed to export results to {}", out.display()))?;
    formatter.print_success(&format!("Exported {} result(s) to {}", count, out.display()))
}

/// `grid clear`
pub async fn clear(config: &BenchConfig, yes: bool, formatter: &OutputFormatter) -> Result<()> {
    let store = open_store(config).await?;
    if !yes {
        let count = store.load_all().await?.len();
        return formatter.print_warning(&format!(
            "This deletes {} result(s) in {}. Re-run with --yes to confirm.",
            count,
            store.dir().display()
        ));
    }

    let removed = store.clear().await?;
    formatter.print_success(&format!(
        "Removed {} result file(s) from {}",
        removed,
        store.dir().display()
    ))
}
