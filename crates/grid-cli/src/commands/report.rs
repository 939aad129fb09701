//! Report commands

use crate::commands::open_store;
use crate::output::{format_optional, Formattable, OutputFormatter};
use anyhow::{Context, Result};
use grid_core::{BenchConfig, ProbeKind, ProbeResult};
use grid_report::{performance_summary, CapacitySurface, SummaryRow};
use grid_store::read_records_file;
use std::path::{Path, PathBuf};

impl Formattable for SummaryRow {
    fn table_headers() -> Vec<String> {
        ["Model", "TP", "Tok/s", "QPS", "TTFT (ms)", "TPOT (ms)"]
            .iter()
            .map(|h| h.to_string())
            .collect()
    }

    fn table_row(&self) -> Vec<String> {
        vec![
            self.model.clone(),
            self.tp.to_string(),
            format_optional(self.tokens_per_second, 1),
            self.rate.map_or_else(|| "-".to_string(), |r| r.to_string()),
            format_optional(self.mean_ttft_ms, 2),
            format_optional(self.mean_tpot_ms, 2),
        ]
    }
}

/// Results from an exported JSON array, or from the results directory
async fn load_results(config: &BenchConfig, json: Option<&Path>) -> Result<Vec<ProbeResult>> {
    match json {
        Some(path) => read_records_file(path)
            .await
            .with_context(|| format!("Failed to read results from {}", path.display())),
        None => Ok(open_store(config).await?.load_all().await?),
    }
}

async fn emit(markdown: String, out: Option<PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    match out {
        Some(path) => {
            tokio::fs::write(&path, markdown)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            formatter.print_success(&format!("Report written to {}", path.display()))
        }
        None => {
            print!("{}", markdown);
            Ok(())
        }
    }
}

/// `grid report`
pub async fn context_report(
    config: &BenchConfig,
    json: Option<PathBuf>,
    out: Option<PathBuf>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let results = load_results(config, json.as_deref()).await?;
    if !results
        .iter()
        .any(|r| matches!(r.key().kind, ProbeKind::Capacity { .. }))
    {
        formatter.print_warning("No capacity results found")?;
    }
    emit(grid_report::context_report(&results), out, formatter).await
}

/// `grid table`
pub async fn capacity_table(
    config: &BenchConfig,
    json: Option<PathBuf>,
    out: Option<PathBuf>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let results = load_results(config, json.as_deref()).await?;
    let catalog = config.catalog()?;
    let surface = CapacitySurface::build(&results, &catalog, &config.sweep.concurrency_levels);

    if formatter.is_structured() && out.is_none() {
        return formatter.print_structured(&surface);
    }
    if surface.is_empty() {
        formatter.print_warning("No successful capacity results found")?;
    }
    emit(grid_report::capacity_table(&surface), out, formatter).await
}

/// `grid summary`
pub async fn summary(config: &BenchConfig, formatter: &OutputFormatter) -> Result<()> {
    let results = open_store(config).await?.load_all().await?;
    let catalog = config.catalog()?;
    let rows = performance_summary(
        &results,
        &catalog,
        &config.sweep.tp,
        &config.sweep.request_rates,
    );
    formatter.print_list(&rows)
}
