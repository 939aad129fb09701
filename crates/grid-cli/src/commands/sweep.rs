//! Sweep commands

use crate::commands::{open_store, report};
use crate::output::OutputFormatter;
use crate::SweepArgs;
use anyhow::{bail, Context, Result};
use grid_core::{BenchConfig, RequestRate, Utilization};
use grid_runtime::{detect_accelerators, ProcessController, VllmBenchClient};
use grid_sweep::{SweepExecutor, SweepStats};
use tracing::warn;

#[derive(Debug, Clone, Copy)]
enum SweepKind {
    Performance,
    Capacity,
}

fn apply_args(config: &mut BenchConfig, args: &SweepArgs) {
    if !args.tp.is_empty() {
        config.sweep.tp = args.tp.clone();
    }
    if args.retry_failed {
        config.sweep.retry_failed = true;
    }
}

/// `grid sweep`
pub async fn performance(
    mut config: BenchConfig,
    args: SweepArgs,
    rates: Vec<f64>,
    formatter: &OutputFormatter,
) -> Result<()> {
    apply_args(&mut config, &args);
    if !rates.is_empty() {
        config.sweep.request_rates = rates
            .into_iter()
            .map(RequestRate::new)
            .collect::<grid_core::Result<_>>()?;
    }

    let stats = run(&config, &args.models, SweepKind::Performance).await?;
    print_stats(stats, formatter)?;
    if !formatter.is_structured() {
        report::summary(&config, formatter).await?;
    }
    Ok(())
}

/// `grid capacity`
pub async fn capacity(
    mut config: BenchConfig,
    args: SweepArgs,
    utils: Vec<f64>,
    mut levels: Vec<u32>,
    formatter: &OutputFormatter,
) -> Result<()> {
    apply_args(&mut config, &args);
    if !utils.is_empty() {
        config.sweep.capacity_utils = utils
            .into_iter()
            .map(Utilization::new)
            .collect::<grid_core::Result<_>>()?;
    }
    if !levels.is_empty() {
        levels.sort_unstable();
        levels.dedup();
        config.sweep.concurrency_levels = levels;
    }

    let stats = run(&config, &args.models, SweepKind::Capacity).await?;
    print_stats(stats, formatter)?;
    if !formatter.is_structured() {
        report::capacity_table(&config, None, None, formatter).await?;
    }
    Ok(())
}

async fn run(config: &BenchConfig, models: &[String], kind: SweepKind) -> Result<SweepStats> {
    config.validate().context("Invalid configuration")?;
    let mut catalog = config.catalog()?;
    if !models.is_empty() {
        catalog = catalog.select(models)?;
    }

    let accelerators = detect_accelerators(&config.devices).await;
    let store = open_store(config).await?;
    let server = ProcessController::new(
        config.server.clone(),
        Some(config.results_dir.join("logs")),
    )?;
    let client = VllmBenchClient::new(&config.server.command, &config.sweep.verify)?;
    let mut executor = SweepExecutor::new(config, catalog, server, client, store);

    let finished = tokio::select! {
        stats = async {
            match kind {
                SweepKind::Performance => executor.run_performance(accelerators).await,
                SweepKind::Capacity => executor.run_capacity(accelerators).await,
            }
        } => Some(stats),
        _ = tokio::signal::ctrl_c() => None,
    };

    match finished {
        Some(stats) => Ok(stats),
        None => {
            let stats = executor.stats();
            warn!("Interrupted, tearing down the server");
            // Dropping the controller kills the server's process group
            drop(executor);
            bail!("Sweep interrupted after {}", stats)
        }
    }
}

fn print_stats(stats: SweepStats, formatter: &OutputFormatter) -> Result<()> {
    if formatter.is_structured() {
        return formatter.print_structured(&stats);
    }
    if stats.is_noop() && stats.probes_skipped == 0 {
        return formatter.print_info("Nothing to run");
    }

    formatter.print_stats(&[
        ("Server starts", stats.server_starts.to_string()),
        ("Probes run", stats.probes_run.to_string()),
        ("Probes skipped", stats.probes_skipped.to_string()),
        ("Probes failed", stats.probes_failed.to_string()),
    ])?;
    if stats.probes_failed > 0 {
        formatter.print_warning(&format!(
            "{} probe(s) failed; use --retry-failed to run them again",
            stats.probes_failed
        ))
    } else {
        formatter.print_success(&format!("Sweep finished: {}", stats))
    }
}
