//! `grid serve`: run a server at its best verified context

use crate::commands::open_store;
use crate::output::{format_duration, OutputFormatter};
use anyhow::{anyhow, bail, Context, Result};
use grid_core::{BenchConfig, ModelProfile, Utilization};
use grid_report::recommended_context;
use grid_runtime::{
    detect_accelerators, LaunchSpec, ProcessController, RuntimeError, ServerControl,
};
use grid_sweep::eligible_degrees;
use tracing::{info, warn};

/// Pick the tensor-parallel degree: the requested one if the model and host allow it,
/// otherwise the largest eligible degree.
fn choose_tp(profile: &ModelProfile, requested: Option<u32>, accelerators: u32) -> Result<u32> {
    match requested {
        Some(tp) => {
            if !profile.supports_tp(tp) {
                bail!(
                    "{} does not run at tp={} (valid: {:?})",
                    profile.id,
                    tp,
                    profile.valid_tp
                );
            }
            if tp > accelerators {
                bail!(
                    "tp={} needs more than the {} accelerator(s) detected",
                    tp,
                    accelerators
                );
            }
            Ok(tp)
        }
        None => eligible_degrees(&profile.valid_tp, accelerators)
            .last()
            .copied()
            .with_context(|| {
                format!(
                    "{} needs at least {} accelerator(s), {} detected",
                    profile.id,
                    profile.valid_tp.iter().min().copied().unwrap_or(1),
                    accelerators
                )
            }),
    }
}

/// A server that cannot be spawned usually means a wrong command in the configuration
fn launch_error(e: RuntimeError, command: &str) -> anyhow::Error {
    if e.is_startup_failure() {
        anyhow!("{} (check server.command, currently '{}')", e, command)
    } else {
        e.into()
    }
}

pub async fn serve(
    config: &BenchConfig,
    model: &str,
    tp: Option<u32>,
    ctx: Option<u32>,
    util: Option<f64>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let catalog = config.catalog()?;
    let profile = match catalog.get(model) {
        Some(profile) => profile.clone(),
        None => {
            warn!("{} is not in the catalog, using a conservative profile", model);
            ModelProfile::fallback(model)
        }
    };

    let accelerators = detect_accelerators(&config.devices).await;
    let tp = choose_tp(&profile, tp, accelerators)?;
    let util = match util {
        Some(value) => Utilization::new(value)?,
        None => profile.effective_util(config.sweep.gpu_util),
    };
    let ctx = match ctx {
        Some(ctx) => ctx,
        None => {
            let results = open_store(config).await?.load_all().await?;
            let ctx = recommended_context(&results, &profile.id, tp, profile.max_model_len);
            info!("Using context length {} for {} at tp={}", ctx, profile.id, tp);
            ctx
        }
    };

    let spec = LaunchSpec::from_profile(&profile, tp, util, profile.max_num_seqs, &config.server.dtype)
        .with_max_model_len(ctx);
    let mut server = ProcessController::new(config.server.clone(), None)?;
    server
        .start(&spec)
        .await
        .map_err(|e| launch_error(e, &config.server.command))?;

    let readiness = server.await_ready().await;
    if !readiness.is_ready() {
        server.stop().await;
        bail!("Server {} before becoming ready", readiness);
    }

    formatter.print_success(&format!(
        "Serving {} at {} (tp={}, ctx={}, util={})",
        profile.id,
        server.base_url(),
        tp,
        ctx,
        util
    ))?;
    formatter.print_info("Press Ctrl-C to stop")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
        }
        code = server.wait_for_exit() => {
            warn!("Server exited on its own (exit code {:?})", code);
        }
    }

    let uptime = server
        .uptime()
        .map_or_else(|| "-".to_string(), |d| format_duration(d.as_secs()));
    server.stop().await;
    formatter.print_info(&format!("Server stopped after {}", uptime))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(valid_tp: Vec<u32>) -> ModelProfile {
        let mut profile = ModelProfile::fallback("org/a");
        profile.valid_tp = valid_tp;
        profile
    }

    #[test]
    fn test_choose_tp_defaults_to_largest_eligible() {
        assert_eq!(choose_tp(&profile(vec![1, 2]), None, 2).unwrap(), 2);
        assert_eq!(choose_tp(&profile(vec![1, 2]), None, 1).unwrap(), 1);
        assert!(choose_tp(&profile(vec![2]), None, 1).is_err());
    }

    #[test]
    fn test_choose_tp_validates_request() {
        assert_eq!(choose_tp(&profile(vec![1, 2]), Some(1), 2).unwrap(), 1);
        assert!(choose_tp(&profile(vec![1]), Some(2), 2).is_err());
        assert!(choose_tp(&profile(vec![1, 2]), Some(2), 1).is_err());
    }

    #[test]
    fn test_spawn_failure_names_the_command() {
        let err = launch_error(
            RuntimeError::Startup("Failed to spawn 'vllm': No such file".to_string()),
            "vllm",
        );
        assert!(err.to_string().contains("check server.command, currently 'vllm'"));

        let err = launch_error(RuntimeError::Benchmark("exit code 1".to_string()), "vllm");
        assert!(!err.to_string().contains("server.command"));
    }
}
