//! Accelerator discovery

use grid_core::{DeviceBackend, DeviceConfig};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Number of accelerators available to the sweep.
///
/// A configured count wins. Otherwise the vendor tools are asked; `auto` tries NVIDIA, then
/// ROCm, then DRM render nodes. Falls back to 1 when nothing is found.
pub async fn detect_accelerators(config: &DeviceConfig) -> u32 {
    if let Some(count) = config.count {
        info!("Using configured accelerator count: {}", count);
        return count;
    }

    let filter = config.product_filter.as_deref();
    let detected = match config.backend {
        DeviceBackend::Nvidia => nvidia_devices().await,
        DeviceBackend::Rocm => rocm_devices(filter).await,
        DeviceBackend::Auto => match nvidia_devices().await {
            Some(count) => Some(count),
            None => match rocm_devices(filter).await {
                Some(count) => Some(count),
                None => render_nodes(Path::new("/dev/dri")),
            },
        },
    };

    match detected {
        Some(count) => {
            info!("Detected {} accelerator(s)", count);
            count
        }
        None => {
            warn!("No accelerators detected, assuming 1");
            1
        }
    }
}

/// Count devices in `nvidia-smi -L` output
pub fn count_nvidia_devices(stdout: &str) -> u32 {
    stdout.lines().filter(|line| !line.trim().is_empty()).count() as u32
}

/// Count devices in `rocm-smi --showid` output, optionally restricted to a product name
pub fn count_rocm_devices(stdout: &str, product_filter: Option<&str>) -> u32 {
    stdout
        .lines()
        .filter(|line| line.contains("Device Name"))
        .filter(|line| product_filter.map_or(true, |product| line.contains(product)))
        .count() as u32
}

async fn run_tool(program: &str, args: &[&str]) -> Option<String> {
    match Command::new(program).args(args).output().await {
        Ok(output) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(output) => {
            debug!("{} exited with {}", program, output.status);
            None
        }
        Err(e) => {
            debug!("{} unavailable: {}", program, e);
            None
        }
    }
}

async fn nvidia_devices() -> Option<u32> {
    let stdout = run_tool("nvidia-smi", &["-L"]).await?;
    Some(count_nvidia_devices(&stdout)).filter(|&n| n > 0)
}

async fn rocm_devices(product_filter: Option<&str>) -> Option<u32> {
    let stdout = run_tool("rocm-smi", &["--showid"]).await?;
    Some(count_rocm_devices(&stdout, product_filter)).filter(|&n| n > 0)
}

fn render_nodes(dir: &Path) -> Option<u32> {
    let entries = std::fs::read_dir(dir).ok()?;
    let count = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("renderD"))
        .count() as u32;
    Some(count).filter(|&n| n > 0)
}
