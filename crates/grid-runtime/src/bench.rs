//! Benchmark client interface

use crate::launch::LaunchSpec;
use crate::Result;
use async_trait::async_trait;
use grid_core::{EnvOverride, LatencyMetrics, RequestRate, ThroughputMetrics};
use std::path::PathBuf;

/// Prompt source for benchmark runs
#[derive(Debug, Clone, PartialEq)]
pub enum Workload {
    /// ShareGPT style conversation dump
    ShareGpt(PathBuf),
    /// Synthetic prompts of fixed length
    Random { input_len: u32, output_len: u32 },
}

impl Workload {
    /// Dataset flags for the offline throughput benchmark
    pub fn throughput_args(&self) -> Vec<String> {
        match self {
            Workload::ShareGpt(path) => vec![
                "--dataset-name".to_string(),
                "sharegpt".to_string(),
                "--dataset-path".to_string(),
                path.display().to_string(),
            ],
            Workload::Random { input_len, .. } => {
                vec!["--input-len".to_string(), input_len.to_string()]
            }
        }
    }

    /// Dataset flags for the online serving benchmark
    pub fn serve_args(&self) -> Vec<String> {
        match self {
            Workload::ShareGpt(path) => vec![
                "--dataset-name".to_string(),
                "sharegpt".to_string(),
                "--dataset-path".to_string(),
                path.display().to_string(),
            ],
            Workload::Random {
                input_len,
                output_len,
            } => vec![
                "--dataset-name".to_string(),
                "random".to_string(),
                "--random-input-len".to_string(),
                input_len.to_string(),
                "--random-output-len".to_string(),
                output_len.to_string(),
            ],
        }
    }
}

/// One offline batch run
#[derive(Debug, Clone, PartialEq)]
pub struct ThroughputRequest {
    pub launch: LaunchSpec,
    pub num_prompts: u32,
    pub max_batched_tokens: u32,
    pub output_len: u32,
    pub workload: Workload,
    /// Where the benchmark tool writes its JSON report
    pub report_path: PathBuf,
}

/// One online serving run against a live server
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyRequest {
    pub model: String,
    pub base_url: String,
    pub rate: RequestRate,
    pub num_prompts: u32,
    pub workload: Workload,
    pub env: Vec<EnvOverride>,
}

/// Runs benchmark workloads and reports typed metrics
#[async_trait]
pub trait BenchClient: Send + Sync {
    /// Offline batch benchmark; no server needs to be running
    async fn run_throughput(&self, request: &ThroughputRequest) -> Result<ThroughputMetrics>;

    /// Online serving benchmark against `request.base_url`
    async fn run_latency(&self, request: &LatencyRequest) -> Result<LatencyMetrics>;

    /// Send one completion of roughly `target` tokens and return the total tokens processed
    async fn verify_context(&self, base_url: &str, model: &str, target: u32) -> Result<u32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_workload_args() {
        let workload = Workload::Random {
            input_len: 1024,
            output_len: 512,
        };
        assert_eq!(workload.throughput_args(), vec!["--input-len", "1024"]);
        assert_eq!(
            workload.serve_args(),
            vec![
                "--dataset-name",
                "random",
                "--random-input-len",
                "1024",
                "--random-output-len",
                "512"
            ]
        );
    }

    #[test]
    fn test_sharegpt_workload_args() {
        let workload = Workload::ShareGpt(PathBuf::from("/data/sharegpt.json"));
        assert_eq!(workload.throughput_args(), workload.serve_args());
        assert_eq!(workload.serve_args()[3], "/data/sharegpt.json");
    }
}
