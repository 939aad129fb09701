//! Configuration management for benchgrid
//!
//! Configuration is layered with the following precedence:
//! 1. Command line flags (applied by the binary, highest)
//! 2. Environment variables (`BENCHGRID__SECTION__KEY`)
//! 3. Configuration file
//! 4. Built-in defaults (lowest)

use crate::catalog::{builtin_profiles, ConfigCatalog, ModelProfile};
use crate::probe::{RequestRate, Utilization};
use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "BENCHGRID_CONFIG";

/// Prefix for per-key environment overrides
pub const ENV_PREFIX: &str = "BENCHGRID";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Directory holding one JSON artifact per probe
    pub results_dir: PathBuf,

    /// Server-under-test launch and lifecycle settings
    pub server: ServerConfig,

    /// Sweep matrix and probe workload settings
    pub sweep: SweepConfig,

    /// Accelerator discovery
    pub devices: DeviceConfig,

    /// Model catalog in declared sweep order
    pub models: Vec<ModelProfile>,
}

/// Server launch and lifecycle settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server executable
    pub command: String,

    /// Bind host
    pub host: String,

    /// Bind port
    pub port: u16,

    /// Liveness endpoint polled until it answers 200
    pub ready_path: String,

    /// Interval between liveness polls
    pub poll_interval_ms: u64,

    /// Per-request timeout of a liveness poll
    pub poll_timeout_ms: u64,

    /// Give up waiting for readiness after this long
    pub startup_timeout_secs: u64,

    /// Extra wait after the first successful poll
    pub settle_delay_secs: u64,

    /// Wait for the child to exit after SIGTERM before killing its group
    pub shutdown_timeout_secs: u64,

    /// Extra wait after the kill sweep so devices are released
    pub teardown_settle_secs: u64,

    /// Compiled-kernel cache purged whenever model or TP changes
    pub cache_dir: Option<PathBuf>,

    /// Value for the dtype flag
    pub dtype: String,
}

/// Sweep matrix and probe workload settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Requested tensor-parallel degrees
    pub tp: Vec<u32>,

    /// Sweep-wide memory utilization for throughput and latency probes
    pub gpu_util: Utilization,

    /// Request rates for the latency sweep, ascending
    pub request_rates: Vec<RequestRate>,

    /// Length of each latency run; the prompt count is `rate * duration`
    pub serve_duration_secs: u64,

    /// Lower bound on prompts per latency run
    pub min_prompts: u32,

    /// Prompt count for offline throughput runs
    pub offline_prompts: u32,

    /// Forced output length for offline throughput runs
    pub output_len: u32,

    /// ShareGPT style dataset; random prompts are used when absent
    pub dataset_path: Option<PathBuf>,

    /// Random prompt input length when no dataset is available
    pub random_input_len: u32,

    /// Random prompt output length when no dataset is available
    pub random_output_len: u32,

    /// Utilization targets probed by the capacity sweep
    pub capacity_utils: Vec<Utilization>,

    /// Concurrency levels probed by the capacity sweep, ascending
    pub concurrency_levels: Vec<u32>,

    /// Re-run probes whose stored result is an error
    pub retry_failed: bool,

    /// Single-request context verification
    pub verify: VerifyConfig,
}

/// Context verification settings for capacity probes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyConfig {
    /// Tokens generated by the verification request
    pub output_tokens: u32,

    /// Candidate length multiplier applied after a failed attempt
    pub shrink_ratio: f64,

    /// Attempts before the probe is recorded as failed
    pub max_attempts: u32,

    /// Timeout of one verification request
    pub request_timeout_secs: u64,
}

/// Accelerator vendor tooling used for discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceBackend {
    Auto,
    Nvidia,
    Rocm,
}

/// Accelerator discovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub backend: DeviceBackend,

    /// Skip discovery and assume this many devices
    pub count: Option<u32>,

    /// Only count ROCm devices whose name contains this string
    pub product_filter: Option<String>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("benchmark_results"),
            server: ServerConfig::default(),
            sweep: SweepConfig::default(),
            devices: DeviceConfig::default(),
            models: builtin_profiles(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: "vllm".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8000,
            ready_path: "/v1/models".to_string(),
            poll_interval_ms: 2000,
            poll_timeout_ms: 2000,
            startup_timeout_secs: 600,
            settle_delay_secs: 5,
            shutdown_timeout_secs: 30,
            teardown_settle_secs: 5,
            cache_dir: None,
            dtype: "auto".to_string(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        let util = Utilization::from_literal;
        let rate = RequestRate::from_literal;
        Self {
            tp: vec![1, 2],
            gpu_util: util(0.98),
            request_rates: vec![rate(1.0), rate(4.0)],
            serve_duration_secs: 180,
            min_prompts: 10,
            offline_prompts: 1000,
            output_len: 512,
            dataset_path: None,
            random_input_len: 1024,
            random_output_len: 512,
            capacity_utils: vec![util(0.90), util(0.95), util(0.98)],
            concurrency_levels: crate::DEFAULT_CONCURRENCY_LEVELS.to_vec(),
            retry_failed: false,
            verify: VerifyConfig::default(),
        }
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            output_tokens: 16,
            shrink_ratio: 0.9,
            max_attempts: 6,
            request_timeout_secs: 600,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: DeviceBackend::Auto,
            count: None,
            product_filter: None,
        }
    }
}

impl BenchConfig {
    /// Load configuration from defaults, an optional file and the environment.
    ///
    /// With no explicit path, `$BENCHGRID_CONFIG` is tried, then `./benchgrid.yaml`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        match path {
            Some(path) => {
                debug!("Loading configuration file {}", path.display());
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Ok(env_path) = std::env::var(CONFIG_PATH_ENV) {
                    debug!("Loading configuration file from ${}", CONFIG_PATH_ENV);
                    builder = builder
                        .add_source(config::File::from(PathBuf::from(env_path)).required(true));
                } else {
                    builder = builder
                        .add_source(config::File::with_name("benchgrid").required(false));
                }
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let parsed: Self = builder.build()?.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Load configuration from a file on top of the defaults, ignoring the environment
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let parsed: Self = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.sweep.validate()?;
        if self.models.is_empty() {
            return Err(CoreError::config("model catalog is empty"));
        }
        // Catalog construction checks every profile and duplicate ids
        ConfigCatalog::new(self.models.clone())?;
        Ok(())
    }

    /// Build the immutable catalog
    pub fn catalog(&self) -> Result<ConfigCatalog> {
        ConfigCatalog::new(self.models.clone())
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Write the configuration to `path` as YAML
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }
}

impl ServerConfig {
    /// Base URL of the server under test
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn teardown_settle(&self) -> Duration {
        Duration::from_secs(self.teardown_settle_secs)
    }

    /// Configured cache directory, or `~/.cache/vllm`
    pub fn effective_cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".cache").join("vllm")))
    }

    fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(CoreError::config("server.command must not be empty"));
        }
        if self.port == 0 {
            return Err(CoreError::config("server.port must not be zero"));
        }
        if !self.ready_path.starts_with('/') {
            return Err(CoreError::config("server.ready_path must start with '/'"));
        }
        if self.poll_interval_ms == 0 {
            return Err(CoreError::config("server.poll_interval_ms must be positive"));
        }
        if self.startup_timeout_secs == 0 {
            return Err(CoreError::config("server.startup_timeout_secs must be positive"));
        }
        Ok(())
    }
}

impl SweepConfig {
    fn validate(&self) -> Result<()> {
        if self.tp.is_empty() || self.tp.contains(&0) {
            return Err(CoreError::config(
                "sweep.tp must list at least one positive degree",
            ));
        }
        if self.concurrency_levels.is_empty() || self.concurrency_levels.contains(&0) {
            return Err(CoreError::config(
                "sweep.concurrency_levels must list at least one positive level",
            ));
        }
        if !self.concurrency_levels.windows(2).all(|w| w[0] < w[1]) {
            return Err(CoreError::config(
                "sweep.concurrency_levels must be strictly ascending",
            ));
        }
        if self.capacity_utils.is_empty() {
            return Err(CoreError::config("sweep.capacity_utils must not be empty"));
        }
        if self.offline_prompts == 0 || self.output_len == 0 {
            return Err(CoreError::config(
                "sweep.offline_prompts and sweep.output_len must be positive",
            ));
        }
        self.verify.validate()
    }

    /// Request rates in ascending order without duplicates
    pub fn sorted_rates(&self) -> Vec<RequestRate> {
        let mut rates = self.request_rates.clone();
        rates.sort();
        rates.dedup();
        rates
    }
}

impl VerifyConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if !(self.shrink_ratio > 0.0 && self.shrink_ratio < 1.0) {
            return Err(CoreError::config("sweep.verify.shrink_ratio must be in (0, 1)"));
        }
        if self.max_attempts == 0 {
            return Err(CoreError::config("sweep.verify.max_attempts must be positive"));
        }
        Ok(())
    }
}
