//! # grid-core
//!
//! Core types, catalog and configuration for benchgrid, a sweep runner that benchmarks an
//! LLM inference server across tensor-parallel degree, memory utilization, concurrency and
//! request rate.
//!
//! This crate provides:
//!
//! - The model catalog ([`ConfigCatalog`]) mapping model ids to their launch profiles
//! - Probe identity and outcome types ([`ProbeKey`], [`ProbeConfig`], [`ProbeResult`])
//! - Layered configuration loading ([`BenchConfig`])
//! - The shared error type

pub mod catalog;
pub mod config;
pub mod error;
pub mod probe;

pub use catalog::{ConfigCatalog, EnvOverride, ModelProfile};
pub use config::{BenchConfig, DeviceBackend, DeviceConfig, ServerConfig, SweepConfig, VerifyConfig};
pub use error::{CoreError, Result};
pub use probe::{
    CapacityMetrics, LatencyMetrics, ProbeConfig, ProbeKey, ProbeKind, ProbeMetrics, ProbeOutcome,
    ProbeResult, RequestRate, ThroughputMetrics, Utilization,
};

/// Concurrency levels probed by the capacity sweep, in ascending order.
pub const DEFAULT_CONCURRENCY_LEVELS: [u32; 4] = [1, 4, 8, 16];

/// Replace path separators in a model id so it can be embedded in a file name.
pub fn safe_model_name(model: &str) -> String {
    model.replace('/', "_")
}
