//! # grid-runtime
//!
//! Everything in benchgrid that touches a child process or the network.
//!
//! This crate provides:
//! - [`ProcessController`], which owns exactly one server-under-test process at a time
//! - Readiness polling against the server's liveness endpoint
//! - [`VllmBenchClient`], which drives the offline and online benchmark entry points and
//!   verifies single-request context lengths
//! - A narrow parsing boundary that turns benchmark output and server logs into typed metrics
//! - Accelerator discovery
//!
//! The sweep talks to the server and the benchmark tools only through the [`ServerControl`]
//! and [`BenchClient`] traits so that it can be driven by mocks in tests.

use thiserror::Error;

pub mod bench;
pub mod devices;
pub mod health;
pub mod launch;
pub mod parse;
pub mod process;
pub mod vllm;

pub use bench::{BenchClient, LatencyRequest, ThroughputRequest, Workload};
pub use devices::detect_accelerators;
pub use health::{HealthProbe, Readiness};
pub use launch::LaunchSpec;
pub use parse::ParseError;
pub use process::{ProcessController, ServerControl};
pub use vllm::VllmBenchClient;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur while driving the server or its benchmark tools
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Process error: {0}")]
    Process(String),

    #[error("Startup failed: {0}")]
    Startup(String),

    #[error("Health check failed: {0}")]
    HealthCheck(String),

    #[error("Benchmark failed: {0}")]
    Benchmark(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] grid_core::CoreError),
}

impl RuntimeError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RuntimeError::Timeout(_) | RuntimeError::Http(_) | RuntimeError::InvalidResponse(_)
        )
    }

    /// Check if this error means the server never came up
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            RuntimeError::Startup(_) | RuntimeError::HealthCheck(_) | RuntimeError::Process(_)
        )
    }
}
