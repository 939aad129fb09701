//! # grid-sweep
//!
//! Walks the benchmark matrix with a single sequential controller.
//!
//! Two sweeps are provided by [`SweepExecutor`]:
//! - the performance sweep (TP → model → throughput, then latency across request rates)
//! - the capacity sweep (TP → model → utilization → concurrency level)
//!
//! At most one server runs at a time. Every probe consults the run cache first, and every
//! probe-level failure is recorded as a failed result rather than aborting the sweep.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

mod capacity;
pub mod executor;

#[cfg(test)]
mod mock;

pub use executor::{eligible_degrees, SweepExecutor};

/// Result type for sweep setup
pub type Result<T> = std::result::Result<T, SweepError>;

/// Errors raised before a sweep starts. Probe failures never surface here.
#[derive(Error, Debug)]
pub enum SweepError {
    #[error(transparent)]
    Core(#[from] grid_core::CoreError),

    #[error(transparent)]
    Runtime(#[from] grid_runtime::RuntimeError),

    #[error(transparent)]
    Store(#[from] grid_store::StoreError),
}

/// Counters reported at the end of a sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    /// Server launches attempted
    pub server_starts: u32,
    /// Results recorded, successful or not
    pub probes_run: u32,
    /// Probes skipped because a result was on disk
    pub probes_skipped: u32,
    /// Recorded results that are failures
    pub probes_failed: u32,
}

impl SweepStats {
    /// True when nothing was executed
    pub fn is_noop(&self) -> bool {
        self.server_starts == 0 && self.probes_run == 0
    }
}

impl fmt::Display for SweepStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} server start(s), {} probe(s) run, {} skipped, {} failed",
            self.server_starts, self.probes_run, self.probes_skipped, self.probes_failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_display() {
        let stats = SweepStats {
            server_starts: 2,
            probes_run: 5,
            probes_skipped: 1,
            probes_failed: 1,
        };
        assert_eq!(
            stats.to_string(),
            "2 server start(s), 5 probe(s) run, 1 skipped, 1 failed"
        );
        assert!(!stats.is_noop());
        assert!(SweepStats::default().is_noop());
    }
}
