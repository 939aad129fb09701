//! # grid-report
//!
//! Turns stored probe results into reports. Everything here is a pure function of its input:
//! the same results always produce the same output.
//!
//! This crate provides:
//! - [`CapacitySurface`]: best context per concurrency level with monotonic backfill
//! - [`recommended_context`]: the context length to launch a server with
//! - Markdown renderers for the context-limit report and the capacity table
//! - [`performance_summary`]: throughput and latency rows for the summary view
//!
//! The backfill assumes that a context length that survived a higher concurrency level also
//! survives a lower one. That is a property of the server under test and is not checked here,
//! so the corrected surface is an estimate.

pub mod aggregate;
pub mod render;
pub mod summary;

pub use aggregate::{backfill, recommended_context, CapacityCell, CapacitySurface, SurfaceRow};
pub use render::{capacity_table, context_report, escape_cell, format_context};
pub use summary::{performance_summary, SummaryRow};
