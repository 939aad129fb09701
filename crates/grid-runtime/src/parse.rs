//! Parsing boundary for benchmark output and server logs
//!
//! Raw text never leaves this module: callers get typed metrics or a [`ParseError`].

use grid_core::{LatencyMetrics, ThroughputMetrics};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use thiserror::Error;

/// Benchmark output could not be turned into metrics
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("missing field in benchmark output: {0}")]
    MissingField(&'static str),

    #[error("invalid number for {field}: '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("invalid benchmark JSON: {0}")]
    Json(#[from] serde_json::Error),
}

fn built_in(pattern: &str) -> Regex {
    Regex::new(pattern).expect("internal built-in regex must compile")
}

fn ttft_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| built_in(r"(?:Mean TTFT|TTFT)[^\d\n]*(\d+(?:\.\d+)?)"))
}

fn tpot_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| built_in(r"(?:Mean TPOT|TPOT)[^\d\n]*(\d+(?:\.\d+)?)"))
}

fn kv_cache_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| built_in(r"GPU KV cache size:\s*([\d,]+)\s*tokens"))
}

fn error_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| built_in(r"(?i)(error|out of memory|exception)"))
}

fn capture_f64(re: &Regex, text: &str, field: &'static str) -> Result<f64, ParseError> {
    let raw = re
        .captures(text)
        .and_then(|c| c.get(1))
        .ok_or(ParseError::MissingField(field))?
        .as_str();
    raw.parse::<f64>().map_err(|_| ParseError::InvalidNumber {
        field,
        value: raw.to_string(),
    })
}

/// Extract mean TTFT and TPOT from the online serving benchmark's standard output
pub fn parse_serve_output(output: &str) -> Result<LatencyMetrics, ParseError> {
    Ok(LatencyMetrics {
        mean_ttft_ms: capture_f64(ttft_regex(), output, "Mean TTFT")?,
        mean_tpot_ms: capture_f64(tpot_regex(), output, "Mean TPOT")?,
    })
}

#[derive(Deserialize)]
struct ThroughputReport {
    tokens_per_second: Option<f64>,
}

/// Extract tokens per second from the offline benchmark's JSON report
pub fn parse_throughput_json(json: &str) -> Result<ThroughputMetrics, ParseError> {
    let report: ThroughputReport = serde_json::from_str(json)?;
    let tokens_per_second = report
        .tokens_per_second
        .ok_or(ParseError::MissingField("tokens_per_second"))?;
    if !tokens_per_second.is_finite() || tokens_per_second < 0.0 {
        return Err(ParseError::InvalidNumber {
            field: "tokens_per_second",
            value: tokens_per_second.to_string(),
        });
    }
    Ok(ThroughputMetrics { tokens_per_second })
}

/// KV-cache capacity in tokens as reported in the server log.
///
/// Multi-worker servers report once per worker; the smallest value bounds a single request.
pub fn parse_kv_cache_tokens(log: &str) -> Option<u32> {
    kv_cache_regex()
        .captures_iter(log)
        .filter_map(|c| c.get(1))
        .filter_map(|m| m.as_str().replace(',', "").parse::<u32>().ok())
        .min()
}

/// Last line of the server log that looks like an error, trimmed
pub fn last_error_line(log: &str) -> Option<String> {
    log.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty() && error_line_regex().is_match(line))
        .map(str::to_string)
}
