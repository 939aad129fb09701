//! Performance summary

use grid_core::{ConfigCatalog, ProbeKey, ProbeKind, ProbeResult, RequestRate};
use serde::Serialize;
use std::collections::HashMap;

/// One line of the performance summary. Throughput repeats across the rates of a (model, tp)
/// pair; missing or failed measurements are `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub model: String,
    pub tp: u32,
    pub tokens_per_second: Option<f64>,
    pub rate: Option<RequestRate>,
    pub mean_ttft_ms: Option<f64>,
    pub mean_tpot_ms: Option<f64>,
}

/// Rows in catalog order, then ascending tp, then ascending rate. Pairs with nothing on disk
/// are left out.
pub fn performance_summary(
    results: &[ProbeResult],
    catalog: &ConfigCatalog,
    degrees: &[u32],
    rates: &[RequestRate],
) -> Vec<SummaryRow> {
    let by_key: HashMap<&ProbeKey, &ProbeResult> = results.iter().map(|r| (r.key(), r)).collect();

    let mut degrees = degrees.to_vec();
    degrees.sort_unstable();
    degrees.dedup();
    let mut rates = rates.to_vec();
    rates.sort();
    rates.dedup();

    let mut rows = Vec::new();
    for profile in catalog.iter() {
        for &tp in degrees.iter().filter(|&&tp| profile.supports_tp(tp)) {
            let lookup = |kind: ProbeKind| by_key.get(&ProbeKey::new(&profile.id, tp, kind)).copied();

            let throughput = lookup(ProbeKind::Throughput);
            let latencies: Vec<(RequestRate, Option<&ProbeResult>)> = rates
                .iter()
                .map(|&rate| (rate, lookup(ProbeKind::Latency { rate })))
                .collect();
            if throughput.is_none() && latencies.iter().all(|(_, r)| r.is_none()) {
                continue;
            }

            let tokens_per_second = throughput
                .and_then(|r| r.throughput())
                .map(|t| t.tokens_per_second);

            if latencies.is_empty() {
                rows.push(SummaryRow {
                    model: profile.id.clone(),
                    tp,
                    tokens_per_second,
                    rate: None,
                    mean_ttft_ms: None,
                    mean_tpot_ms: None,
                });
                continue;
            }

            for (rate, result) in latencies {
                let latency = result.and_then(|r| r.latency());
                rows.push(SummaryRow {
                    model: profile.id.clone(),
                    tp,
                    tokens_per_second,
                    rate: Some(rate),
                    mean_ttft_ms: latency.map(|l| l.mean_ttft_ms),
                    mean_tpot_ms: latency.map(|l| l.mean_tpot_ms),
                });
            }
        }
    }
    rows
}
