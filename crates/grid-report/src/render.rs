//! Markdown renderers

use crate::aggregate::CapacitySurface;
use grid_core::{ProbeKind, ProbeResult};

const REPORT_HEADER: &str = "\
# Context Limits

This table shows the **Maximum Working Context** found for each configuration.
- **Target Limit**: the maximum context length the server was asked to initialize with.
- **True Capacity**: the space (tokens) available in device memory for the KV cache.
- **Verified Limit**: the usable context size, limited by either target or capacity, confirmed by a single request.
";

/// Make free text safe for a Markdown table cell
pub fn escape_cell(text: &str) -> String {
    text.replace("\r\n", " ")
        .replace(|c: char| c == '\n' || c == '\r', " ")
        .replace('|', "/")
}

/// Compact context length: `Fail` when absent or zero, thousands as `k`
pub fn format_context(len: Option<u32>) -> String {
    match len {
        None | Some(0) => "Fail".to_string(),
        Some(len) if len >= 1000 => format!("{:.0}k", f64::from(len) / 1000.0),
        Some(len) => len.to_string(),
    }
}

/// Context-limit report: one row per capacity result, sorted by model, tp, utilization and
/// concurrency level.
pub fn context_report(results: &[ProbeResult]) -> String {
    let mut rows: Vec<_> = results
        .iter()
        .filter_map(|r| match r.key().kind {
            ProbeKind::Capacity { util, max_seqs } => Some((r, util, max_seqs)),
            _ => None,
        })
        .collect();
    rows.sort_by(|(a, a_util, a_seqs), (b, b_util, b_seqs)| {
        a.key()
            .model
            .cmp(&b.key().model)
            .then(a.key().tp.cmp(&b.key().tp))
            .then(a_util.cmp(b_util))
            .then(a_seqs.cmp(b_seqs))
    });

    let mut out = String::from(REPORT_HEADER);
    out.push('\n');
    out.push_str("| Model | TP | Util | Seqs | Target Limit | True Capacity | **Verified Limit** | Error |\n");
    out.push_str("|---|---|---|---|---|---|---|---|\n");

    for (result, util, seqs) in rows {
        let key = result.key();
        let line = match (result.capacity(), result.error()) {
            (Some(capacity), _) => format!(
                "| {} | {} | {} | {} | {} | {} | **{}** | - |",
                key.model,
                key.tp,
                util,
                seqs,
                result.configured_len,
                capacity.real_capacity,
                capacity.verified_len
            ),
            (None, error) => format!(
                "| {} | {} | {} | {} | {} | ERROR | - | {} |",
                key.model,
                key.tp,
                util,
                seqs,
                result.configured_len,
                escape_cell(error.unwrap_or("-"))
            ),
        };
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn level_header(level: u32) -> String {
    if level == 1 {
        "1 Req".to_string()
    } else {
        format!("{} Reqs", level)
    }
}

/// Capacity table: one row per (model, tp), one column per concurrency level, each cell the
/// backfilled context with the utilization that achieved it.
pub fn capacity_table(surface: &CapacitySurface) -> String {
    let mut out = String::from(
        "**Table Key:** Cell values represent `Max Context Length (GPU Memory Utilization)`.\n\n",
    );

    let mut header = vec!["Model".to_string(), "TP".to_string()];
    header.extend(surface.levels.iter().map(|&l| level_header(l)));
    out.push_str(&format!("| {} |\n", header.join(" | ")));
    out.push_str(&format!("|{}\n", " :--- |".repeat(header.len())));

    let mut previous: Option<&str> = None;
    for row in &surface.rows {
        let mut cells = Vec::with_capacity(header.len());
        cells.push(if previous == Some(row.model.as_str()) {
            String::new()
        } else {
            format!("**`{}`**", row.model)
        });
        cells.push(row.tp.to_string());
        cells.extend(row.corrected.iter().map(|cell| match cell {
            Some(cell) => format!(
                "{} ({:.2})",
                format_context(Some(cell.verified_len)),
                cell.util.value()
            ),
            None => "Fail".to_string(),
        }));
        out.push_str(&format!("| {} |\n", cells.join(" | ")));
        previous = Some(row.model.as_str());
    }
    out
}
