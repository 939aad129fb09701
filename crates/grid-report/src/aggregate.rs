//! Capacity aggregation

use grid_core::{ConfigCatalog, ProbeKind, ProbeResult, Utilization};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Best result chosen for one concurrency level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapacityCell {
    pub verified_len: u32,
    pub util: Utilization,
    /// Concurrency level the result was measured at
    pub source_level: u32,
}

impl CapacityCell {
    /// Longer verified context wins; equal context prefers the lower utilization
    pub fn beats(&self, other: &CapacityCell) -> bool {
        self.verified_len > other.verified_len
            || (self.verified_len == other.verified_len && self.util < other.util)
    }
}

/// First best cell in iteration order
fn pick_best(cells: impl IntoIterator<Item = CapacityCell>) -> Option<CapacityCell> {
    cells.into_iter().fold(None, |best, cell| match best {
        Some(current) if !cell.beats(&current) => Some(current),
        _ => Some(cell),
    })
}

/// Monotonic correction over ascending concurrency levels: each level takes the best cell found
/// at that level or any higher one. Levels with nothing at or above them stay `None`.
pub fn backfill(raw: &[Option<CapacityCell>]) -> Vec<Option<CapacityCell>> {
    (0..raw.len())
        .map(|i| pick_best(raw[i..].iter().flatten().copied()))
        .collect()
}

/// Per-level cells for one (model, tp) pair, aligned with [`CapacitySurface::levels`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurfaceRow {
    pub model: String,
    pub tp: u32,
    pub raw: Vec<Option<CapacityCell>>,
    pub corrected: Vec<Option<CapacityCell>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacitySurface {
    /// Concurrency levels, ascending
    pub levels: Vec<u32>,
    /// Catalog order, unknown models after known ones by id, then tp ascending
    pub rows: Vec<SurfaceRow>,
}

impl CapacitySurface {
    /// Build the surface from every successful capacity result. Results at levels outside
    /// `levels` are ignored.
    pub fn build(results: &[ProbeResult], catalog: &ConfigCatalog, levels: &[u32]) -> Self {
        let mut levels = levels.to_vec();
        levels.sort_unstable();
        levels.dedup();

        let mut groups: BTreeMap<(String, u32), Vec<Vec<CapacityCell>>> = BTreeMap::new();
        for result in results {
            let (ProbeKind::Capacity { util, max_seqs }, Some(capacity)) =
                (result.key().kind, result.capacity())
            else {
                continue;
            };
            if capacity.verified_len == 0 {
                debug!("Ignoring {}: nothing verified", result.key());
                continue;
            }
            let Some(index) = levels.iter().position(|&level| level == max_seqs) else {
                debug!("Ignoring {} outside the reported levels", result.key());
                continue;
            };

            let slots = groups
                .entry((result.key().model.clone(), result.key().tp))
                .or_insert_with(|| vec![Vec::new(); levels.len()]);
            slots[index].push(CapacityCell {
                verified_len: capacity.verified_len,
                util,
                source_level: max_seqs,
            });
        }

        let mut rows: Vec<SurfaceRow> = groups
            .into_iter()
            .map(|((model, tp), slots)| {
                let raw: Vec<Option<CapacityCell>> = slots.into_iter().map(pick_best).collect();
                let corrected = backfill(&raw);
                SurfaceRow {
                    model,
                    tp,
                    raw,
                    corrected,
                }
            })
            .collect();
        rows.sort_by_key(|row| catalog.position(&row.model).unwrap_or(usize::MAX));

        Self { levels, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, model: &str, tp: u32) -> Option<&SurfaceRow> {
        self.rows.iter().find(|row| row.model == model && row.tp == tp)
    }

    /// Corrected cell for `level`; `None` when unattainable or not reported
    pub fn corrected(&self, model: &str, tp: u32, level: u32) -> Option<CapacityCell> {
        let index = self.levels.iter().position(|&l| l == level)?;
        self.row(model, tp)?.corrected[index]
    }
}

/// Largest verified context among successful capacity results for `model` at any degree up to
/// `tp`, or `default` when there is none.
pub fn recommended_context(results: &[ProbeResult], model: &str, tp: u32, default: u32) -> u32 {
    results
        .iter()
        .filter(|r| r.key().model == model && r.key().tp <= tp)
        .filter_map(ProbeResult::verified_len)
        .filter(|&len| len > 0)
        .max()
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_core::{
        CapacityMetrics, ModelProfile, ProbeConfig, ProbeMetrics, DEFAULT_CONCURRENCY_LEVELS,
    };

    fn util(v: f64) -> Utilization {
        Utilization::new(v).unwrap()
    }

    fn capacity(model: &str, tp: u32, u: f64, seqs: u32, verified: u32) -> ProbeResult {
        let profile = ModelProfile::fallback(model);
        ProbeResult::success(
            ProbeConfig::capacity(&profile, tp, util(u), seqs),
            131_072,
            ProbeMetrics::Capacity(CapacityMetrics {
                real_capacity: verified,
                verified_len: verified,
            }),
        )
    }

    fn failed(model: &str, tp: u32, u: f64, seqs: u32) -> ProbeResult {
        let profile = ModelProfile::fallback(model);
        ProbeResult::failure(
            ProbeConfig::capacity(&profile, tp, util(u), seqs),
            131_072,
            "CUDA out of memory",
        )
    }

    fn catalog(ids: &[&str]) -> ConfigCatalog {
        ConfigCatalog::new(ids.iter().map(|id| ModelProfile::fallback(*id)).collect()).unwrap()
    }

    fn cell(verified_len: u32, u: f64, source_level: u32) -> CapacityCell {
        CapacityCell {
            verified_len,
            util: util(u),
            source_level,
        }
    }

    #[test]
    fn test_lower_level_inherits_higher_level_result() {
        let results = vec![
            capacity("M", 1, 0.90, 1, 64_000),
            capacity("M", 1, 0.95, 4, 70_000),
        ];
        let surface = CapacitySurface::build(&results, &catalog(&["M"]), &DEFAULT_CONCURRENCY_LEVELS);

        let row = surface.row("M", 1).unwrap();
        assert_eq!(row.raw[0], Some(cell(64_000, 0.90, 1)));
        assert_eq!(surface.corrected("M", 1, 1), Some(cell(70_000, 0.95, 4)));
        assert_eq!(surface.corrected("M", 1, 4), Some(cell(70_000, 0.95, 4)));
        assert_eq!(surface.corrected("M", 1, 8), None);
        assert_eq!(surface.corrected("M", 1, 16), None);
    }

    #[test]
    fn test_equal_context_prefers_lower_utilization() {
        let a = capacity("M", 1, 0.95, 1, 50_000);
        let b = capacity("M", 1, 0.90, 1, 50_000);
        let levels = [1];

        for results in [vec![a.clone(), b.clone()], vec![b, a]] {
            let surface = CapacitySurface::build(&results, &catalog(&["M"]), &levels);
            assert_eq!(surface.corrected("M", 1, 1), Some(cell(50_000, 0.90, 1)));
        }
    }

    #[test]
    fn test_backfill_keeps_first_of_identical_cells() {
        let raw = vec![Some(cell(60_000, 0.90, 1)), Some(cell(60_000, 0.90, 4)), None];
        let corrected = backfill(&raw);
        assert_eq!(corrected[0].unwrap().source_level, 1);
        assert_eq!(corrected[1].unwrap().source_level, 4);
        assert_eq!(corrected[2], None);
    }

    #[test]
    fn test_corrected_surface_is_non_increasing() {
        let results = vec![
            capacity("M", 1, 0.90, 1, 40_000),
            capacity("M", 1, 0.95, 4, 52_000),
            capacity("M", 1, 0.98, 8, 30_000),
            capacity("M", 1, 0.90, 16, 45_000),
            capacity("M", 2, 0.90, 8, 90_000),
        ];
        let surface = CapacitySurface::build(&results, &catalog(&["M"]), &DEFAULT_CONCURRENCY_LEVELS);

        for row in &surface.rows {
            let lens: Vec<u32> = row
                .corrected
                .iter()
                .map_while(|c| c.map(|c| c.verified_len))
                .collect();
            assert!(lens.windows(2).all(|w| w[0] >= w[1]), "{:?}", lens);
        }
        assert_eq!(surface.corrected("M", 1, 8).unwrap().verified_len, 45_000);
        assert_eq!(surface.corrected("M", 2, 1).unwrap().verified_len, 90_000);
        assert_eq!(surface.corrected("M", 2, 16), None);
    }

    #[test]
    fn test_failures_and_other_kinds_ignored() {
        let results = vec![failed("M", 1, 0.90, 1), failed("M", 1, 0.95, 4)];
        let surface = CapacitySurface::build(&results, &catalog(&["M"]), &DEFAULT_CONCURRENCY_LEVELS);
        assert!(surface.is_empty());
    }

    #[test]
    fn test_rows_follow_catalog_order_then_tp() {
        let results = vec![
            capacity("z/unknown", 1, 0.90, 1, 1_000),
            capacity("b", 2, 0.90, 1, 2_000),
            capacity("a", 1, 0.90, 1, 3_000),
            capacity("b", 1, 0.90, 1, 4_000),
        ];
        let surface = CapacitySurface::build(&results, &catalog(&["b", "a"]), &[1]);
        let order: Vec<(&str, u32)> = surface
            .rows
            .iter()
            .map(|r| (r.model.as_str(), r.tp))
            .collect();
        assert_eq!(order, vec![("b", 1), ("b", 2), ("a", 1), ("z/unknown", 1)]);
    }

    #[test]
    fn test_build_is_order_independent() {
        let results = vec![
            capacity("M", 1, 0.90, 1, 64_000),
            capacity("M", 1, 0.95, 1, 64_000),
            capacity("M", 1, 0.95, 4, 70_000),
            capacity("M", 2, 0.90, 16, 20_000),
        ];
        let mut reversed = results.clone();
        reversed.reverse();

        let catalog = catalog(&["M"]);
        assert_eq!(
            CapacitySurface::build(&results, &catalog, &DEFAULT_CONCURRENCY_LEVELS),
            CapacitySurface::build(&reversed, &catalog, &DEFAULT_CONCURRENCY_LEVELS)
        );
    }

    #[test]
    fn test_recommended_context() {
        let results = vec![
            capacity("M", 1, 0.90, 1, 64_000),
            capacity("M", 2, 0.90, 1, 120_000),
            failed("M", 1, 0.98, 16),
        ];
        assert_eq!(recommended_context(&results, "M", 1, 8192), 64_000);
        assert_eq!(recommended_context(&results, "M", 2, 8192), 120_000);
        assert_eq!(recommended_context(&results, "other", 2, 8192), 8192);
    }

    #[test]
    fn test_surface_json_shape() {
        let results = vec![capacity("org/a", 1, 0.9, 4, 50_000)];
        let surface = CapacitySurface::build(&results, &catalog(&["org/a"]), &[1, 4]);
        let json = serde_json::to_value(&surface).unwrap();

        assert_eq!(json["levels"], serde_json::json!([1, 4]));
        assert!(json["rows"][0]["raw"][0].is_null());
        assert_eq!(json["rows"][0]["corrected"][0]["verified_len"], 50_000);
        assert_eq!(json["rows"][0]["corrected"][0]["util"], 0.9);
        assert_eq!(json["rows"][0]["corrected"][0]["source_level"], 4);
    }
}
