//! Result store: one JSON file per probe

use crate::record::ProbeRecord;
use crate::{Result, StoreError};
use grid_core::{safe_model_name, ProbeKey, ProbeKind, ProbeResult};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory of probe records, keyed by [`ProbeKey`]
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name for a probe
    pub fn file_name(key: &ProbeKey) -> String {
        let stem = format!("{}_tp{}", safe_model_name(&key.model), key.tp);
        match key.kind {
            ProbeKind::Throughput => format!("{}_throughput.json", stem),
            ProbeKind::Latency { rate } => format!("{}_qps{}_latency.json", stem, rate),
            ProbeKind::Capacity { util, max_seqs } => format!(
                "{}_util{}_seqs{}_capacity.json",
                stem,
                util.file_token(),
                max_seqs
            ),
        }
    }

    /// Storage path for a probe
    pub fn path_for(&self, key: &ProbeKey) -> PathBuf {
        self.dir.join(Self::file_name(key))
    }

    /// Scratch path for raw tool output belonging to a probe
    pub fn scratch_path_for(&self, key: &ProbeKey) -> PathBuf {
        let mut name = Self::file_name(key);
        name.truncate(name.len() - ".json".len());
        self.dir.join(format!("{}.raw", name))
    }

    /// Record a result, replacing any previous record for the same key
    pub async fn write(&self, result: &ProbeResult) -> Result<PathBuf> {
        let path = self.path_for(result.key());
        let data = serde_json::to_vec_pretty(&ProbeRecord::from(result))?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let temp_file = path.with_extension("json.tmp");
        tokio::fs::write(&temp_file, &data).await?;
        tokio::fs::rename(&temp_file, &path).await?;

        debug!("Recorded {} at {}", result.key(), path.display());
        Ok(path)
    }

    /// Load the record for `key`.
    ///
    /// `Ok(None)` when no file exists; an error when the file exists but is malformed or
    /// belongs to a different probe.
    pub async fn load(&self, key: &ProbeKey) -> Result<Option<ProbeResult>> {
        let path = self.path_for(key);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let result = parse_record(&path, &data)?;
        if result.key() != key {
            return Err(StoreError::corrupt(
                &path,
                format!("record belongs to {}", result.key()),
            ));
        }
        Ok(Some(result))
    }

    /// Load every well-formed record, ordered by file name. Malformed files are skipped.
    pub async fn load_all(&self) -> Result<Vec<ProbeResult>> {
        let mut paths = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            let data = tokio::fs::read(&path).await?;
            match parse_record(&path, &data) {
                Ok(result) => results.push(result),
                Err(e) => warn!("Skipping {}", e),
            }
        }
        Ok(results)
    }

    /// Remove every record and leftover temporary file. Returns the number of records removed.
    pub async fn clear(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".json") {
                tokio::fs::remove_file(&path).await?;
                removed += 1;
            } else if name.ends_with(".json.tmp") || name.ends_with(".raw") {
                tokio::fs::remove_file(&path).await?;
            }
        }

        info!("Cleared {} record(s) from {}", removed, self.dir.display());
        Ok(removed)
    }

    /// Write every record as one JSON array. Returns the number exported.
    pub async fn export(&self, path: &Path) -> Result<usize> {
        let records: Vec<ProbeRecord> = self
            .load_all()
            .await?
            .iter()
            .map(ProbeRecord::from)
            .collect();
        let data = serde_json::to_vec_pretty(&records)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, data).await?;
        info!("Exported {} record(s) to {}", records.len(), path.display());
        Ok(records.len())
    }
}

fn parse_record(path: &Path, data: &[u8]) -> Result<ProbeResult> {
    let record: ProbeRecord =
        serde_json::from_slice(data).map_err(|e| StoreError::corrupt(path, e))?;
    ProbeResult::try_from(record).map_err(|e| StoreError::corrupt(path, e))
}

/// Read a JSON array of records, such as one produced by [`ResultStore::export`].
/// Entries that do not form a valid result are skipped.
pub async fn read_records_file(path: &Path) -> Result<Vec<ProbeResult>> {
    let data = tokio::fs::read(path).await?;
    let values: Vec<serde_json::Value> =
        serde_json::from_slice(&data).map_err(|e| StoreError::corrupt(path, e))?;

    let mut results = Vec::with_capacity(values.len());
    for (index, value) in values.into_iter().enumerate() {
        let parsed = serde_json::from_value::<ProbeRecord>(value)
            .map_err(StoreError::from)
            .and_then(ProbeResult::try_from);
        match parsed {
            Ok(result) => results.push(result),
            Err(e) => warn!("Skipping entry {} of {}: {}", index, path.display(), e),
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_core::{
        CapacityMetrics, ModelProfile, ProbeConfig, ProbeMetrics, RequestRate, ThroughputMetrics,
        Utilization,
    };

    fn util(v: f64) -> Utilization {
        Utilization::new(v).unwrap()
    }

    fn throughput_result(model: &str, tps: f64) -> ProbeResult {
        let profile = ModelProfile::fallback(model);
        ProbeResult::success(
            ProbeConfig::throughput(&profile, 1, util(0.98)),
            profile.max_model_len,
            ProbeMetrics::Throughput(ThroughputMetrics {
                tokens_per_second: tps,
            }),
        )
    }

    #[test]
    fn test_file_names() {
        let latency = ProbeKey::new(
            "meta-llama/Llama",
            2,
            ProbeKind::Latency {
                rate: RequestRate::new(1.0).unwrap(),
            },
        );
        assert_eq!(
            ResultStore::file_name(&latency),
            "meta-llama_Llama_tp2_qps1.0_latency.json"
        );

        let capacity = ProbeKey::new(
            "org/m",
            1,
            ProbeKind::Capacity {
                util: util(0.9),
                max_seqs: 16,
            },
        );
        assert_eq!(
            ResultStore::file_name(&capacity),
            "org_m_tp1_util0.9_seqs16_capacity.json"
        );

        let throughput = ProbeKey::new("org/m", 1, ProbeKind::Throughput);
        assert_eq!(ResultStore::file_name(&throughput), "org_m_tp1_throughput.json");
    }

    #[tokio::test]
    async fn test_write_then_load_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).await.unwrap();

        let first = throughput_result("org/m", 100.0);
        let path = store.write(&first).await.unwrap();
        assert!(path.ends_with("org_m_tp1_throughput.json"));

        let second = throughput_result("org/m", 250.0);
        store.write(&second).await.unwrap();

        let loaded = store.load(second.key()).await.unwrap().unwrap();
        assert_eq!(loaded.throughput().unwrap().tokens_per_second, 250.0);
        assert_eq!(store.load_all().await.unwrap().len(), 1);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_load_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).await.unwrap();
        let key = ProbeKey::new("org/m", 1, ProbeKind::Throughput);

        assert!(store.load(&key).await.unwrap().is_none());

        std::fs::write(store.path_for(&key), b"{\"model\": \"org/m\", \"tp\":").unwrap();
        let err = store.load(&key).await.unwrap_err();
        assert!(err.is_corrupt());
    }

    #[tokio::test]
    async fn test_load_all_skips_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).await.unwrap();
        store.write(&throughput_result("org/a", 1.0)).await.unwrap();
        store.write(&throughput_result("org/b", 2.0)).await.unwrap();
        std::fs::write(dir.path().join("garbage.json"), b"not json").unwrap();
        std::fs::write(dir.path().join("org_a_tp1_server.log"), b"log").unwrap();

        let all = store.load_all().await.unwrap();
        let models: Vec<&str> = all.iter().map(|r| r.key().model.as_str()).collect();
        assert_eq!(models, vec!["org/a", "org/b"]);
    }

    #[tokio::test]
    async fn test_clear_keeps_logs() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).await.unwrap();
        store.write(&throughput_result("org/a", 1.0)).await.unwrap();
        std::fs::write(dir.path().join("org_a_tp1_server.log"), b"log").unwrap();

        assert_eq!(store.clear().await.unwrap(), 1);
        assert!(store.load_all().await.unwrap().is_empty());
        assert!(dir.path().join("org_a_tp1_server.log").exists());
    }

    #[tokio::test]
    async fn test_export_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path().join("results")).await.unwrap();
        let profile = ModelProfile::fallback("org/m");
        let capacity = ProbeResult::success(
            ProbeConfig::capacity(&profile, 1, util(0.95), 4),
            8192,
            ProbeMetrics::Capacity(CapacityMetrics {
                real_capacity: 50_000,
                verified_len: 8192,
            }),
        );
        store.write(&capacity).await.unwrap();
        store.write(&throughput_result("org/m", 3.0)).await.unwrap();

        let export = dir.path().join("max_context_results.json");
        assert_eq!(store.export(&export).await.unwrap(), 2);

        let back = read_records_file(&export).await.unwrap();
        assert_eq!(back.len(), 2);
        assert!(back.iter().any(|r| r.verified_len() == Some(8192)));
    }

    #[tokio::test]
    async fn test_read_records_file_skips_invalid_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        std::fs::write(
            &path,
            r#"[
                {"model": "org/m", "tp": 1, "util": "0.9", "max_seqs": 1, "status": "success",
                 "configured_len": 8192, "real_capacity": 9000, "max_context_1_user": 8192},
                {"model": "org/m", "tp": 1}
            ]"#,
        )
        .unwrap();
        let results = read_records_file(&path).await.unwrap();
        assert_eq!(results.len(), 1);
    }
}
