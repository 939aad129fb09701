//! Skip-if-done checks

use crate::store::ResultStore;
use grid_core::ProbeKey;
use tracing::{debug, warn};

/// Decides whether a probe already has a usable result on disk
#[derive(Debug, Clone)]
pub struct RunCache {
    store: ResultStore,
    retry_failed: bool,
}

impl RunCache {
    /// With `retry_failed`, stored error results count as absent
    pub fn new(store: ResultStore, retry_failed: bool) -> Self {
        Self {
            store,
            retry_failed,
        }
    }

    /// True iff a well-formed result for exactly this key exists
    pub async fn should_skip(&self, key: &ProbeKey) -> bool {
        match self.store.load(key).await {
            Ok(Some(result)) if result.is_success() || !self.retry_failed => {
                debug!("Skipping {}: result on disk", key);
                true
            }
            Ok(Some(_)) => {
                debug!("Re-running failed probe {}", key);
                false
            }
            Ok(None) => false,
            Err(e) if e.is_corrupt() => {
                warn!("Re-running {}, stored result is unusable: {}", key, e);
                false
            }
            Err(e) => {
                warn!("Could not read stored result for {}: {}", key, e);
                false
            }
        }
    }

    /// Keys from `keys` that still need to run, in the given order
    pub async fn pending<'a>(&self, keys: &'a [ProbeKey]) -> Vec<&'a ProbeKey> {
        let mut pending = Vec::new();
        for key in keys {
            if !self.should_skip(key).await {
                pending.push(key);
            }
        }
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_core::{
        ModelProfile, ProbeConfig, ProbeKind, ProbeMetrics, ProbeResult, RequestRate,
        ThroughputMetrics, Utilization,
    };

    fn profile() -> ModelProfile {
        ModelProfile::fallback("org/m")
    }

    fn util() -> Utilization {
        Utilization::new(0.98).unwrap()
    }

    #[tokio::test]
    async fn test_skip_when_result_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).await.unwrap();
        let config = ProbeConfig::throughput(&profile(), 1, util());
        let cache = RunCache::new(store.clone(), false);

        assert!(!cache.should_skip(&config.key).await);

        store
            .write(&ProbeResult::success(
                config.clone(),
                8192,
                ProbeMetrics::Throughput(ThroughputMetrics {
                    tokens_per_second: 10.0,
                }),
            ))
            .await
            .unwrap();
        assert!(cache.should_skip(&config.key).await);
    }

    #[tokio::test]
    async fn test_corrupt_artifact_is_not_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).await.unwrap();
        let key = ProbeKey::new("org/m", 1, ProbeKind::Throughput);
        std::fs::write(store.path_for(&key), b"not json at all").unwrap();

        let cache = RunCache::new(store, false);
        assert!(!cache.should_skip(&key).await);
    }

    #[tokio::test]
    async fn test_failed_results_and_retry_flag() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).await.unwrap();
        let config = ProbeConfig::throughput(&profile(), 1, util());
        store
            .write(&ProbeResult::failure(
                config.clone(),
                8192,
                "server process exited during startup",
            ))
            .await
            .unwrap();

        assert!(RunCache::new(store.clone(), false).should_skip(&config.key).await);
        assert!(!RunCache::new(store, true).should_skip(&config.key).await);
    }

    #[tokio::test]
    async fn test_pending_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).await.unwrap();
        let p = profile();
        let rates = [1.0, 4.0].map(|r| RequestRate::new(r).unwrap());
        let keys: Vec<ProbeKey> = rates
            .iter()
            .map(|&rate| ProbeConfig::latency(&p, 1, util(), rate).key)
            .collect();

        store
            .write(&ProbeResult::failure(
                ProbeConfig::latency(&p, 1, util(), rates[0]),
                8192,
                "bench serve failed",
            ))
            .await
            .unwrap();

        let cache = RunCache::new(store, false);
        let pending = cache.pending(&keys).await;
        assert_eq!(pending, vec![&keys[1]]);
    }
}
