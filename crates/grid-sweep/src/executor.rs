//! Sweep executor

use crate::SweepStats;
use grid_core::{
    BenchConfig, ConfigCatalog, ModelProfile, ProbeConfig, ProbeKey, ProbeKind, ProbeMetrics,
    ProbeResult, SweepConfig,
};
use grid_runtime::parse::last_error_line;
use grid_runtime::{
    BenchClient, LatencyRequest, LaunchSpec, Readiness, ServerControl, ThroughputRequest, Workload,
};
use grid_store::{ResultStore, RunCache};
use tracing::{debug, error, info, warn};

/// Tensor-parallel degrees to sweep: ascending, deduplicated, and no larger than the number
/// of accelerators present.
pub fn eligible_degrees(requested: &[u32], accelerators: u32) -> Vec<u32> {
    let mut degrees: Vec<u32> = requested
        .iter()
        .copied()
        .filter(|&tp| tp > 0 && tp <= accelerators)
        .collect();
    degrees.sort_unstable();
    degrees.dedup();
    degrees
}

/// Prompt source for a sweep: the configured dataset when it exists, random prompts otherwise
pub fn resolve_workload(sweep: &SweepConfig) -> Workload {
    match &sweep.dataset_path {
        Some(path) if path.is_file() => Workload::ShareGpt(path.clone()),
        Some(path) => {
            warn!(
                "Dataset {} not found, using random prompts",
                path.display()
            );
            Workload::Random {
                input_len: sweep.random_input_len,
                output_len: sweep.random_output_len,
            }
        }
        None => Workload::Random {
            input_len: sweep.random_input_len,
            output_len: sweep.random_output_len,
        },
    }
}

/// Drives probes against one server at a time
pub struct SweepExecutor<S, C> {
    pub(crate) sweep: SweepConfig,
    pub(crate) dtype: String,
    pub(crate) startup_timeout_secs: u64,
    pub(crate) catalog: ConfigCatalog,
    pub(crate) server: S,
    pub(crate) client: C,
    pub(crate) store: ResultStore,
    pub(crate) cache: RunCache,
    pub(crate) workload: Workload,
    pub(crate) stats: SweepStats,
    last_launch: Option<(String, u32)>,
}

impl<S: ServerControl, C: BenchClient> SweepExecutor<S, C> {
    /// Create an executor for `catalog`, recording into `store`
    pub fn new(
        config: &BenchConfig,
        catalog: ConfigCatalog,
        server: S,
        client: C,
        store: ResultStore,
    ) -> Self {
        let cache = RunCache::new(store.clone(), config.sweep.retry_failed);
        Self {
            sweep: config.sweep.clone(),
            dtype: config.server.dtype.clone(),
            startup_timeout_secs: config.server.startup_timeout_secs,
            workload: resolve_workload(&config.sweep),
            catalog,
            server,
            client,
            store,
            cache,
            stats: SweepStats::default(),
            last_launch: None,
        }
    }

    pub fn server(&self) -> &S {
        &self.server
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn stats(&self) -> SweepStats {
        self.stats
    }

    /// Throughput then latency probes for every model at every eligible degree
    pub async fn run_performance(&mut self, accelerators: u32) -> SweepStats {
        self.stats = SweepStats::default();
        let Some(degrees) = self.degrees(accelerators) else {
            return self.stats;
        };

        self.server.stop().await;
        let profiles: Vec<ModelProfile> = self.catalog.iter().cloned().collect();
        for tp in degrees {
            for profile in &profiles {
                if !profile.supports_tp(tp) {
                    debug!("{} does not run at tp={}", profile.id, tp);
                    continue;
                }
                self.run_throughput(profile, tp).await;
                self.run_latency_sweep(profile, tp).await;
            }
        }
        self.server.stop().await;

        info!("Performance sweep finished: {}", self.stats);
        self.stats
    }

    pub(crate) fn degrees(&self, accelerators: u32) -> Option<Vec<u32>> {
        let degrees = eligible_degrees(&self.sweep.tp, accelerators);
        if degrees.is_empty() {
            info!(
                "Requested TP={:?} but only {} accelerator(s) detected. Nothing to run.",
                self.sweep.tp, accelerators
            );
            return None;
        }
        Some(degrees)
    }

    async fn run_throughput(&mut self, profile: &ModelProfile, tp: u32) {
        let probe = ProbeConfig::throughput(profile, tp, self.sweep.gpu_util);
        if self.cache.should_skip(&probe.key).await {
            info!("SKIP {}", probe.key);
            self.stats.probes_skipped += 1;
            return;
        }

        info!(
            "START {} [batch tokens: {}]",
            probe.key, profile.max_batched_tokens
        );
        self.prepare(profile, tp).await;

        let request = ThroughputRequest {
            launch: LaunchSpec::for_probe(profile, &probe, &self.dtype),
            num_prompts: self.sweep.offline_prompts,
            max_batched_tokens: profile.max_batched_tokens,
            output_len: self.sweep.output_len,
            workload: self.workload.clone(),
            report_path: self.store.scratch_path_for(&probe.key),
        };

        let result = match self.client.run_throughput(&request).await {
            Ok(metrics) => ProbeResult::success(
                probe,
                profile.max_model_len,
                ProbeMetrics::Throughput(metrics),
            ),
            Err(e) => ProbeResult::failure(probe, profile.max_model_len, e.to_string()),
        };
        self.record(result).await;
    }

    async fn run_latency_sweep(&mut self, profile: &ModelProfile, tp: u32) {
        let probes: Vec<ProbeConfig> = self
            .sweep
            .sorted_rates()
            .into_iter()
            .map(|rate| ProbeConfig::latency(profile, tp, self.sweep.gpu_util, rate))
            .collect();
        let keys: Vec<ProbeKey> = probes.iter().map(|probe| probe.key.clone()).collect();
        let to_run = self.cache.pending(&keys).await;
        self.stats.probes_skipped += (keys.len() - to_run.len()) as u32;
        let pending: Vec<ProbeConfig> = probes
            .into_iter()
            .filter(|probe| to_run.contains(&&probe.key))
            .collect();

        let Some(first) = pending.first() else {
            info!(
                "SKIP latency sweep for {} (tp={}): all rates on disk",
                profile.id, tp
            );
            return;
        };

        self.prepare(profile, tp).await;
        let launch = LaunchSpec::for_probe(profile, first, &self.dtype);
        if let Err(message) = self.launch(&launch).await {
            for probe in pending {
                self.record(ProbeResult::failure(probe, profile.max_model_len, &message))
                    .await;
            }
            return;
        }

        for probe in pending {
            let rate = match probe.kind() {
                ProbeKind::Latency { rate } => rate,
                _ => continue,
            };
            info!("BENCH {} at {} req/s", profile.id, rate);
            let request = LatencyRequest {
                model: profile.id.clone(),
                base_url: self.server.base_url(),
                rate,
                num_prompts: rate.prompt_count(
                    self.sweep.serve_duration_secs,
                    self.sweep.min_prompts,
                ),
                workload: self.workload.clone(),
                env: profile.env.clone(),
            };

            let result = match self.client.run_latency(&request).await {
                Ok(metrics) => ProbeResult::success(
                    probe,
                    profile.max_model_len,
                    ProbeMetrics::Latency(metrics),
                ),
                Err(e) => ProbeResult::failure(probe, profile.max_model_len, e.to_string()),
            };
            self.record(result).await;
        }

        self.server.stop().await;
    }

    /// Stop whatever runs and purge the compile cache when the model or degree changed
    pub(crate) async fn prepare(&mut self, profile: &ModelProfile, tp: u32) {
        self.server.stop().await;

        let launch = (profile.id.clone(), tp);
        if self.last_launch.as_ref() != Some(&launch) {
            if let Err(e) = self.server.purge_cache().await {
                warn!("Failed to purge compile cache: {}", e);
            }
            self.last_launch = Some(launch);
        }
    }

    /// Start a server and wait for it. On failure the server is stopped and the returned
    /// diagnostic is what gets recorded.
    pub(crate) async fn launch(&mut self, spec: &LaunchSpec) -> std::result::Result<(), String> {
        self.stats.server_starts += 1;
        if let Err(e) = self.server.start(spec).await {
            return Err(e.to_string());
        }

        let message = match self.server.await_ready().await {
            Readiness::Ready => return Ok(()),
            Readiness::Died { code } => {
                let mut message = match code {
                    Some(code) => format!(
                        "server process exited during startup (exit code {})",
                        code
                    ),
                    None => "server process exited during startup".to_string(),
                };
                if let Some(line) = self.server.server_log().as_deref().and_then(last_error_line)
                {
                    message.push_str(": ");
                    message.push_str(&line);
                }
                message
            }
            Readiness::TimedOut => format!(
                "server did not become ready within {}s",
                self.startup_timeout_secs
            ),
        };

        self.server.stop().await;
        Err(message)
    }

    /// Persist a result. Write failures are logged and never abort the sweep.
    pub(crate) async fn record(&mut self, result: ProbeResult) {
        self.stats.probes_run += 1;
        match result.error() {
            None => info!("DONE {}", result.key()),
            Some(message) => {
                self.stats.probes_failed += 1;
                warn!("FAILED {}: {}", result.key(), message);
            }
        }

        if let Err(e) = self.store.write(&result).await {
            error!("Failed to record {}: {}", result.key(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{test_config, Event, MockClient, MockServer};
    use grid_core::{RequestRate, ThroughputMetrics, Utilization};

    async fn executor(
        dir: &std::path::Path,
        server: MockServer,
        client: MockClient,
    ) -> SweepExecutor<MockServer, MockClient> {
        let config = test_config(dir);
        let catalog = config.catalog().unwrap();
        let store = ResultStore::open(&config.results_dir).await.unwrap();
        SweepExecutor::new(&config, catalog, server, client, store)
    }

    fn rate(v: f64) -> RequestRate {
        RequestRate::new(v).unwrap()
    }

    #[test]
    fn test_eligible_degrees() {
        assert_eq!(eligible_degrees(&[2, 1, 2], 2), vec![1, 2]);
        assert_eq!(eligible_degrees(&[1, 2, 4], 2), vec![1, 2]);
        assert!(eligible_degrees(&[2], 1).is_empty());
        assert!(eligible_degrees(&[0], 8).is_empty());
    }

    #[test]
    fn test_missing_dataset_falls_back_to_random() {
        let mut sweep = SweepConfig::default();
        sweep.dataset_path = Some("/nonexistent/sharegpt.json".into());
        assert!(matches!(resolve_workload(&sweep), Workload::Random { .. }));
    }

    #[tokio::test]
    async fn test_second_run_starts_no_server() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::new();
        let events = server.events();

        let mut first = executor(dir.path(), server, MockClient::new()).await;
        let stats = first.run_performance(2).await;
        // Two models at tp=1: one latency server each; org/b also runs at tp=2
        assert_eq!(stats.server_starts, 3);
        assert_eq!(stats.probes_run, 9);
        assert_eq!(stats.probes_failed, 0);

        let server = MockServer::new();
        let second_events = server.events();
        let mut second = executor(dir.path(), server, MockClient::new()).await;
        let stats = second.run_performance(2).await;
        assert_eq!(stats.server_starts, 0);
        assert_eq!(stats.probes_run, 0);
        assert_eq!(stats.probes_skipped, 9);
        assert_eq!(second.client().throughput_calls(), 0);
        assert!(!second_events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, Event::Start(..))));
        assert!(!events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_startup_death_recorded_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::new()
            .with_readiness(vec![Readiness::Died { code: Some(1) }])
            .with_log("INFO loading\ntorch.OutOfMemoryError: CUDA out of memory\n");

        let mut executor = executor(dir.path(), server, MockClient::new()).await;
        let stats = executor.run_performance(1).await;

        // org/a dies once; org/b comes up normally
        assert_eq!(stats.server_starts, 2);
        assert_eq!(stats.probes_failed, 2);

        for r in [1.0, 4.0] {
            let key = ProbeKey::new("org/a", 1, ProbeKind::Latency { rate: rate(r) });
            let result = executor.store.load(&key).await.unwrap().unwrap();
            let message = result.error().unwrap();
            assert!(message.starts_with("server process exited during startup (exit code 1)"));
            assert!(message.contains("CUDA out of memory"));
        }

        let key = ProbeKey::new("org/b", 1, ProbeKind::Latency { rate: rate(4.0) });
        assert!(executor.store.load(&key).await.unwrap().unwrap().is_success());
    }

    #[tokio::test]
    async fn test_existing_throughput_result_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut executor = executor(dir.path(), MockServer::new(), MockClient::new()).await;

        let profile = executor.catalog.require("org/a").unwrap().clone();
        let probe = ProbeConfig::throughput(&profile, 1, executor.sweep.gpu_util);
        executor
            .store
            .write(&ProbeResult::success(
                probe.clone(),
                profile.max_model_len,
                ProbeMetrics::Throughput(ThroughputMetrics {
                    tokens_per_second: 42.0,
                }),
            ))
            .await
            .unwrap();

        let stats = executor.run_performance(1).await;
        assert_eq!(stats.probes_skipped, 1);
        // Only org/b's throughput ran
        assert_eq!(executor.client().throughput_calls(), 1);
        let kept = executor.store.load(&probe.key).await.unwrap().unwrap();
        assert_eq!(kept.throughput().unwrap().tokens_per_second, 42.0);
    }

    #[tokio::test]
    async fn test_corrupt_artifact_is_rerun_and_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let mut executor = executor(dir.path(), MockServer::new(), MockClient::new()).await;

        let key = ProbeKey::new("org/a", 1, ProbeKind::Throughput);
        std::fs::write(executor.store.path_for(&key), b"{ truncated").unwrap();

        executor.run_performance(1).await;
        assert_eq!(executor.client().throughput_calls(), 2);
        let result = executor.store.load(&key).await.unwrap().unwrap();
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn test_no_eligible_degree_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.sweep.tp = vec![2];
        let store = ResultStore::open(&config.results_dir).await.unwrap();
        let server = MockServer::new();
        let events = server.events();
        let mut executor =
            SweepExecutor::new(&config, config.catalog().unwrap(), server, MockClient::new(), store);

        let stats = executor.run_performance(1).await;
        assert!(stats.is_noop());
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_later_rate_failure_keeps_earlier_rates() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new().failing_latency_at(4.0);
        let mut executor = executor(dir.path(), MockServer::new(), client).await;
        executor.run_performance(1).await;

        let ok = ProbeKey::new("org/a", 1, ProbeKind::Latency { rate: rate(1.0) });
        let failed = ProbeKey::new("org/a", 1, ProbeKind::Latency { rate: rate(4.0) });
        assert!(executor.store.load(&ok).await.unwrap().unwrap().is_success());
        assert!(!executor.store.load(&failed).await.unwrap().unwrap().is_success());
    }

    #[tokio::test]
    async fn test_stop_precedes_start_and_cache_purged_per_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::new();
        let events = server.events();
        let mut executor = executor(dir.path(), server, MockClient::new()).await;
        executor.run_performance(2).await;

        let events = events.lock().unwrap();
        let mut running = false;
        for event in events.iter() {
            match event {
                Event::Start(..) => {
                    assert!(!running, "start issued while a server was running");
                    running = true;
                }
                Event::Stop => running = false,
                Event::Purge => assert!(!running, "cache purged under a live server"),
            }
        }
        assert!(!running);

        // (org/a, 1), (org/b, 1), (org/b, 2)
        let purges = events.iter().filter(|e| matches!(e, Event::Purge)).count();
        assert_eq!(purges, 3);
    }

    #[tokio::test]
    async fn test_model_utilization_override_reaches_launch() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::new();
        let events = server.events();
        let mut executor = executor(dir.path(), server, MockClient::new()).await;
        executor.run_performance(1).await;

        let events = events.lock().unwrap();
        let launched: Vec<(String, Utilization)> = events
            .iter()
            .filter_map(|e| match e {
                Event::Start(model, _, util) => Some((model.clone(), *util)),
                _ => None,
            })
            .collect();
        assert_eq!(
            launched,
            vec![
                ("org/a".to_string(), Utilization::new(0.98).unwrap()),
                ("org/b".to_string(), Utilization::new(0.9).unwrap()),
            ]
        );
    }

    #[tokio::test]
    async fn test_throughput_failure_recorded_and_sweep_continues() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new().failing_throughput();
        let mut executor = executor(dir.path(), MockServer::new(), client).await;
        let stats = executor.run_performance(1).await;

        assert_eq!(stats.probes_failed, 2);
        assert_eq!(executor.client().throughput_calls(), 2);
        assert_eq!(executor.client().latency_calls(), 4);

        for model in ["org/a", "org/b"] {
            let key = ProbeKey::new(model, 1, ProbeKind::Throughput);
            let result = executor.store.load(&key).await.unwrap().unwrap();
            assert!(result.error().unwrap().contains("bench throughput failed"));

            let key = ProbeKey::new(model, 1, ProbeKind::Latency { rate: rate(1.0) });
            assert!(executor.store.load(&key).await.unwrap().unwrap().is_success());
        }
    }

    #[tokio::test]
    async fn test_startup_timeout_fails_pending_rates_and_stops_server() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::new().with_readiness(vec![Readiness::TimedOut]);
        let events = server.events();
        let mut executor = executor(dir.path(), server, MockClient::new()).await;
        let stats = executor.run_performance(1).await;

        assert_eq!(stats.server_starts, 2);
        assert_eq!(stats.probes_failed, 2);
        // Only org/b's server came up
        assert_eq!(executor.client().latency_calls(), 2);

        let expected = format!(
            "server did not become ready within {}s",
            executor.startup_timeout_secs
        );
        for r in [1.0, 4.0] {
            let key = ProbeKey::new("org/a", 1, ProbeKind::Latency { rate: rate(r) });
            let result = executor.store.load(&key).await.unwrap().unwrap();
            assert_eq!(result.error(), Some(expected.as_str()));
        }

        let events = events.lock().unwrap();
        let starts: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, Event::Start(..)))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(starts.len(), 2);
        assert!(events[starts[0]..starts[1]]
            .iter()
            .any(|e| matches!(e, Event::Stop)));
    }
}
