use async_trait::async_trait;
use grid_core::{
    BenchConfig, LatencyMetrics, ModelProfile, RequestRate, ThroughputMetrics, Utilization,
};
use grid_runtime::{
    BenchClient, LatencyRequest, LaunchSpec, Readiness, RuntimeError, ServerControl,
    ThroughputRequest,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Two-model configuration rooted in a temporary directory
pub(crate) fn test_config(dir: &Path) -> BenchConfig {
    let mut config = BenchConfig::default();
    config.results_dir = dir.join("results");
    config.server.cache_dir = Some(dir.join("cache"));
    config.sweep.tp = vec![1, 2];
    config.sweep.request_rates = vec![
        RequestRate::new(1.0).unwrap(),
        RequestRate::new(4.0).unwrap(),
    ];
    config.sweep.capacity_utils = vec![
        Utilization::new(0.9).unwrap(),
        Utilization::new(0.95).unwrap(),
    ];
    config.sweep.concurrency_levels = vec![1, 4];

    let mut a = ModelProfile::fallback("org/a");
    a.max_model_len = 32768;
    let mut b = ModelProfile::fallback("org/b");
    b.valid_tp = vec![1, 2];
    b.gpu_util = Some(Utilization::new(0.9).unwrap());
    config.models = vec![a, b];
    config
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    Start(String, u32, Utilization),
    Stop,
    Purge,
}

/// Server that never spawns anything; readiness outcomes are scripted
pub(crate) struct MockServer {
    events: Arc<Mutex<Vec<Event>>>,
    readiness: VecDeque<Readiness>,
    log: Option<String>,
}

impl MockServer {
    pub(crate) fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            readiness: VecDeque::new(),
            log: None,
        }
    }

    /// Outcomes returned by successive readiness waits; `Ready` once exhausted
    pub(crate) fn with_readiness(mut self, outcomes: Vec<Readiness>) -> Self {
        self.readiness = outcomes.into();
        self
    }

    pub(crate) fn with_log(mut self, log: &str) -> Self {
        self.log = Some(log.to_string());
        self
    }

    pub(crate) fn events(&self) -> Arc<Mutex<Vec<Event>>> {
        self.events.clone()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl ServerControl for MockServer {
    async fn start(&mut self, spec: &LaunchSpec) -> grid_runtime::Result<()> {
        self.push(Event::Start(spec.model.clone(), spec.tp, spec.util));
        Ok(())
    }

    async fn await_ready(&mut self) -> Readiness {
        self.readiness.pop_front().unwrap_or(Readiness::Ready)
    }

    async fn stop(&mut self) {
        self.push(Event::Stop);
    }

    async fn purge_cache(&mut self) -> grid_runtime::Result<()> {
        self.push(Event::Purge);
        Ok(())
    }

    fn base_url(&self) -> String {
        "http://127.0.0.1:8000".to_string()
    }

    fn server_log(&self) -> Option<String> {
        self.log.clone()
    }
}

/// Benchmark client returning fixed metrics
pub(crate) struct MockClient {
    throughput_calls: AtomicU32,
    latency_calls: AtomicU32,
    fail_throughput: bool,
    fail_latency_at: Option<f64>,
    verify_limit: Option<u32>,
    broken_verify: bool,
    verify_targets: Mutex<Vec<u32>>,
}

impl MockClient {
    pub(crate) fn new() -> Self {
        Self {
            throughput_calls: AtomicU32::new(0),
            latency_calls: AtomicU32::new(0),
            fail_throughput: false,
            fail_latency_at: None,
            verify_limit: None,
            broken_verify: false,
            verify_targets: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing_throughput(mut self) -> Self {
        self.fail_throughput = true;
        self
    }

    pub(crate) fn failing_latency_at(mut self, rate: f64) -> Self {
        self.fail_latency_at = Some(rate);
        self
    }

    /// Completions longer than `limit` tokens are rejected
    pub(crate) fn with_verify_limit(mut self, limit: u32) -> Self {
        self.verify_limit = Some(limit);
        self
    }

    /// Verification fails with an error that shrinking cannot fix
    pub(crate) fn with_broken_verify(mut self) -> Self {
        self.broken_verify = true;
        self
    }

    pub(crate) fn throughput_calls(&self) -> u32 {
        self.throughput_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn latency_calls(&self) -> u32 {
        self.latency_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn verify_targets(&self) -> Vec<u32> {
        self.verify_targets.lock().unwrap().clone()
    }
}

#[async_trait]
impl BenchClient for MockClient {
    async fn run_throughput(
        &self,
        _request: &ThroughputRequest,
    ) -> grid_runtime::Result<ThroughputMetrics> {
        self.throughput_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_throughput {
            return Err(RuntimeError::Benchmark(
                "bench throughput failed (exit code 1): CUDA out of memory".to_string(),
            ));
        }
        Ok(ThroughputMetrics {
            tokens_per_second: 1500.0,
        })
    }

    async fn run_latency(&self, request: &LatencyRequest) -> grid_runtime::Result<LatencyMetrics> {
        self.latency_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_latency_at == Some(request.rate.per_second()) {
            return Err(RuntimeError::Benchmark(
                "bench serve failed (exit code 1): connection reset".to_string(),
            ));
        }
        Ok(LatencyMetrics {
            mean_ttft_ms: 40.0,
            mean_tpot_ms: 9.5,
        })
    }

    async fn verify_context(
        &self,
        _base_url: &str,
        _model: &str,
        target: u32,
    ) -> grid_runtime::Result<u32> {
        self.verify_targets.lock().unwrap().push(target);
        if self.broken_verify {
            return Err(RuntimeError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "prompt file unreadable",
            )));
        }
        match self.verify_limit {
            Some(limit) if target > limit => Err(RuntimeError::InvalidResponse(format!(
                "completion of {} tokens rejected (400 Bad Request)",
                target
            ))),
            _ => Ok(target),
        }
    }
}
