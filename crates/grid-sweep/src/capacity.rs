//! Capacity sweep: context-limit discovery per utilization and concurrency level

use crate::executor::SweepExecutor;
use crate::SweepStats;
use grid_core::{CapacityMetrics, ModelProfile, ProbeConfig, ProbeMetrics, ProbeResult};
use grid_runtime::parse::{last_error_line, parse_kv_cache_tokens};
use grid_runtime::{BenchClient, LaunchSpec, ServerControl};
use tracing::{info, warn};

impl<S: ServerControl, C: BenchClient> SweepExecutor<S, C> {
    /// One server launch per (TP, model, utilization, concurrency level) point
    pub async fn run_capacity(&mut self, accelerators: u32) -> SweepStats {
        self.stats = SweepStats::default();
        let Some(degrees) = self.degrees(accelerators) else {
            return self.stats;
        };

        self.server.stop().await;
        let profiles: Vec<ModelProfile> = self.catalog.iter().cloned().collect();
        let utils = self.sweep.capacity_utils.clone();
        let levels = self.sweep.concurrency_levels.clone();

        for tp in degrees {
            for profile in profiles.iter().filter(|p| p.supports_tp(tp)) {
                for &util in &utils {
                    for &level in &levels {
                        let probe = ProbeConfig::capacity(profile, tp, util, level);
                        if self.cache.should_skip(&probe.key).await {
                            info!("SKIP {}", probe.key);
                            self.stats.probes_skipped += 1;
                            continue;
                        }

                        info!("START {}", probe.key);
                        self.prepare(profile, tp).await;
                        let launch = LaunchSpec::for_probe(profile, &probe, &self.dtype);
                        let result = match self.launch(&launch).await {
                            Err(message) => {
                                ProbeResult::failure(probe, profile.max_model_len, message)
                            }
                            Ok(()) => {
                                let result = self.measure_capacity(profile, probe).await;
                                self.server.stop().await;
                                result
                            }
                        };
                        self.record(result).await;
                    }
                }
            }
        }
        self.server.stop().await;

        info!("Capacity sweep finished: {}", self.stats);
        self.stats
    }

    /// Read the KV-cache capacity from the server log, then confirm a single request at
    /// `min(configured, capacity)`, shrinking the candidate after each rejection.
    async fn measure_capacity(&mut self, profile: &ModelProfile, probe: ProbeConfig) -> ProbeResult {
        let configured = profile.max_model_len;
        let capacity = match self.server.server_log().as_deref().and_then(parse_kv_cache_tokens) {
            Some(0) => {
                return ProbeResult::failure(probe, configured, "server reported an empty KV cache")
            }
            Some(tokens) => tokens,
            None => {
                warn!(
                    "No KV cache size in server log for {}, assuming configured length {}",
                    probe.key, configured
                );
                configured
            }
        };

        let bound = configured.min(capacity);
        let base_url = self.server.base_url();
        let verify = self.sweep.verify.clone();
        let mut candidate = bound;
        let mut attempts = 0;
        let mut last_error = String::new();

        while attempts < verify.max_attempts {
            attempts += 1;
            match self
                .client
                .verify_context(&base_url, &profile.id, candidate)
                .await
            {
                Ok(tokens) if tokens > 0 => {
                    let verified = tokens.min(bound);
                    info!(
                        "Verified {} tokens for {} (target {}, capacity {})",
                        verified, probe.key, configured, capacity
                    );
                    return ProbeResult::success(
                        probe,
                        configured,
                        ProbeMetrics::Capacity(CapacityMetrics {
                            real_capacity: capacity,
                            verified_len: verified,
                        }),
                    );
                }
                Ok(_) => last_error = "completion reported no tokens".to_string(),
                Err(e) => {
                    warn!(
                        "Attempt {}/{} at {} tokens failed: {}",
                        attempts, verify.max_attempts, candidate, e
                    );
                    last_error = e.to_string();
                    if !e.is_retryable() {
                        break;
                    }
                }
            }

            let next = (f64::from(candidate) * verify.shrink_ratio).floor() as u32;
            if next == 0 || next >= candidate {
                break;
            }
            candidate = next;
        }

        let mut message = format!(
            "no context length verified after {} attempt(s): {}",
            attempts, last_error
        );
        if let Some(line) = self.server.server_log().as_deref().and_then(last_error_line) {
            message.push_str("; server: ");
            message.push_str(&line);
        }
        ProbeResult::failure(probe, configured, message)
    }
}
