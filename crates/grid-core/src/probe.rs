//! Probe identity and outcome types
//!
//! A probe is one measurement against the server under test. [`ProbeKey`] is its identity
//! (used for idempotency and storage lookups), [`ProbeConfig`] adds the launch settings the
//! probe ran with, and [`ProbeResult`] is the immutable outcome recorded afterwards.

use crate::catalog::ModelProfile;
use crate::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Fraction of device memory the server may reserve, in (0, 1]
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(transparent)]
pub struct Utilization(f64);

impl Utilization {
    /// Create a utilization target, rejecting values outside (0, 1]
    pub fn new(value: f64) -> Result<Self> {
        if value.is_finite() && value > 0.0 && value <= 1.0 {
            Ok(Self(value))
        } else {
            Err(CoreError::invalid_value(format!(
                "utilization must be in (0, 1], got {}",
                value
            )))
        }
    }

    /// Known-good literal; only for built-in defaults
    pub(crate) const fn from_literal(value: f64) -> Self {
        Self(value)
    }

    /// Raw fraction
    pub fn value(self) -> f64 {
        self.0
    }

    /// Shortest exact rendering, used inside storage keys
    pub fn file_token(self) -> String {
        format!("{}", self.0)
    }
}

impl PartialEq for Utilization {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for Utilization {}

impl Hash for Utilization {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl PartialOrd for Utilization {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Utilization {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for Utilization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Utilization {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let value = s
            .trim()
            .parse::<f64>()
            .map_err(|e| CoreError::invalid_value(format!("utilization '{}': {}", s, e)))?;
        Self::new(value)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
}

impl NumberOrText {
    fn into_f64<E: serde::de::Error>(self) -> std::result::Result<f64, E> {
        match self {
            NumberOrText::Number(v) => Ok(v),
            NumberOrText::Text(s) => s.trim().parse::<f64>().map_err(E::custom),
        }
    }
}

// Older result files store the utilization as a string ("0.95"), newer ones as a number.
impl<'de> Deserialize<'de> for Utilization {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = NumberOrText::deserialize(deserializer)?.into_f64()?;
        Utilization::new(value).map_err(D::Error::custom)
    }
}

/// Request arrival rate for latency probes, in requests per second
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(transparent)]
pub struct RequestRate(f64);

impl RequestRate {
    /// Create a request rate, rejecting non-positive or non-finite values
    pub fn new(value: f64) -> Result<Self> {
        if value.is_finite() && value > 0.0 {
            Ok(Self(value))
        } else {
            Err(CoreError::invalid_value(format!(
                "request rate must be positive, got {}",
                value
            )))
        }
    }

    pub(crate) const fn from_literal(value: f64) -> Self {
        Self(value)
    }

    /// Requests per second
    pub fn per_second(self) -> f64 {
        self.0
    }

    /// Number of prompts a serve run issues at this rate: `max(minimum, duration * rate)`
    pub fn prompt_count(self, duration_secs: u64, minimum: u32) -> u32 {
        let scaled = (duration_secs as f64 * self.0).floor();
        let scaled = if scaled >= u32::MAX as f64 { u32::MAX } else { scaled as u32 };
        scaled.max(minimum)
    }
}

impl PartialEq for RequestRate {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for RequestRate {}

impl Hash for RequestRate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl PartialOrd for RequestRate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RequestRate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for RequestRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Always keep a fractional part: 1.0, 4.0, 0.5
        write!(f, "{:?}", self.0)
    }
}

impl<'de> Deserialize<'de> for RequestRate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = NumberOrText::deserialize(deserializer)?.into_f64()?;
        RequestRate::new(value).map_err(D::Error::custom)
    }
}

/// What a probe measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeKind {
    /// Offline batch run; tokens per second
    Throughput,
    /// Online serving run at a fixed request rate; TTFT/TPOT
    Latency { rate: RequestRate },
    /// Context-limit discovery at a utilization and concurrency ceiling
    Capacity { util: Utilization, max_seqs: u32 },
}

impl ProbeKind {
    /// Short label used in logs and file names
    pub fn label(&self) -> &'static str {
        match self {
            ProbeKind::Throughput => "throughput",
            ProbeKind::Latency { .. } => "latency",
            ProbeKind::Capacity { .. } => "capacity",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeKind::Throughput => write!(f, "throughput"),
            ProbeKind::Latency { rate } => write!(f, "latency@{}qps", rate),
            ProbeKind::Capacity { util, max_seqs } => {
                write!(f, "capacity util={} seqs={}", util, max_seqs)
            }
        }
    }
}

/// Identity of a probe
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeKey {
    pub model: String,
    pub tp: u32,
    pub kind: ProbeKind,
}

impl ProbeKey {
    pub fn new(model: impl Into<String>, tp: u32, kind: ProbeKind) -> Self {
        Self {
            model: model.into(),
            tp,
            kind,
        }
    }
}

impl fmt::Display for ProbeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} tp={} {}", self.model, self.tp, self.kind)
    }
}

/// A probe identity together with the launch settings it runs under
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub key: ProbeKey,
    /// Memory-utilization target passed to the server
    pub util: Utilization,
    /// Concurrency ceiling passed to the server
    pub max_seqs: u32,
}

impl ProbeConfig {
    /// Offline throughput probe using the profile's own utilization and sequence ceiling
    pub fn throughput(profile: &ModelProfile, tp: u32, default_util: Utilization) -> Self {
        Self {
            key: ProbeKey::new(&profile.id, tp, ProbeKind::Throughput),
            util: profile.effective_util(default_util),
            max_seqs: profile.max_num_seqs,
        }
    }

    /// Online latency probe at `rate`
    pub fn latency(
        profile: &ModelProfile,
        tp: u32,
        default_util: Utilization,
        rate: RequestRate,
    ) -> Self {
        Self {
            key: ProbeKey::new(&profile.id, tp, ProbeKind::Latency { rate }),
            util: profile.effective_util(default_util),
            max_seqs: profile.max_num_seqs,
        }
    }

    /// Capacity probe at an explicit utilization and concurrency level
    pub fn capacity(profile: &ModelProfile, tp: u32, util: Utilization, max_seqs: u32) -> Self {
        Self {
            key: ProbeKey::new(&profile.id, tp, ProbeKind::Capacity { util, max_seqs }),
            util,
            max_seqs,
        }
    }

    pub fn model(&self) -> &str {
        &self.key.model
    }

    pub fn tp(&self) -> u32 {
        self.key.tp
    }

    pub fn kind(&self) -> ProbeKind {
        self.key.kind
    }
}

/// Offline throughput metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputMetrics {
    pub tokens_per_second: f64,
}

/// Online serving latency metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyMetrics {
    pub mean_ttft_ms: f64,
    pub mean_tpot_ms: f64,
}

/// Context-limit metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityMetrics {
    /// KV-cache capacity the server reported, in tokens
    pub real_capacity: u32,
    /// Largest single-request length confirmed to complete
    pub verified_len: u32,
}

/// Measured values for a successful probe
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "metrics", rename_all = "snake_case")]
pub enum ProbeMetrics {
    Throughput(ThroughputMetrics),
    Latency(LatencyMetrics),
    Capacity(CapacityMetrics),
}

impl ProbeMetrics {
    fn matches(&self, kind: &ProbeKind) -> bool {
        matches!(
            (self, kind),
            (ProbeMetrics::Throughput(_), ProbeKind::Throughput)
                | (ProbeMetrics::Latency(_), ProbeKind::Latency { .. })
                | (ProbeMetrics::Capacity(_), ProbeKind::Capacity { .. })
        )
    }
}

/// Success or failure of a probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Success(ProbeMetrics),
    Error { message: String },
}

/// Recorded outcome of one probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub config: ProbeConfig,
    /// Maximum model length the server was launched with
    pub configured_len: u32,
    pub outcome: ProbeOutcome,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl ProbeResult {
    /// Build a successful result
    pub fn success(config: ProbeConfig, configured_len: u32, metrics: ProbeMetrics) -> Self {
        Self {
            config,
            configured_len,
            outcome: ProbeOutcome::Success(metrics),
            recorded_at: Some(Utc::now()),
        }
    }

    /// Build a failed result carrying a diagnostic
    pub fn failure(config: ProbeConfig, configured_len: u32, message: impl Into<String>) -> Self {
        Self {
            config,
            configured_len,
            outcome: ProbeOutcome::Error {
                message: message.into(),
            },
            recorded_at: Some(Utc::now()),
        }
    }

    pub fn key(&self) -> &ProbeKey {
        &self.config.key
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ProbeOutcome::Success(_))
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            ProbeOutcome::Error { message } => Some(message),
            ProbeOutcome::Success(_) => None,
        }
    }

    pub fn metrics(&self) -> Option<&ProbeMetrics> {
        match &self.outcome {
            ProbeOutcome::Success(metrics) => Some(metrics),
            ProbeOutcome::Error { .. } => None,
        }
    }

    pub fn capacity(&self) -> Option<&CapacityMetrics> {
        match self.metrics() {
            Some(ProbeMetrics::Capacity(c)) => Some(c),
            _ => None,
        }
    }

    pub fn throughput(&self) -> Option<&ThroughputMetrics> {
        match self.metrics() {
            Some(ProbeMetrics::Throughput(t)) => Some(t),
            _ => None,
        }
    }

    pub fn latency(&self) -> Option<&LatencyMetrics> {
        match self.metrics() {
            Some(ProbeMetrics::Latency(l)) => Some(l),
            _ => None,
        }
    }

    /// Verified context length of a successful capacity probe
    pub fn verified_len(&self) -> Option<u32> {
        self.capacity().map(|c| c.verified_len)
    }

    /// Check the structural invariants of a recorded result
    pub fn validate(&self) -> Result<()> {
        if self.config.key.model.is_empty() {
            return Err(CoreError::invariant("model id is empty"));
        }
        if self.config.key.tp == 0 {
            return Err(CoreError::invariant("tensor-parallel degree must be positive"));
        }
        if self.config.max_seqs == 0 {
            return Err(CoreError::invariant("max_seqs must be positive"));
        }
        if let ProbeKind::Capacity { util, max_seqs } = self.config.key.kind {
            if util != self.config.util || max_seqs != self.config.max_seqs {
                return Err(CoreError::invariant(
                    "capacity key disagrees with launch settings",
                ));
            }
        }

        let metrics = match &self.outcome {
            ProbeOutcome::Error { .. } => return Ok(()),
            ProbeOutcome::Success(metrics) => metrics,
        };

        if !metrics.matches(&self.config.key.kind) {
            return Err(CoreError::invariant(format!(
                "{} probe carries mismatched metrics",
                self.config.key.kind.label()
            )));
        }

        match metrics {
            ProbeMetrics::Throughput(t) => {
                if !t.tokens_per_second.is_finite() || t.tokens_per_second < 0.0 {
                    return Err(CoreError::invariant("tokens_per_second must be non-negative"));
                }
            }
            ProbeMetrics::Latency(l) => {
                let ok = |v: f64| v.is_finite() && v >= 0.0;
                if !ok(l.mean_ttft_ms) || !ok(l.mean_tpot_ms) {
                    return Err(CoreError::invariant("latency values must be non-negative"));
                }
            }
            ProbeMetrics::Capacity(c) => {
                // Zero is a legacy marker for "nothing verified"; it still satisfies the bound
                let bound = self.configured_len.min(c.real_capacity);
                if c.verified_len > bound {
                    return Err(CoreError::invariant(format!(
                        "verified length {} exceeds min(target {}, capacity {})",
                        c.verified_len, self.configured_len, c.real_capacity
                    )));
                }
            }
        }

        Ok(())
    }
}
