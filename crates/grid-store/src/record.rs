//! On-disk probe record schema

use crate::{Result, StoreError};
use chrono::{DateTime, Utc};
use grid_core::{
    CapacityMetrics, LatencyMetrics, ProbeConfig, ProbeKey, ProbeKind, ProbeMetrics, ProbeOutcome,
    ProbeResult, RequestRate, ThroughputMetrics, Utilization,
};
use serde::{Deserialize, Serialize};

/// Record status as written to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Success,
    Error,
}

/// Probe kind as written to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Throughput,
    Latency,
    Capacity,
}

// Exported context-limit files predate the kind field
fn default_kind() -> RecordKind {
    RecordKind::Capacity
}

/// Flat JSON form of a [`ProbeResult`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub model: String,
    pub tp: u32,
    pub util: Utilization,
    pub max_seqs: u32,
    pub status: RecordStatus,
    pub configured_len: u32,
    #[serde(default)]
    pub real_capacity: u32,
    #[serde(default)]
    pub max_context_1_user: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default = "default_kind")]
    pub kind: RecordKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<RequestRate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_ttft_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_tpot_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl From<&ProbeResult> for ProbeRecord {
    fn from(result: &ProbeResult) -> Self {
        let key = result.key();
        let (kind, rate) = match key.kind {
            ProbeKind::Throughput => (RecordKind::Throughput, None),
            ProbeKind::Latency { rate } => (RecordKind::Latency, Some(rate)),
            ProbeKind::Capacity { .. } => (RecordKind::Capacity, None),
        };

        let mut record = ProbeRecord {
            model: key.model.clone(),
            tp: key.tp,
            util: result.config.util,
            max_seqs: result.config.max_seqs,
            status: RecordStatus::Error,
            configured_len: result.configured_len,
            real_capacity: 0,
            max_context_1_user: 0,
            error: None,
            kind,
            rate,
            tokens_per_second: None,
            mean_ttft_ms: None,
            mean_tpot_ms: None,
            recorded_at: result.recorded_at,
        };

        match &result.outcome {
            ProbeOutcome::Error { message } => record.error = Some(message.clone()),
            ProbeOutcome::Success(metrics) => {
                record.status = RecordStatus::Success;
                match metrics {
                    ProbeMetrics::Throughput(t) => {
                        record.tokens_per_second = Some(t.tokens_per_second)
                    }
                    ProbeMetrics::Latency(l) => {
                        record.mean_ttft_ms = Some(l.mean_ttft_ms);
                        record.mean_tpot_ms = Some(l.mean_tpot_ms);
                    }
                    ProbeMetrics::Capacity(c) => {
                        record.real_capacity = c.real_capacity;
                        record.max_context_1_user = c.verified_len;
                    }
                }
            }
        }

        record
    }
}

impl TryFrom<ProbeRecord> for ProbeResult {
    type Error = StoreError;

    fn try_from(record: ProbeRecord) -> Result<Self> {
        let kind = match record.kind {
            RecordKind::Throughput => ProbeKind::Throughput,
            RecordKind::Latency => ProbeKind::Latency {
                rate: record
                    .rate
                    .ok_or_else(|| StoreError::Invalid("latency record without rate".into()))?,
            },
            RecordKind::Capacity => ProbeKind::Capacity {
                util: record.util,
                max_seqs: record.max_seqs,
            },
        };

        let outcome = match record.status {
            RecordStatus::Error => ProbeOutcome::Error {
                message: record
                    .error
                    .unwrap_or_else(|| "unknown error".to_string()),
            },
            RecordStatus::Success => ProbeOutcome::Success(match record.kind {
                RecordKind::Throughput => ProbeMetrics::Throughput(ThroughputMetrics {
                    tokens_per_second: record.tokens_per_second.ok_or_else(|| {
                        StoreError::Invalid("throughput record without tokens_per_second".into())
                    })?,
                }),
                RecordKind::Latency => match (record.mean_ttft_ms, record.mean_tpot_ms) {
                    (Some(mean_ttft_ms), Some(mean_tpot_ms)) => {
                        ProbeMetrics::Latency(LatencyMetrics {
                            mean_ttft_ms,
                            mean_tpot_ms,
                        })
                    }
                    _ => {
                        return Err(StoreError::Invalid(
                            "latency record without TTFT/TPOT".into(),
                        ))
                    }
                },
                RecordKind::Capacity => ProbeMetrics::Capacity(CapacityMetrics {
                    real_capacity: record.real_capacity,
                    verified_len: record.max_context_1_user,
                }),
            }),
        };

        let result = ProbeResult {
            config: ProbeConfig {
                key: ProbeKey::new(record.model, record.tp, kind),
                util: record.util,
                max_seqs: record.max_seqs,
            },
            configured_len: record.configured_len,
            outcome,
            recorded_at: record.recorded_at,
        };

        result
            .validate()
            .map_err(|e| StoreError::Invalid(e.to_string()))?;
        Ok(result)
    }
}
