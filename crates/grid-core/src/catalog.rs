//! Model catalog
//!
//! Static mapping from model id to the resources the server should be launched with. The
//! catalog is built once at startup and passed by reference to the components that need it.

use crate::probe::Utilization;
use crate::{safe_model_name, CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One environment variable set for the server process.
///
/// Kept as a name/value pair rather than a map key because layered config lowercases keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvOverride {
    pub name: String,
    pub value: String,
}

impl EnvOverride {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Launch profile of one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Hugging Face style model id, e.g. `org/name`
    pub id: String,

    /// Context ceiling passed as the maximum model length
    pub max_model_len: u32,

    /// Tensor-parallel degrees this model may run with
    pub valid_tp: Vec<u32>,

    /// Concurrency ceiling passed as the maximum number of sequences
    pub max_num_seqs: u32,

    /// Batch-token budget for offline throughput runs
    pub max_batched_tokens: u32,

    /// Per-model memory-utilization override
    #[serde(default)]
    pub gpu_util: Option<Utilization>,

    /// Disable graph capture
    #[serde(default)]
    pub enforce_eager: bool,

    /// Extra environment for the server process
    #[serde(default)]
    pub env: Vec<EnvOverride>,

    /// Allow custom modelling code from the model repository
    #[serde(default)]
    pub trust_remote_code: bool,
}

impl ModelProfile {
    /// Conservative profile for models that are not in the catalog
    pub fn fallback(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            max_model_len: 8192,
            valid_tp: vec![1],
            max_num_seqs: 32,
            max_batched_tokens: 8192,
            gpu_util: None,
            enforce_eager: false,
            env: Vec::new(),
            trust_remote_code: false,
        }
    }

    /// Whether `tp` is one of the model's valid degrees
    pub fn supports_tp(&self, tp: u32) -> bool {
        self.valid_tp.contains(&tp)
    }

    /// Largest valid degree
    pub fn max_tp(&self) -> u32 {
        self.valid_tp.iter().copied().max().unwrap_or(1)
    }

    /// Utilization override, or the sweep-wide default
    pub fn effective_util(&self, default: Utilization) -> Utilization {
        self.gpu_util.unwrap_or(default)
    }

    /// Last path segment of the id
    pub fn short_name(&self) -> &str {
        self.id.rsplit('/').next().unwrap_or(&self.id)
    }

    /// Environment override for `name`, if any
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value.as_str())
    }

    /// Check the profile's own invariants
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(CoreError::config("model id must not be empty"));
        }
        if self.valid_tp.is_empty() {
            return Err(CoreError::config(format!(
                "{}: valid_tp must not be empty",
                self.id
            )));
        }
        if self.valid_tp.contains(&0) {
            return Err(CoreError::config(format!(
                "{}: tensor-parallel degrees must be positive",
                self.id
            )));
        }
        if self.max_model_len == 0 || self.max_num_seqs == 0 || self.max_batched_tokens == 0 {
            return Err(CoreError::config(format!(
                "{}: max_model_len, max_num_seqs and max_batched_tokens must be positive",
                self.id
            )));
        }
        if self.env.iter().any(|e| e.name.is_empty() || e.name.contains('=')) {
            return Err(CoreError::config(format!(
                "{}: environment override names must be non-empty and contain no '='",
                self.id
            )));
        }
        Ok(())
    }
}

/// Immutable model catalog in declared order
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigCatalog {
    profiles: Vec<ModelProfile>,
}

impl ConfigCatalog {
    /// Build a catalog, validating each profile and rejecting duplicate ids
    pub fn new(profiles: Vec<ModelProfile>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut file_names: HashMap<String, &str> = HashMap::new();
        for profile in &profiles {
            profile.validate()?;
            if !seen.insert(profile.id.as_str()) {
                return Err(CoreError::config(format!(
                    "duplicate model in catalog: {}",
                    profile.id
                )));
            }
            // Result files are named after the id with '/' replaced
            if let Some(other) = file_names.insert(safe_model_name(&profile.id), &profile.id) {
                return Err(CoreError::config(format!(
                    "models {} and {} would share result files",
                    other, profile.id
                )));
            }
        }
        Ok(Self { profiles })
    }

    /// Catalog shipped with the binary
    pub fn builtin() -> Self {
        Self {
            profiles: builtin_profiles(),
        }
    }

    /// Look up a profile by id
    pub fn get(&self, id: &str) -> Option<&ModelProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    /// Look up a profile by id, failing for unknown models
    pub fn require(&self, id: &str) -> Result<&ModelProfile> {
        self.get(id)
            .ok_or_else(|| CoreError::UnknownModel(id.to_string()))
    }

    /// Profiles in declared order
    pub fn iter(&self) -> impl Iterator<Item = &ModelProfile> {
        self.profiles.iter()
    }

    /// Model ids in declared order
    pub fn ids(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.id.as_str()).collect()
    }

    /// Position of a model in declared order
    pub fn position(&self, id: &str) -> Option<usize> {
        self.profiles.iter().position(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Restrict the catalog to the given ids, keeping declared order
    pub fn select(&self, ids: &[String]) -> Result<Self> {
        for id in ids {
            self.require(id)?;
        }
        Ok(Self {
            profiles: self
                .profiles
                .iter()
                .filter(|p| ids.iter().any(|id| id == &p.id))
                .cloned()
                .collect(),
        })
    }
}

fn profile(
    id: &str,
    max_model_len: u32,
    valid_tp: &[u32],
    max_num_seqs: u32,
    max_batched_tokens: u32,
) -> ModelProfile {
    ModelProfile {
        id: id.to_string(),
        max_model_len,
        valid_tp: valid_tp.to_vec(),
        max_num_seqs,
        max_batched_tokens,
        gpu_util: None,
        enforce_eager: false,
        env: Vec::new(),
        trust_remote_code: true,
    }
}

/// Default profiles, sized for two 32 GB accelerators
pub fn builtin_profiles() -> Vec<ModelProfile> {
    let mut llama = profile("meta-llama/Meta-Llama-3.1-8B-Instruct", 65536, &[1, 2], 64, 32768);
    llama.trust_remote_code = false;

    let gpt_oss = profile("openai/gpt-oss-20b", 32768, &[1, 2], 64, 8192);
    let qwen_14b = profile("RedHatAI/Qwen3-14B-FP8-dynamic", 32768, &[1], 64, 32768);
    let qwen_coder = profile(
        "cpatonn/Qwen3-Coder-30B-A3B-Instruct-GPTQ-4bit",
        24576,
        &[1, 2],
        64,
        32768,
    );

    // Too large for a single device
    let mut qwen_next = profile(
        "cpatonn/Qwen3-Next-80B-A3B-Instruct-AWQ-4bit",
        20480,
        &[2],
        32,
        16384,
    );
    qwen_next.env.push(EnvOverride::new("VLLM_USE_TRITON_AWQ", "1"));

    let mut gemma_27b = profile("RedHatAI/gemma-3-27b-it-FP8-dynamic", 29000, &[2], 32, 29000);
    gemma_27b.gpu_util = Utilization::new(0.94).ok();

    let gemma_12b = profile("RedHatAI/gemma-3-12b-it-FP8-dynamic", 9900, &[1, 2], 64, 9900);

    vec![
        llama, gpt_oss, qwen_14b, qwen_coder, qwen_next, gemma_27b, gemma_12b,
    ]
}
