//! Server launch settings

use grid_core::{EnvOverride, ModelProfile, ProbeConfig, Utilization};

/// Everything needed to build the server command line for one configuration point
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub model: String,
    pub tp: u32,
    pub util: Utilization,
    pub max_model_len: u32,
    pub max_num_seqs: u32,
    pub trust_remote_code: bool,
    pub enforce_eager: bool,
    pub env: Vec<EnvOverride>,
    pub dtype: String,
}

impl LaunchSpec {
    /// Launch settings for `profile` at `tp`, with the profile's own context ceiling
    pub fn from_profile(
        profile: &ModelProfile,
        tp: u32,
        util: Utilization,
        max_num_seqs: u32,
        dtype: impl Into<String>,
    ) -> Self {
        Self {
            model: profile.id.clone(),
            tp,
            util,
            max_model_len: profile.max_model_len,
            max_num_seqs,
            trust_remote_code: profile.trust_remote_code,
            enforce_eager: profile.enforce_eager,
            env: profile.env.clone(),
            dtype: dtype.into(),
        }
    }

    /// Launch settings a probe runs under
    pub fn for_probe(profile: &ModelProfile, probe: &ProbeConfig, dtype: impl Into<String>) -> Self {
        Self::from_profile(profile, probe.tp(), probe.util, probe.max_seqs, dtype)
    }

    /// Override the context ceiling
    pub fn with_max_model_len(mut self, max_model_len: u32) -> Self {
        self.max_model_len = max_model_len;
        self
    }

    /// Engine flags shared by the server and the offline benchmark, without the model
    pub fn engine_args(&self) -> Vec<String> {
        let mut args = vec![
            "--gpu-memory-utilization".to_string(),
            self.util.file_token(),
            "--max-model-len".to_string(),
            self.max_model_len.to_string(),
            "--dtype".to_string(),
            self.dtype.clone(),
            "--tensor-parallel-size".to_string(),
            self.tp.to_string(),
            "--max-num-seqs".to_string(),
            self.max_num_seqs.to_string(),
        ];
        if self.trust_remote_code {
            args.push("--trust-remote-code".to_string());
        }
        if self.enforce_eager {
            args.push("--enforce-eager".to_string());
        }
        args
    }

    /// Full argument list for `serve`
    pub fn serve_args(&self, host: &str, port: u16) -> Vec<String> {
        let mut args = vec!["serve".to_string(), self.model.clone()];
        args.extend(self.engine_args());
        args.extend([
            "--host".to_string(),
            host.to_string(),
            "--port".to_string(),
            port.to_string(),
        ]);
        args
    }

    /// Environment pairs applied on top of the inherited environment
    pub fn env_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env.iter().map(|e| (e.name.as_str(), e.value.as_str()))
    }
}
