//! Configuration and catalog commands

use crate::output::{Formattable, OutputFormat, OutputFormatter};
use anyhow::{bail, Context, Result};
use grid_core::{BenchConfig, ModelProfile};
use std::path::Path;

impl Formattable for ModelProfile {
    fn table_headers() -> Vec<String> {
        ["Model", "Max Len", "TP", "Max Seqs", "Batch Tokens", "Util", "Flags"]
            .iter()
            .map(|h| h.to_string())
            .collect()
    }

    fn table_row(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.trust_remote_code {
            flags.push("trust-remote-code".to_string());
        }
        if self.enforce_eager {
            flags.push("eager".to_string());
        }
        flags.extend(self.env.iter().map(|e| format!("{}={}", e.name, e.value)));

        vec![
            self.id.clone(),
            self.max_model_len.to_string(),
            self.valid_tp
                .iter()
                .map(|tp| tp.to_string())
                .collect::<Vec<_>>()
                .join(","),
            self.max_num_seqs.to_string(),
            self.max_batched_tokens.to_string(),
            self.gpu_util
                .map_or_else(|| "-".to_string(), |u| u.to_string()),
            flags.join(" "),
        ]
    }
}

/// `grid config show`
pub fn show(config: &BenchConfig, formatter: &OutputFormatter) -> Result<()> {
    match formatter.format() {
        OutputFormat::Json => formatter.print_structured(config),
        _ => {
            print!("{}", config.to_yaml()?);
            Ok(())
        }
    }
}

/// `grid config init`
pub fn init(path: &Path, force: bool, formatter: &OutputFormatter) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    BenchConfig::default()
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    formatter.print_success(&format!(
        "Wrote default configuration to {}",
        path.display()
    ))
}

/// `grid models`
pub fn list_models(config: &BenchConfig, formatter: &OutputFormatter) -> Result<()> {
    let profiles: Vec<ModelProfile> = config.catalog()?.iter().cloned().collect();
    formatter.print_list(&profiles)
}
