//! vLLM benchmark entry points and context verification

use crate::bench::{BenchClient, LatencyRequest, ThroughputRequest};
use crate::parse::{last_error_line, parse_serve_output, parse_throughput_json};
use crate::process::run_in_group;
use crate::{Result, RuntimeError};
use async_trait::async_trait;
use grid_core::{LatencyMetrics, ThroughputMetrics, VerifyConfig};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Drives `vllm bench` subcommands and the OpenAI-compatible completion endpoint
pub struct VllmBenchClient {
    command: String,
    client: Client,
    output_tokens: u32,
}

/// Completion request (OpenAI-compatible)
#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: String,
    max_tokens: u32,
    temperature: f32,
    ignore_eos: bool,
}

#[derive(Debug, Serialize)]
struct TokenizeRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenizeResponse {
    count: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    usage: CompletionUsage,
}

#[derive(Debug, Deserialize)]
struct CompletionUsage {
    #[allow(unused)]
    prompt_tokens: u32,
    #[allow(unused)]
    completion_tokens: Option<u32>,
    total_tokens: u32,
}

/// Tokens left free for BOS and similar when the server cannot count the prompt
const SPECIAL_TOKEN_RESERVE: u32 = 8;

/// Prompt tokens available to a completion of `target` tokens in total
fn prompt_budget(target: u32, output_tokens: u32) -> u32 {
    target.saturating_sub(output_tokens).max(1)
}

/// Filler words to try before the tokenizer has been consulted
fn initial_words(budget: u32) -> u32 {
    budget.saturating_sub(SPECIAL_TOKEN_RESERVE).max(1)
}

/// Word count that makes the prompt land on `budget`, given that `words` filler words
/// tokenized to `counted` tokens. Each filler word is one token; the rest is fixed overhead.
fn fit_words(words: u32, counted: u32, budget: u32) -> u32 {
    let overhead = counted.saturating_sub(words);
    budget.saturating_sub(overhead).max(1)
}

fn filler_prompt(words: u32) -> String {
    vec!["hello"; words as usize].join(" ")
}

impl VllmBenchClient {
    /// Create a client invoking `command` for benchmark runs
    pub fn new(command: impl Into<String>, verify: &VerifyConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(verify.request_timeout())
            .build()
            .map_err(|e| RuntimeError::Benchmark(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            command: command.into(),
            client,
            output_tokens: verify.output_tokens,
        })
    }

    /// Arguments for `bench throughput`
    pub fn throughput_args(request: &ThroughputRequest) -> Vec<String> {
        let mut args = vec![
            "bench".to_string(),
            "throughput".to_string(),
            "--model".to_string(),
            request.launch.model.clone(),
        ];
        args.extend(request.launch.engine_args());
        args.extend([
            "--num-prompts".to_string(),
            request.num_prompts.to_string(),
            "--max-num-batched-tokens".to_string(),
            request.max_batched_tokens.to_string(),
            "--output-len".to_string(),
            request.output_len.to_string(),
            "--output-json".to_string(),
            request.report_path.display().to_string(),
            "--disable-log-stats".to_string(),
        ]);
        args.extend(request.workload.throughput_args());
        args
    }

    /// Arguments for `bench serve`
    pub fn latency_args(request: &LatencyRequest) -> Vec<String> {
        let mut args = vec![
            "bench".to_string(),
            "serve".to_string(),
            "--model".to_string(),
            request.model.clone(),
            "--base-url".to_string(),
            request.base_url.clone(),
            "--request-rate".to_string(),
            request.rate.to_string(),
            "--num-prompts".to_string(),
            request.num_prompts.to_string(),
            "--trust-remote-code".to_string(),
        ];
        args.extend(request.workload.serve_args());
        args
    }

    /// Prompt token count according to the server's tokenizer, if it exposes one
    async fn count_tokens(&self, base_url: &str, model: &str, prompt: &str) -> Option<u32> {
        let url = format!("{}/tokenize", base_url.trim_end_matches('/'));
        let response = match self
            .client
            .post(&url)
            .json(&TokenizeRequest { model, prompt })
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!("Tokenizer endpoint answered {}", response.status());
                return None;
            }
            Err(e) => {
                debug!("Tokenizer endpoint unavailable: {}", e);
                return None;
            }
        };
        match response.json::<TokenizeResponse>().await {
            Ok(tokens) => Some(tokens.count),
            Err(e) => {
                warn!("Invalid tokenizer response: {}", e);
                None
            }
        }
    }

    /// Filler prompt whose token count plus the completion fits `target`
    async fn sized_prompt(&self, base_url: &str, model: &str, target: u32) -> String {
        let budget = prompt_budget(target, self.output_tokens);
        let mut words = initial_words(budget);
        if let Some(counted) = self
            .count_tokens(base_url, model, &filler_prompt(words))
            .await
        {
            words = fit_words(words, counted, budget);
        }
        filler_prompt(words)
    }

    fn check_exit(&self, what: &str, output: &Output) -> Result<()> {
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = last_error_line(&stderr).unwrap_or_else(|| "no error output".to_string());
        let status = match output.status.code() {
            Some(code) => format!("exit code {}", code),
            None => "killed by signal".to_string(),
        };
        Err(RuntimeError::Benchmark(format!(
            "{} failed ({}): {}",
            what, status, detail
        )))
    }
}

#[async_trait]
impl BenchClient for VllmBenchClient {
    async fn run_throughput(&self, request: &ThroughputRequest) -> Result<ThroughputMetrics> {
        let args = Self::throughput_args(request);
        info!(
            "Running offline throughput: {} (tp={}, batch tokens={})",
            request.launch.model, request.launch.tp, request.max_batched_tokens
        );
        debug!("Command: {} {}", self.command, args.join(" "));

        let mut command = Command::new(&self.command);
        command.args(&args).envs(request.launch.env_pairs());
        let output = run_in_group(command)
            .await
            .map_err(|e| RuntimeError::Benchmark(format!("Failed to run '{}': {}", self.command, e)))?;
        self.check_exit("bench throughput", &output)?;

        let report = tokio::fs::read_to_string(&request.report_path).await?;
        let metrics = parse_throughput_json(&report)?;
        if let Err(e) = tokio::fs::remove_file(&request.report_path).await {
            warn!(
                "Failed to remove benchmark report {}: {}",
                request.report_path.display(),
                e
            );
        }
        Ok(metrics)
    }

    async fn run_latency(&self, request: &LatencyRequest) -> Result<LatencyMetrics> {
        let args = Self::latency_args(request);
        info!(
            "Running serving benchmark: {} at {} req/s ({} prompts)",
            request.model, request.rate, request.num_prompts
        );
        debug!("Command: {} {}", self.command, args.join(" "));

        let mut command = Command::new(&self.command);
        command
            .args(&args)
            .envs(request.env.iter().map(|e| (e.name.as_str(), e.value.as_str())));
        let output = run_in_group(command)
            .await
            .map_err(|e| RuntimeError::Benchmark(format!("Failed to run '{}': {}", self.command, e)))?;
        self.check_exit("bench serve", &output)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_serve_output(&stdout)?)
    }

    async fn verify_context(&self, base_url: &str, model: &str, target: u32) -> Result<u32> {
        let request = CompletionRequest {
            model,
            prompt: self.sized_prompt(base_url, model, target).await,
            max_tokens: self.output_tokens,
            temperature: 0.0,
            ignore_eos: true,
        };
        let url = format!("{}/v1/completions", base_url.trim_end_matches('/'));
        debug!("Verifying {} tokens against {}", target, url);

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(300).collect();
            return Err(RuntimeError::InvalidResponse(format!(
                "completion of {} tokens rejected ({}): {}",
                target, status, body
            )));
        }

        let completion: CompletionResponse = response.json().await.map_err(|e| {
            RuntimeError::InvalidResponse(format!("Invalid completion response: {}", e))
        })?;
        Ok(completion.usage.total_tokens)
    }
}
