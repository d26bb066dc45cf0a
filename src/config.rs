use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub blob: BlobConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub mapping: MappingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BlobConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Path-style addressing (`host/bucket/key`); required by MinIO.
    #[serde(default)]
    pub path_style: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Total attempts per model call (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,
    /// Wait after a successful upload before issuing dependent calls; the
    /// remote file is not immediately queryable.
    #[serde(default = "default_settling_delay_secs")]
    pub settling_delay_secs: u64,
    /// Hard character budget for embedding input.
    #[serde(default = "default_embed_input_chars")]
    pub embed_input_chars: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            text_model: default_text_model(),
            embed_model: default_embed_model(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            settling_delay_secs: default_settling_delay_secs(),
            embed_input_chars: default_embed_input_chars(),
        }
    }
}

impl ModelConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.backoff_multiplier,
        }
    }

    pub fn settling_delay(&self) -> Duration {
        Duration::from_secs(self.settling_delay_secs)
    }
}

fn default_api_base() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_text_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_embed_model() -> String {
    "text-embedding-004".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    4
}
fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_backoff_multiplier() -> u32 {
    2
}
fn default_settling_delay_secs() -> u64 {
    5
}
fn default_embed_input_chars() -> usize {
    8000
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Documents ingested concurrently by `galaxy run`.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Wall-clock budget for one document's pipeline run.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

fn default_max_concurrent() -> usize {
    4
}
fn default_deadline_secs() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct MappingConfig {
    /// Bounded transcript prefix included in mapping prompts.
    #[serde(default = "default_transcript_prefix_chars")]
    pub transcript_prefix_chars: usize,
    /// Minimum selection confidence for a framework to be extracted.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Upper bound on frameworks extracted per document.
    #[serde(default = "default_max_selections")]
    pub max_selections: usize,
    /// Existing instances offered to the consolidation judge.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: i64,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            transcript_prefix_chars: default_transcript_prefix_chars(),
            confidence_threshold: default_confidence_threshold(),
            max_selections: default_max_selections(),
            candidate_limit: default_candidate_limit(),
        }
    }
}

fn default_transcript_prefix_chars() -> usize {
    20_000
}
fn default_confidence_threshold() -> f64 {
    0.6
}
fn default_max_selections() -> usize {
    5
}
fn default_candidate_limit() -> i64 {
    20
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.blob.bucket.is_empty() {
        anyhow::bail!("blob.bucket must not be empty");
    }

    if config.model.max_attempts == 0 {
        anyhow::bail!("model.max_attempts must be >= 1");
    }
    if config.model.embed_input_chars == 0 {
        anyhow::bail!("model.embed_input_chars must be > 0");
    }
    if config.model.backoff_multiplier == 0 {
        anyhow::bail!("model.backoff_multiplier must be >= 1");
    }

    if config.pipeline.max_concurrent == 0 {
        anyhow::bail!("pipeline.max_concurrent must be >= 1");
    }
    if config.pipeline.deadline_secs == 0 {
        anyhow::bail!("pipeline.deadline_secs must be > 0");
    }

    if !(0.0..=1.0).contains(&config.mapping.confidence_threshold) {
        anyhow::bail!("mapping.confidence_threshold must be in [0.0, 1.0]");
    }
    if config.mapping.max_selections == 0 {
        anyhow::bail!("mapping.max_selections must be >= 1");
    }
    if config.mapping.candidate_limit < 1 {
        anyhow::bail!("mapping.candidate_limit must be >= 1");
    }

    Ok(config)
}
