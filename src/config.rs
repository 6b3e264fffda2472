//! TOML configuration for the ingestion jobs.
//!
//! Only `[db]` is required; every other section falls back to defaults that
//! match the public Federal Register API and a dry-run enrichment stage.
//! Secrets (the analysis API key) come from the environment, never the file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Federal Register source settings.
#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_url")]
    pub base_url: String,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_registry_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    #[serde(default = "default_days_lookback")]
    pub days_lookback: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: default_registry_url(),
            per_page: default_per_page(),
            max_pages: default_max_pages(),
            timeout_secs: default_registry_timeout(),
            page_delay_ms: default_page_delay_ms(),
            days_lookback: default_days_lookback(),
        }
    }
}

fn default_registry_url() -> String {
    "https://www.federalregister.gov/api/v1".to_string()
}
fn default_per_page() -> u32 {
    100
}
fn default_max_pages() -> u32 {
    2
}
fn default_registry_timeout() -> u64 {
    30
}
fn default_page_delay_ms() -> u64 {
    500
}
fn default_days_lookback() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_analysis_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_analysis_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_analysis_url(),
            model: default_model(),
            timeout_secs: default_analysis_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_analysis_url() -> String {
    "https://api.x.ai/v1".to_string()
}
fn default_model() -> String {
    "grok-4-1-fast-non-reasoning".to_string()
}
fn default_analysis_timeout() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}

impl AnalysisConfig {
    /// Enrichment writes back only when a provider is configured.
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// What the canonicalizer does with a raw row it cannot parse.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParseFailurePolicy {
    /// Stop the run at the offending row.
    #[default]
    Abort,
    /// Leave the row unlinked, log it, and continue.
    Quarantine,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_canonicalize_batch")]
    pub canonicalize_batch_size: i64,
    #[serde(default = "default_enrich_batch")]
    pub enrich_batch_size: i64,
    #[serde(default = "default_materialize_batch")]
    pub materialize_batch_size: i64,
    #[serde(default)]
    pub on_parse_error: ParseFailurePolicy,
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            canonicalize_batch_size: default_canonicalize_batch(),
            enrich_batch_size: default_enrich_batch(),
            materialize_batch_size: default_materialize_batch(),
            on_parse_error: ParseFailurePolicy::default(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

fn default_canonicalize_batch() -> i64 {
    200
}
fn default_enrich_batch() -> i64 {
    200
}
fn default_materialize_batch() -> i64 {
    500
}
fn default_deadline_secs() -> u64 {
    1800
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.registry.per_page == 0 {
        anyhow::bail!("registry.per_page must be > 0");
    }
    if config.registry.max_pages == 0 {
        anyhow::bail!("registry.max_pages must be > 0");
    }

    let pipeline = &config.pipeline;
    if pipeline.canonicalize_batch_size < 1
        || pipeline.enrich_batch_size < 1
        || pipeline.materialize_batch_size < 1
    {
        anyhow::bail!("pipeline batch sizes must be >= 1");
    }

    match config.analysis.provider.as_str() {
        "disabled" | "mock" => {}
        "xai" => {
            if analysis_api_key().is_none() {
                anyhow::bail!(
                    "analysis.provider is 'xai' but neither XAI_API_KEY nor GROK_API_KEY is set"
                );
            }
        }
        other => anyhow::bail!(
            "Unknown analysis provider: '{}'. Must be disabled, mock, or xai.",
            other
        ),
    }

    Ok(())
}

/// API key for the analysis service, if one is present in the environment.
pub fn analysis_api_key() -> Option<String> {
    std::env::var("XAI_API_KEY")
        .or_else(|_| std::env::var("GROK_API_KEY"))
        .ok()
        .filter(|k| !k.trim().is_empty())
}
