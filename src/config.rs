use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use diligence_core::VerificationSettings;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// All defaults, every provider disabled.
    pub fn minimal() -> Self {
        Self::default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub text_model: Option<String>,
    #[serde(default)]
    pub vision_model: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_inference_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            text_model: None,
            vision_model: None,
            api_key_env: None,
            url: None,
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_inference_timeout_secs(),
        }
    }
}

impl InferenceConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_retries() -> u32 {
    3
}
fn default_inference_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            api_key_env: None,
            url: None,
            max_results: default_max_results(),
            timeout_secs: default_search_timeout_secs(),
        }
    }
}

impl SearchConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_max_results() -> usize {
    5
}
fn default_search_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_rasterizer")]
    pub rasterizer: String,
    #[serde(default = "default_render_dpi")]
    pub render_dpi: u32,
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            rasterizer: default_rasterizer(),
            render_dpi: default_render_dpi(),
            max_document_bytes: default_max_document_bytes(),
            include_globs: default_include_globs(),
        }
    }
}

fn default_max_concurrency() -> usize {
    4
}
fn default_rasterizer() -> String {
    "disabled".to_string()
}
/// Twice the 72 dpi PDF user-space resolution.
fn default_render_dpi() -> u32 {
    144
}
fn default_max_document_bytes() -> usize {
    50 * 1024 * 1024
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.pdf".to_string(),
        "**/*.pptx".to_string(),
        "**/*.docx".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct VerificationConfig {
    #[serde(default = "default_search_quota")]
    pub search_quota: u32,
    #[serde(default = "default_calc_tolerance")]
    pub calc_tolerance: f64,
    #[serde(default = "default_consistency_tolerance")]
    pub consistency_tolerance: f64,
    #[serde(default = "default_claims_per_query")]
    pub claims_per_query: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            search_quota: default_search_quota(),
            calc_tolerance: default_calc_tolerance(),
            consistency_tolerance: default_consistency_tolerance(),
            claims_per_query: default_claims_per_query(),
        }
    }
}

fn default_search_quota() -> u32 {
    10
}
fn default_calc_tolerance() -> f64 {
    0.10
}
fn default_consistency_tolerance() -> f64 {
    0.01
}
fn default_claims_per_query() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Config {
    pub fn verification_settings(&self) -> VerificationSettings {
        VerificationSettings {
            search_quota: self.verification.search_quota,
            calc_tolerance: self.verification.calc_tolerance,
            consistency_tolerance: self.verification.consistency_tolerance,
            claims_per_query: self.verification.claims_per_query,
            search_enabled: self.search.is_enabled(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    match config.inference.provider.as_str() {
        "disabled" | "gemini" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown inference provider: '{}'. Must be disabled, gemini, openai, or ollama.",
            other
        ),
    }
    if config.inference.is_enabled() {
        if config.inference.text_model.is_none() {
            anyhow::bail!(
                "inference.text_model must be specified when provider is '{}'",
                config.inference.provider
            );
        }
        if config.inference.vision_model.is_none() {
            anyhow::bail!(
                "inference.vision_model must be specified when provider is '{}'",
                config.inference.provider
            );
        }
    }
    if !(0.0..=2.0).contains(&config.inference.temperature) {
        anyhow::bail!("inference.temperature must be in [0.0, 2.0]");
    }

    match config.search.provider.as_str() {
        "disabled" | "gemini" => {}
        other => anyhow::bail!(
            "Unknown search provider: '{}'. Must be disabled or gemini.",
            other
        ),
    }
    if config.search.is_enabled() && config.search.model.is_none() {
        anyhow::bail!("search.model must be specified when provider is 'gemini'");
    }
    if config.search.max_results < 1 {
        anyhow::bail!("search.max_results must be >= 1");
    }

    if config.pipeline.max_concurrency < 1 {
        anyhow::bail!("pipeline.max_concurrency must be >= 1");
    }
    match config.pipeline.rasterizer.as_str() {
        "disabled" | "pdftoppm" => {}
        other => anyhow::bail!(
            "Unknown rasterizer: '{}'. Must be disabled or pdftoppm.",
            other
        ),
    }
    if config.pipeline.render_dpi == 0 {
        anyhow::bail!("pipeline.render_dpi must be > 0");
    }
    if config.pipeline.max_document_bytes == 0 {
        anyhow::bail!("pipeline.max_document_bytes must be > 0");
    }

    if !(0.0..1.0).contains(&config.verification.calc_tolerance) {
        anyhow::bail!("verification.calc_tolerance must be in [0.0, 1.0)");
    }
    if !(0.0..1.0).contains(&config.verification.consistency_tolerance) {
        anyhow::bail!("verification.consistency_tolerance must be in [0.0, 1.0)");
    }
    if config.verification.claims_per_query < 1 {
        anyhow::bail!("verification.claims_per_query must be >= 1");
    }

    Ok(())
}
