//! Configuration parsing and validation.
//!
//! DocIntel is configured through a TOML file (default `./config/docintel.toml`).
//! Only `[db]` is required; every other section falls back to defaults.
//!
//! ```toml
//! [db]
//! path = "./data/docintel.sqlite"
//!
//! [chunking]
//! target_size = 1000
//! overlap_ratio = 0.1
//!
//! [retrieval]
//! top_k = 5
//! max_context_tokens = 2000
//! similarity_threshold = 0.3
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [prompt]
//! legal = "You are a litigation support analyst."
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use docintel_core::budget::BudgetConfig;
use docintel_core::chunk::{ChunkOptions, MAX_OVERLAP_RATIO};
use docintel_core::models::{Domain, RagOptions};

use crate::embedding::{DType, Device};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkOptions,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_true")]
    pub include_history: bool,
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
    /// Documents estimated above this many tokens are answered via retrieval
    /// instead of whole-document context.
    #[serde(default = "default_rag_threshold_tokens")]
    pub rag_threshold_tokens: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_context_tokens: default_max_context_tokens(),
            similarity_threshold: default_similarity_threshold(),
            include_history: true,
            max_history_turns: default_max_history_turns(),
            rag_threshold_tokens: default_rag_threshold_tokens(),
        }
    }
}

impl RetrievalConfig {
    /// Per-query options seeded from the configured defaults.
    pub fn rag_options(&self) -> RagOptions {
        RagOptions {
            top_k: self.top_k,
            max_context_tokens: self.max_context_tokens,
            similarity_threshold: self.similarity_threshold,
            document_id: None,
            include_history: self.include_history,
            max_history_turns: self.max_history_turns,
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_max_context_tokens() -> usize {
    2000
}
fn default_similarity_threshold() -> f32 {
    0.3
}
fn default_true() -> bool {
    true
}
fn default_max_history_turns() -> usize {
    3
}
fn default_rag_threshold_tokens() -> usize {
    3000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Expected vector length. Vectors of any other length are rejected.
    #[serde(default)]
    pub dims: Option<usize>,
    /// Where a local model runs: auto, cpu, or gpu.
    #[serde(default)]
    pub device: Device,
    /// Local model precision: f32, f16, or q8.
    #[serde(default)]
    pub dtype: DType,
    /// Chunks embedded per request during ingestion.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            device: Device::default(),
            dtype: DType::default(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    8
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// Instructions prepended to every prompt, per document domain.
#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    #[serde(default = "default_contracts_prompt")]
    pub contracts: String,
    #[serde(default = "default_medical_prompt")]
    pub medical: String,
    #[serde(default = "default_financial_prompt")]
    pub financial: String,
    #[serde(default = "default_legal_prompt")]
    pub legal: String,
    #[serde(default = "default_general_prompt")]
    pub general: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            contracts: default_contracts_prompt(),
            medical: default_medical_prompt(),
            financial: default_financial_prompt(),
            legal: default_legal_prompt(),
            general: default_general_prompt(),
        }
    }
}

impl PromptConfig {
    pub fn instructions_for(&self, domain: Domain) -> &str {
        match domain {
            Domain::Contracts => &self.contracts,
            Domain::Medical => &self.medical,
            Domain::Financial => &self.financial,
            Domain::Legal => &self.legal,
            Domain::General => &self.general,
        }
    }
}

fn default_contracts_prompt() -> String {
    "You are DocIntel, a contract analysis AI. Identify parties, obligations, \
     dates, and termination or renewal terms precisely, quoting clause language \
     where it matters."
        .to_string()
}
fn default_medical_prompt() -> String {
    "You are DocIntel, a medical document analysis AI. Report diagnoses, \
     medications, procedures, lab results, and follow-up recommendations exactly \
     as documented. Do not offer clinical advice."
        .to_string()
}
fn default_financial_prompt() -> String {
    "You are DocIntel, a financial document analysis AI. Report amounts, \
     currencies, totals, tax figures, account details, and payment terms exactly \
     as stated."
        .to_string()
}
fn default_legal_prompt() -> String {
    "You are DocIntel, a legal document analysis AI specialized in e-discovery. \
     Focus on relevance, privilege, key entities, and important dates."
        .to_string()
}
fn default_general_prompt() -> String {
    "You are DocIntel, a document analysis AI. Answer accurately and concisely."
        .to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.target_size == 0 {
        anyhow::bail!("chunking.target_size must be > 0");
    }
    if !(0.0..=MAX_OVERLAP_RATIO).contains(&config.chunking.overlap_ratio) {
        anyhow::bail!(
            "chunking.overlap_ratio must be in [0.0, {}]",
            MAX_OVERLAP_RATIO
        );
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if !(-1.0..=1.0).contains(&config.retrieval.similarity_threshold) {
        anyhow::bail!("retrieval.similarity_threshold must be in [-1.0, 1.0]");
    }

    // Validate embedding
    if config.embedding.batch_size < 1 {
        anyhow::bail!("embedding.batch_size must be >= 1");
    }
    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.is_enabled() && config.embedding.provider != "local" {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    Ok(())
}
