//! Embedding backends and the embedding service.
//!
//! An [`EmbeddingBackend`] turns text into vectors. Implementations:
//! - **[`DisabledBackend`]**: fails every request; used when embeddings are not configured.
//! - **[`OpenAIBackend`]**: calls the OpenAI embeddings API with retry and backoff.
//! - **[`OllamaBackend`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalBackend`**: runs models in-process via fastembed
//!   (`local-embeddings-fastembed` feature); no network calls after download.
//!
//! Backends are never called directly by the pipeline. They are driven by
//! the [`EmbeddingService`] actor in [`service`], which owns model loading
//! and serializes requests.
//!
//! # Retry Strategy
//!
//! The HTTP backends use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

pub mod service;

pub use service::{EmbeddingEvent, EmbeddingService, ServiceError};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// Where a local model should run. Remote backends ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Auto,
    Cpu,
    Gpu,
}

/// Weight precision requested for a local model. Remote backends ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    #[default]
    F32,
    F16,
    Q8,
}

/// Which model to load, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub model_id: String,
    pub device: Device,
    pub dtype: DType,
    /// Vector length the model must produce. `None` accepts any length.
    pub dims: Option<usize>,
}

impl ModelSpec {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            device: Device::default(),
            dtype: DType::default(),
            dims: None,
        }
    }

    pub fn with_dims(mut self, dims: usize) -> Self {
        self.dims = Some(dims);
        self
    }

    /// The model named in config, or the provider's default.
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let model_id = match (&config.model, config.provider.as_str()) {
            (Some(model), _) => model.clone(),
            (None, "local") => DEFAULT_LOCAL_MODEL.to_string(),
            (None, provider) => provider.to_string(),
        };
        Self {
            model_id,
            device: config.device,
            dtype: config.dtype,
            dims: config.dims,
        }
    }
}

/// Progress callback for model loading: `(loaded, total)` in backend-defined units.
pub type LoadProgress<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// A source of embedding vectors.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Prepare `spec` for use. Called once before any embedding request and
    /// again whenever the model is switched.
    async fn load(&self, spec: &ModelSpec, progress: LoadProgress<'_>) -> Result<()>;

    /// Embed a batch, returning one vector per input in input order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_texts(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

// ============ Disabled Backend ============

/// A backend that refuses every request.
///
/// Used when `embedding.provider = "disabled"`. Loading succeeds so the
/// service reaches `Ready`; embedding fails with a descriptive error.
pub struct DisabledBackend;

#[async_trait]
impl EmbeddingBackend for DisabledBackend {
    async fn load(&self, _spec: &ModelSpec, progress: LoadProgress<'_>) -> Result<()> {
        progress(1, 1);
        Ok(())
    }

    async fn embed_texts(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled. Set [embedding] provider in the config.")
    }
}

// ============ HTTP helpers ============

struct HttpSettings {
    max_retries: u32,
    timeout_secs: u64,
}

impl HttpSettings {
    fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        }
    }

    fn client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?)
    }
}

/// POST `body` with exponential backoff, returning the parsed JSON body.
async fn post_json_with_retry(
    settings: &HttpSettings,
    label: &str,
    build: impl Fn(&reqwest::Client) -> reqwest::RequestBuilder,
) -> Result<serde_json::Value> {
    let client = settings.client()?;
    let mut last_err = None;

    for attempt in 0..=settings.max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(label, attempt, ?delay, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        match build(&client).send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }

                // Client error (not 429): don't retry
                let body_text = response.text().await.unwrap_or_default();
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!("{} connection error: {}", label, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} embedding failed after retries", label)))
}

fn json_to_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

fn read_model(model: &RwLock<String>) -> Result<String> {
    model
        .read()
        .map(|m| m.clone())
        .map_err(|_| anyhow::anyhow!("embedding model lock poisoned"))
}

fn write_model(model: &RwLock<String>, id: &str) -> Result<()> {
    let mut guard = model
        .write()
        .map_err(|_| anyhow::anyhow!("embedding model lock poisoned"))?;
    *guard = id.to_string();
    Ok(())
}

// ============ OpenAI Backend ============

/// Embedding backend using the OpenAI API.
///
/// Calls `POST /v1/embeddings`. Requires `OPENAI_API_KEY` in the environment.
pub struct OpenAIBackend {
    model: RwLock<String>,
    api_key: String,
    http: HttpSettings,
}

impl OpenAIBackend {
    /// # Errors
    ///
    /// Returns an error if `OPENAI_API_KEY` is not set.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            model: RwLock::new(ModelSpec::from_config(config).model_id),
            api_key,
            http: HttpSettings::from_config(config),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAIBackend {
    async fn load(&self, spec: &ModelSpec, progress: LoadProgress<'_>) -> Result<()> {
        write_model(&self.model, &spec.model_id)?;
        progress(1, 1);
        Ok(())
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": read_model(&self.model)?,
            "input": texts,
        });
        let json = post_json_with_retry(&self.http, "OpenAI", |client| {
            client
                .post("https://api.openai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
        })
        .await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(pos as u64);
        indexed.push((index, json_to_vec(embedding)));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Backend ============

/// Embedding backend using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default `http://localhost:11434`).
pub struct OllamaBackend {
    model: RwLock<String>,
    url: String,
    http: HttpSettings,
}

impl OllamaBackend {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            model: RwLock::new(ModelSpec::from_config(config).model_id),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            http: HttpSettings::from_config(config),
        }
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    async fn load(&self, spec: &ModelSpec, progress: LoadProgress<'_>) -> Result<()> {
        write_model(&self.model, &spec.model_id)?;
        progress(1, 1);
        Ok(())
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": read_model(&self.model)?,
            "input": texts,
        });
        let endpoint = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let json =
            post_json_with_retry(&self.http, "Ollama", |client| client.post(&endpoint).json(&body))
                .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| json_to_vec(values))
                .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

// ============ Local Backend (fastembed) ============

const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

/// In-process embeddings via fastembed.
///
/// Models are downloaded from Hugging Face on first load and cached;
/// afterwards embedding runs offline.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalBackend {
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
    batch_size: usize,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalBackend {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            model: Arc::new(std::sync::Mutex::new(None)),
            batch_size: config.batch_size,
        }
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingBackend for LocalBackend {
    async fn load(&self, spec: &ModelSpec, progress: LoadProgress<'_>) -> Result<()> {
        if spec.device == Device::Gpu || spec.dtype != DType::F32 {
            tracing::warn!(
                device = ?spec.device,
                dtype = ?spec.dtype,
                "local backend runs fp32 on CPU; ignoring requested device/dtype"
            );
        }
        let fastembed_model = config_to_fastembed_model(&spec.model_id)?;
        progress(0, 1);

        let loaded = tokio::task::spawn_blocking(move || {
            fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(fastembed_model).with_show_download_progress(false),
            )
            .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))
        })
        .await??;

        let mut slot = self
            .model
            .lock()
            .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
        *slot = Some(loaded);
        drop(slot);

        progress(1, 1);
        Ok(())
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            let embedder = guard
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("local embedding model not loaded"))?;
            embedder
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

/// Create the backend selected by `embedding.provider`.
///
/// | Config Value | Backend |
/// |-------------|---------|
/// | `"disabled"` | [`DisabledBackend`] |
/// | `"openai"` | [`OpenAIBackend`] |
/// | `"ollama"` | [`OllamaBackend`] |
/// | `"local"` | `LocalBackend` (requires `local-embeddings-fastembed`) |
pub fn create_backend(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingBackend>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledBackend)),
        "openai" => Ok(Arc::new(OpenAIBackend::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaBackend::new(config))),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalBackend::new(config))),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_response_ordered_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn openai_response_missing_data_is_error() {
        assert!(parse_openai_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn ollama_response_parsed() {
        let json = serde_json::json!({"embeddings": [[0.5, 0.25], [1.0, 0.0]]});
        let vecs = parse_ollama_response(&json).unwrap();
        assert_eq!(vecs.len(), 2);
        assert_eq!(vecs[0], vec![0.5, 0.25]);
    }

    #[test]
    fn model_spec_from_config() {
        let mut config = EmbeddingConfig::default();
        assert_eq!(ModelSpec::from_config(&config).model_id, "disabled");
        config.provider = "local".to_string();
        assert_eq!(ModelSpec::from_config(&config).model_id, "all-minilm-l6-v2");
        config.model = Some("nomic-embed-text".to_string());
        let spec = ModelSpec::from_config(&config);
        assert_eq!(spec.model_id, "nomic-embed-text");
        assert_eq!(spec.device, Device::Auto);
        assert_eq!(spec.dims, None);

        config.device = Device::Cpu;
        config.dtype = DType::Q8;
        config.dims = Some(768);
        let spec = ModelSpec::from_config(&config);
        assert_eq!(spec.device, Device::Cpu);
        assert_eq!(spec.dtype, DType::Q8);
        assert_eq!(spec.dims, Some(768));
    }

    #[tokio::test]
    async fn disabled_backend_loads_but_refuses() {
        let backend = DisabledBackend;
        backend
            .load(&ModelSpec::new("disabled"), &|_, _| {})
            .await
            .unwrap();
        let err = backend.embed_query("hello").await.unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[test]
    fn create_backend_rejects_unknown() {
        let config = EmbeddingConfig {
            provider: "magic".to_string(),
            ..Default::default()
        };
        assert!(create_backend(&config).is_err());
    }
}
