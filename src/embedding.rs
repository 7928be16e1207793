//! Embedding backends.
//!
//! Concrete implementations of the core [`Embedder`] trait:
//! - **[`LocalEmbedder`]**: runs a sentence-transformer locally via fastembed; no network calls after the model download.
//! - **[`OpenAIEmbedder`]**: calls the OpenAI embeddings API.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`HashingEmbedder`]**: deterministic feature hashing from the core crate; no model at all.
//!
//! # Provider Selection
//!
//! Build the process-wide embedder once at startup with [`create_embedder`]
//! and hand clones of the returned `Arc` to the services:
//!
//! ```rust,no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use ragthread::config::EmbeddingConfig;
//! use ragthread::embedding::create_embedder;
//!
//! let config = EmbeddingConfig { provider: "hash".into(), ..Default::default() };
//! let embedder = create_embedder(&config).await?;
//! assert_eq!(embedder.dims(), 384);
//! # Ok(())
//! # }
//! ```
//!
//! # Retry Strategy
//!
//! The HTTP backends retry transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Exhausted retries surface as [`RagError::EmbeddingUnavailable`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use ragthread_core::embedding::Embedder;
use ragthread_core::{RagError, Result};
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;

pub use ragthread_core::embedding::HashingEmbedder;

const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";
const DEFAULT_DIMS: usize = 384;

/// Create the process-wide [`Embedder`] described by the configuration.
///
/// | Config Value | Backend |
/// |-------------|----------|
/// | `"local"` | [`LocalEmbedder`] (requires the `local-embeddings-fastembed` feature) |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"hash"` | [`HashingEmbedder`] |
///
/// # Errors
///
/// Returns an error for unknown provider names or when the backend cannot
/// be initialised (missing config, API key, model download failure).
pub async fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashingEmbedder::new(
            config.dims.unwrap_or(DEFAULT_DIMS),
        )?)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::load(config).await?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Vector width the configured provider will produce, without loading it.
///
/// Used to open thread indices for commands that never embed.
pub fn expected_dims(config: &EmbeddingConfig) -> anyhow::Result<usize> {
    if let Some(dims) = config.dims {
        return Ok(dims);
    }
    match config.provider.as_str() {
        "local" => local_model_dims(config.model.as_deref().unwrap_or(DEFAULT_LOCAL_MODEL)),
        "hash" => Ok(DEFAULT_DIMS),
        other => bail!("embedding.dims required for provider '{}'", other),
    }
}

fn unavailable(msg: impl Into<String>) -> RagError {
    RagError::EmbeddingUnavailable(msg.into())
}

fn http_client(config: &EmbeddingConfig) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("Failed to build HTTP client")
}

/// POST a JSON body, retrying 429/5xx/network failures with backoff.
async fn post_json_with_retry(
    label: &str,
    max_retries: u32,
    request: impl Fn() -> reqwest::RequestBuilder,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(backend = label, attempt, ?delay, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        match request().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json()
                        .await
                        .map_err(|e| unavailable(format!("{} response: {}", label, e)));
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(backend = label, %status, "transient embedding API error");
                    last_err = Some(format!("{} API error {}: {}", label, status, body_text));
                    continue;
                }

                return Err(unavailable(format!(
                    "{} API error {}: {}",
                    label, status, body_text
                )));
            }
            Err(e) => {
                warn!(backend = label, error = %e, "embedding request failed");
                last_err = Some(format!("{} connection error: {}", label, e));
            }
        }
    }

    Err(unavailable(last_err.unwrap_or_else(|| {
        format!("{} embedding failed after retries", label)
    })))
}

fn parse_float_array(value: &serde_json::Value, what: &str) -> Result<Vec<f32>> {
    let arr = value
        .as_array()
        .ok_or_else(|| unavailable(format!("Invalid response: {} is not an array", what)))?;
    arr.iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                unavailable(format!("Invalid response: {} holds non-numeric {}", what, v))
            })
        })
        .collect()
}

// ============ OpenAI ============

/// Embedder using the OpenAI API (`POST /v1/embeddings`).
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not configured, or if
    /// `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .context("embedding.model required for OpenAI provider")?;
        let dims = config
            .dims
            .context("embedding.dims required for OpenAI provider")?;
        let api_key =
            std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY environment variable not set")?;

        Ok(Self {
            model,
            dims,
            api_key,
            max_retries: config.max_retries,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json_with_retry("OpenAI", self.max_retries, || {
            self.client
                .post("https://api.openai.com/v1/embeddings")
                .bearer_auth(&self.api_key)
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
        .ok_or_else(|| unavailable("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (fallback, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(fallback);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| unavailable("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, parse_float_array(embedding, "embedding")?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Embedder using a local Ollama instance (`POST {url}/api/embed`).
///
/// Default URL: `http://localhost:11434`.
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .context("embedding.model required for Ollama provider")?;
        let dims = config
            .dims
            .context("embedding.dims required for Ollama provider")?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            dims,
            url,
            max_retries: config.max_retries,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let endpoint = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let json = post_json_with_retry("Ollama", self.max_retries, || {
            self.client.post(&endpoint).json(&body)
        })
        .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| unavailable("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|e| parse_float_array(e, "embedding"))
        .collect()
}

// ============ Local (fastembed) ============

/// Local sentence-transformer inference through fastembed.
///
/// The model is downloaded from Hugging Face on first use and cached.
/// It is loaded once in [`LocalEmbedder::load`] and shared by every call;
/// inference runs on the blocking thread pool.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub async fn load(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());
        let (fastembed_model, native_dims) = resolve_local_model(&model_name)?;
        if let Some(dims) = config.dims {
            if dims != native_dims {
                bail!(
                    "embedding.dims = {} but model '{}' produces {} dimensions",
                    dims,
                    model_name,
                    native_dims
                );
            }
        }

        let model = tokio::task::spawn_blocking(move || {
            fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
            )
            .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))
        })
        .await??;

        tracing::info!(model = %model_name, dims = native_dims, "local embedding model loaded");

        Ok(Self {
            model_name,
            dims: native_dims,
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

/// Local models and their native output width.
const LOCAL_MODELS: &[(&str, usize)] = &[
    ("all-minilm-l6-v2", 384),
    ("bge-small-en-v1.5", 384),
    ("bge-base-en-v1.5", 768),
    ("bge-large-en-v1.5", 1024),
    ("multilingual-e5-small", 384),
];

fn local_model_dims(name: &str) -> anyhow::Result<usize> {
    LOCAL_MODELS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, dims)| *dims)
        .with_context(|| {
            let names: Vec<&str> = LOCAL_MODELS.iter().map(|(n, _)| *n).collect();
            format!(
                "Unknown local embedding model: '{}'. Supported models: {}",
                name,
                names.join(", ")
            )
        })
}

#[cfg(feature = "local-embeddings-fastembed")]
fn resolve_local_model(name: &str) -> anyhow::Result<(fastembed::EmbeddingModel, usize)> {
    let dims = local_model_dims(name)?;
    let model = match name {
        "all-minilm-l6-v2" => fastembed::EmbeddingModel::AllMiniLML6V2,
        "bge-small-en-v1.5" => fastembed::EmbeddingModel::BGESmallENV15,
        "bge-base-en-v1.5" => fastembed::EmbeddingModel::BGEBaseENV15,
        "bge-large-en-v1.5" => fastembed::EmbeddingModel::BGELargeENV15,
        "multilingual-e5-small" => fastembed::EmbeddingModel::MultilingualE5Small,
        other => bail!("Unknown local embedding model: '{}'", other),
    };
    Ok((model, dims))
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| unavailable("local embedding model lock poisoned"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| unavailable(format!("Local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| unavailable(format!("Local embedding task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.5, 0.5]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.5, 0.5]]);
    }

    #[test]
    fn test_parse_openai_response_missing_data() {
        let err = parse_openai_response(&serde_json::json!({"error": "x"})).unwrap_err();
        assert!(matches!(err, RagError::EmbeddingUnavailable(_)));
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({"embeddings": [[0.1, 0.2], [0.3, 0.4]]});
        let vecs = parse_ollama_response(&json).unwrap();
        assert_eq!(vecs.len(), 2);
        assert!((vecs[1][1] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_parse_ollama_response_rejects_non_array() {
        let json = serde_json::json!({"embeddings": ["nope"]});
        assert!(parse_ollama_response(&json).is_err());
    }

    #[test]
    fn test_non_numeric_embedding_value_rejected() {
        let json = serde_json::json!({"embeddings": [[0.1, "0.2", null]]});
        let err = parse_ollama_response(&json).unwrap_err();
        assert!(matches!(err, RagError::EmbeddingUnavailable(_)));

        let json = serde_json::json!({"data": [{"index": 0, "embedding": [1.0, true]}]});
        assert!(matches!(
            parse_openai_response(&json),
            Err(RagError::EmbeddingUnavailable(_))
        ));
    }

    #[test]
    fn test_expected_dims() {
        let mut config = EmbeddingConfig::default();
        assert_eq!(expected_dims(&config).unwrap(), 384);

        config.model = Some("bge-base-en-v1.5".to_string());
        assert_eq!(expected_dims(&config).unwrap(), 768);

        config.model = Some("no-such-model".to_string());
        assert!(expected_dims(&config).is_err());

        config.dims = Some(1536);
        assert_eq!(expected_dims(&config).unwrap(), 1536);
    }

    #[tokio::test]
    async fn test_create_hash_embedder() {
        let config = EmbeddingConfig {
            provider: "hash".to_string(),
            dims: Some(32),
            ..Default::default()
        };
        let embedder = create_embedder(&config).await.unwrap();
        assert_eq!(embedder.dims(), 32);
        assert_eq!(embedder.model_name(), HashingEmbedder::MODEL_NAME);
    }

    #[tokio::test]
    async fn test_unknown_provider_fails() {
        let config = EmbeddingConfig {
            provider: "nope".to_string(),
            ..Default::default()
        };
        assert!(create_embedder(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_ollama_unreachable_is_unavailable() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            dims: Some(768),
            url: Some("http://127.0.0.1:9".to_string()),
            max_retries: 0,
            timeout_secs: 2,
            ..Default::default()
        };
        let embedder = OllamaEmbedder::new(&config).unwrap();
        let err = embedder.encode(&["hi".to_string()]).await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingUnavailable(_)));
    }
}
