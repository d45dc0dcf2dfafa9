//! Embedding client and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait and two implementations:
//! - **[`OpenAIProvider`]** — calls the OpenAI embeddings API with batching,
//!   retry, and exponential backoff.
//! - **[`OfflineProvider`]** — produces deterministic pseudo-embeddings
//!   derived from a SHA-256 hash of the text. Not semantically meaningful,
//!   but stable: the same text always yields the same vector. Used when no
//!   service is configured and as the degradation path when the real
//!   provider fails.
//!
//! Vector utilities:
//! - [`normalize_vector`] — L2 normalization (idempotent; zeros pass through)
//! - [`cosine_similarity`] — similarity between two vectors
//! - [`vec_to_blob`] / [`blob_to_vec`] — little-endian f32 encoding for
//!   SQLite BLOB storage
//!
//! # Retry Strategy
//!
//! The OpenAI provider retries transient errors with exponential backoff:
//! - HTTP 429 and 5xx → retry
//! - other HTTP 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::AssistError;

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Embedding dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Deterministic hash-based provider for offline and degraded operation.
pub struct OfflineProvider {
    dims: usize,
}

#[async_trait]
impl EmbeddingProvider for OfflineProvider {
    fn model_name(&self) -> &str {
        "offline-hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| fallback_embedding(t, self.dims))
            .collect())
    }
}

/// Embedding provider backed by the OpenAI API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    max_retries: u32,
    timeout_secs: u64,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        embed_openai(self, texts).await
    }
}

/// Create the provider named by the configuration.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "offline" => Ok(Box::new(OfflineProvider { dims: config.dims })),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Embed a single text, falling back to the deterministic pseudo-embedding
/// on any provider failure. The returned vector always has unit L2 norm.
///
/// # Errors
///
/// `InvalidArgument` when `text` is empty or whitespace-only. Provider
/// failures do not error; they degrade to the fallback.
pub async fn generate_embedding(
    config: &EmbeddingConfig,
    text: &str,
) -> Result<Vec<f32>, AssistError> {
    if text.trim().is_empty() {
        return Err(AssistError::InvalidArgument(
            "text must not be empty".to_string(),
        ));
    }

    let vec = match embed_texts(config, std::slice::from_ref(&text.to_string())).await {
        Ok(mut vecs) if !vecs.is_empty() => vecs.remove(0),
        _ => fallback_embedding(text, config.dims),
    };

    Ok(normalize_vector(&vec).unwrap_or(vec))
}

/// Embed a batch of texts in `config.batch_size` groups, returning a map
/// from text to unit-norm vector.
///
/// When a batch fails: with `skip_failures` the failing batch degrades to
/// fallback vectors and processing continues; without it the error surfaces
/// as `UpstreamUnavailable`.
pub async fn generate_embeddings(
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<HashMap<String, Vec<f32>>, AssistError> {
    let mut out = HashMap::with_capacity(texts.len());

    for batch in texts.chunks(config.batch_size.max(1)) {
        match embed_texts(config, batch).await {
            Ok(vecs) => {
                for (text, vec) in batch.iter().zip(vecs) {
                    let vec = normalize_vector(&vec).unwrap_or(vec);
                    out.insert(text.clone(), vec);
                }
            }
            Err(e) if config.skip_failures => {
                eprintln!("Warning: embedding batch failed, using fallback: {}", e);
                for text in batch {
                    out.insert(text.clone(), fallback_embedding(text, config.dims));
                }
            }
            Err(e) => return Err(AssistError::UpstreamUnavailable(e.to_string())),
        }
    }

    Ok(out)
}

/// Embed a batch via the configured backend. Unlike [`generate_embedding`],
/// this does not fall back; callers decide how to degrade.
pub async fn embed_texts(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let provider = create_provider(config)?;
    provider.embed(texts).await
}

/// Call the OpenAI embeddings API with retry/backoff.
async fn embed_openai(provider: &OpenAIProvider, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(provider.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": provider.model,
        "input": texts,
    });

    let mut last_err = None;

    for attempt in 0..=provider.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return parse_embedding_response(&json);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!("embedding API error {}: {}", status, body_text));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("embedding API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
}

fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing embedding"))?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }

    Ok(embeddings)
}

/// Deterministic pseudo-embedding: expand a SHA-256 digest of the text with
/// a counter until `dims` floats are produced, map each byte into [-1, 1],
/// then L2-normalize. Same text, same vector.
pub fn fallback_embedding(text: &str, dims: usize) -> Vec<f32> {
    let mut values = Vec::with_capacity(dims);
    let mut counter: u32 = 0;

    while values.len() < dims {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(counter.to_le_bytes());
        let digest = hasher.finalize();

        for byte in digest.iter() {
            if values.len() >= dims {
                break;
            }
            values.push((*byte as f32 / 127.5) - 1.0);
        }
        counter += 1;
    }

    normalize_vector(&values).unwrap_or(values)
}

/// Divide a vector by its L2 norm.
///
/// - empty input or non-finite elements → `None`
/// - all-zero vector → returned unchanged
/// - already-normalized input → same vector within float tolerance
pub fn normalize_vector(vector: &[f32]) -> Option<Vec<f32>> {
    if vector.is_empty() || vector.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return Some(vector.to_vec());
    }

    Some(vector.iter().map(|v| v / norm).collect())
}

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two vectors, in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
