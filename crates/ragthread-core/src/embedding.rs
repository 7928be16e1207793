//! Embedder trait and vector utilities.
//!
//! Defines the [`Embedder`] capability that every embedding backend
//! implements, the deterministic [`HashingEmbedder`] used offline and in
//! tests, and the pure helpers for vector encoding and distance.
//!
//! Model-backed embedders (fastembed, OpenAI, Ollama) live in the
//! `ragthread` app crate.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};

/// Maps a batch of strings to fixed-width vectors.
///
/// Implementations must return exactly one vector per input, in input
/// order, each of length [`dims`](Embedder::dims). Identical input under the
/// same model must produce identical output.
///
/// Embedders are built once at startup and shared behind an `Arc`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;

    /// Returns the output dimensionality (e.g. `384`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts.
    ///
    /// # Errors
    ///
    /// [`RagError::EmbeddingUnavailable`] when the backend cannot serve
    /// the request.
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a batch and check the response shape against the request.
///
/// Backends that return too few vectors or vectors of the wrong width are
/// reported as [`RagError::EmbeddingUnavailable`].
pub async fn encode_checked(embedder: &dyn Embedder, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let vectors = embedder.encode(texts).await?;
    if vectors.len() != texts.len() {
        return Err(RagError::EmbeddingUnavailable(format!(
            "{} returned {} vectors for {} inputs",
            embedder.model_name(),
            vectors.len(),
            texts.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != embedder.dims()) {
        return Err(RagError::EmbeddingUnavailable(format!(
            "{} returned a {}-dimensional vector, expected {}",
            embedder.model_name(),
            bad.len(),
            embedder.dims()
        )));
    }
    Ok(vectors)
}

/// Embed a single query text.
pub async fn encode_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let mut vectors = encode_checked(embedder, &[text.to_string()]).await?;
    vectors
        .pop()
        .ok_or_else(|| RagError::EmbeddingUnavailable("empty embedding response".to_string()))
}

/// Deterministic bag-of-words embedder based on feature hashing.
///
/// Each lowercase alphanumeric token is hashed with SHA-256 into a bucket
/// and a sign; the bucket counts are L2-normalised. Texts sharing vocabulary
/// land close together, identical texts land at distance zero. No model
/// files or network access are involved.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub const MODEL_NAME: &'static str = "feature-hash-v1";

    pub fn new(dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(RagError::InvalidConfiguration(
                "embedding dims must be > 0".to_string(),
            ));
        }
        Ok(Self { dims })
    }

    /// Embed one text synchronously.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) % self.dims as u64;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket as usize] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        Self::MODEL_NAME
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Squared Euclidean distance, the metric of a flat L2 index.
///
/// Callers must pass equal-length slices.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Encode a float vector as little-endian `f32` bytes.
///
/// # Example
///
/// ```rust
/// use ragthread_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian `f32` bytes back into a float vector.
///
/// Reverses [`vec_to_blob`]; trailing bytes that do not fill a whole
/// `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
