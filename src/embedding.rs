//! Embedding client and vector utilities.
//!
//! The embedding function is an external collaborator reached over an
//! OpenAI-compatible `POST {base}/embeddings` endpoint. It is assumed
//! deterministic and consistent across calls; index validity depends on it.
//!
//! Also provides the vector helpers shared by the index and the store:
//! - [`cosine_similarity`] — similarity between two embedding vectors
//! - [`vec_to_blob`] — encode a `Vec<f32>` as little-endian bytes for SQLite
//! - [`blob_to_vec`] — decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Retry Strategy
//!
//! Transient failures are retried with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::errors::IndexError;

/// Text-to-vector collaborator. The HTTP client implements this; tests use
/// deterministic in-process embedders.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        let results = self.embed(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::Embedding("empty embedding response".to_string()))
    }

    /// Vector dimensionality this embedder produces.
    fn dims(&self) -> usize;
}

/// Embedding client for an OpenAI-compatible endpoint.
pub struct HttpEmbedder {
    config: EmbeddingConfig,
    client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IndexError::Embedding(e.to_string()))?;

        Ok(Self {
            config: config.clone(),
            client,
        })
    }

    async fn call_endpoint(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.config.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(&url).json(&body);
            // Local servers don't need a key; forward one when provided.
            if let Ok(key) = std::env::var("LOOM_API_KEY") {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| IndexError::Embedding(e.to_string()))?;
                        return parse_embedding_response(&json, texts.len());
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(IndexError::Embedding(format!(
                            "embedding server error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(IndexError::Embedding(format!(
                        "embedding server error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(IndexError::Embedding(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| IndexError::Embedding("embedding failed after retries".to_string())))
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let vectors = self.call_endpoint(batch).await?;
            all.extend(vectors);
        }
        Ok(all)
    }

    fn dims(&self) -> usize {
        self.config.dims
    }
}

/// Parse an OpenAI-style embeddings response: `data[].embedding`, ordered by
/// `data[].index` to match input order.
fn parse_embedding_response(
    json: &serde_json::Value,
    expected: usize,
) -> Result<Vec<Vec<f32>>, IndexError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| IndexError::Embedding("invalid response: missing data array".to_string()))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());

    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| IndexError::Embedding("invalid response: missing embedding".to_string()))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);

        indexed.push((index, vec));
    }

    if indexed.len() != expected {
        return Err(IndexError::Embedding(format!(
            "embedding count mismatch: sent {}, got {}",
            expected,
            indexed.len()
        )));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or vectors of
/// different lengths.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_empty_and_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_parse_response_reorders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] },
            ]
        });
        let vectors = parse_embedding_response(&json, 2).unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0]);
        assert_eq!(vectors[1], vec![0.0, 1.0]);
    }

    #[test]
    fn test_parse_response_count_mismatch() {
        let json = serde_json::json!({
            "data": [ { "index": 0, "embedding": [1.0] } ]
        });
        assert!(parse_embedding_response(&json, 2).is_err());
    }

    #[test]
    fn test_parse_response_missing_data() {
        let json = serde_json::json!({ "error": "nope" });
        assert!(parse_embedding_response(&json, 1).is_err());
    }
}
