//! Embedding service abstraction and implementations.
//!
//! Defines the [`EmbeddingService`] trait and the [`OpenAiEmbeddings`]
//! client, plus vector utilities used by the SQLite vector index:
//! - [`cosine_similarity`]: similarity between two embedding vectors
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for a BLOB column
//! - [`blob_to_vec`]: decode a BLOB back into a `Vec<f32>`
//!
//! # Retry Strategy
//!
//! The OpenAI client retries transient transport failures only, up to
//! `embedding.max_retries` times:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! A request that still fails surfaces as [`Error::EmbeddingService`] and
//! aborts the current analyze request; nothing above this layer retries.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// A hosted or local model that maps text to fixed-size vectors.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts. The result has one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(service: &dyn EmbeddingService, text: &str) -> Result<Vec<f32>> {
    let results = service.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| Error::EmbeddingService("empty embedding response".to_string()))
}

/// Embed `texts` in batches of `batch_size`, keeping a 1:1 correspondence
/// between inputs and output vectors.
pub async fn embed_in_batches(
    service: &dyn EmbeddingService,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(texts.len());
    for (i, batch) in texts.chunks(batch_size.max(1)).enumerate() {
        let embedded = service.embed(batch).await?;
        if embedded.len() != batch.len() {
            return Err(Error::EmbeddingService(format!(
                "batch {} returned {} vectors for {} inputs",
                i,
                embedded.len(),
                batch.len()
            )));
        }
        tracing::debug!(batch = i, size = batch.len(), "embedded batch");
        vectors.extend(embedded);
    }
    Ok(vectors)
}

// ============ OpenAI ============

/// Embedding client for the OpenAI `POST /embeddings` endpoint.
///
/// Requires the `OPENAI_API_KEY` environment variable (or an explicit key via
/// [`OpenAiEmbeddings::with_api_key`]).
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OpenAiEmbeddings {
    /// Create a client from configuration, reading `OPENAI_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns an error if `OPENAI_API_KEY` is not set or the HTTP client
    /// cannot be built.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            Error::EmbeddingService("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::EmbeddingService(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dims: config.dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingService for OpenAiEmbeddings {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::warn!(attempt, ?delay, "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/embeddings", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: EmbeddingResponse = response
                            .json()
                            .await
                            .map_err(|e| Error::EmbeddingService(format!("bad response: {}", e)))?;
                        return into_ordered_vectors(parsed, texts.len());
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = Error::EmbeddingService(format!(
                        "OpenAI API error {}: {}",
                        status, body_text
                    ));

                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(Error::EmbeddingService(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::EmbeddingService("embedding failed after retries".into())))
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Order `data[]` by its `index` field and check the count matches the input.
fn into_ordered_vectors(mut parsed: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>> {
    if parsed.data.len() != expected {
        return Err(Error::EmbeddingService(format!(
            "expected {} embeddings, got {}",
            expected,
            parsed.data.len()
        )));
    }
    parsed.data.sort_by_key(|item| item.index);
    Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
}

// ============ Vector utilities ============

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

/// Cosine similarity in `[-1.0, 1.0]`. Returns `0.0` for empty vectors,
/// zero vectors, or vectors of different lengths.
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
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer, max_retries: u32) -> EmbeddingConfig {
        EmbeddingConfig {
            base_url: server.uri(),
            max_retries,
            dims: 3,
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_openai_orders_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("Authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0, 0.0]},
                    {"index": 0, "embedding": [1.0, 0.0, 0.0]}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            OpenAiEmbeddings::with_api_key(&config_for(&server, 0), "sk-test".into()).unwrap();
        let vectors = client
            .embed(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
    }

    #[tokio::test]
    async fn test_openai_client_error_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            OpenAiEmbeddings::with_api_key(&config_for(&server, 3), "sk-test".into()).unwrap();
        let err = client.embed(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::EmbeddingService(ref m) if m.contains("bad model")));
    }

    #[tokio::test]
    async fn test_openai_server_error_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [0.5, 0.5, 0.0]}]
            })))
            .mount(&server)
            .await;

        let client =
            OpenAiEmbeddings::with_api_key(&config_for(&server, 1), "sk-test".into()).unwrap();
        let vectors = client.embed(&["x".to_string()]).await.unwrap();
        assert_eq!(vectors.len(), 1);
    }

    #[tokio::test]
    async fn test_openai_count_mismatch_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [1.0, 0.0, 0.0]}]
            })))
            .mount(&server)
            .await;

        let client =
            OpenAiEmbeddings::with_api_key(&config_for(&server, 0), "sk-test".into()).unwrap();
        let err = client
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmbeddingService(_)));
    }

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingService for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }
    }

    #[tokio::test]
    async fn test_embed_in_batches_preserves_order() {
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
        };
        let texts: Vec<String> = (1..=7).map(|n| "x".repeat(n)).collect();
        let vectors = embed_in_batches(&embedder, &texts, 3).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        let lens: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(lens, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    }
}
