// src/embeddings.rs
// Embedding client: text -> unit vector of fixed dimension

use anyhow::{Context, Result, anyhow};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

/// Max characters to embed (model context cap; longer input is truncated)
pub const MAX_TEXT_CHARS: usize = 32_000;

/// Batch group size for embed_many
const BATCH_SIZE: usize = 10;

/// Retry attempts for the API backend
const RETRY_ATTEMPTS: usize = 2;

/// A computed embedding with its dimension
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub dimensions: usize,
}

/// Backend-specific embedding implementation
enum EmbeddingBackend {
    /// OpenAI-compatible /embeddings endpoint
    Api {
        http_client: reqwest::Client,
        api_url: String,
        api_key: Option<String>,
        model: String,
    },
    /// Deterministic local vectors derived from a content hash. No network;
    /// used for tests and keyless deployments. Not semantic.
    Hashed,
}

/// Embedding client with a fixed output dimension.
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
    dimensions: usize,
}

impl EmbeddingClient {
    /// Create a client for an OpenAI-compatible embeddings endpoint.
    pub fn api(
        http_client: reqwest::Client,
        api_url: String,
        api_key: Option<String>,
        model: String,
        dimensions: usize,
    ) -> Self {
        Self {
            backend: EmbeddingBackend::Api {
                http_client,
                api_url,
                api_key,
                model,
            },
            dimensions,
        }
    }

    /// Create a deterministic hash-backed client (tests, offline mode).
    pub fn hashed(dimensions: usize) -> Self {
        Self {
            backend: EmbeddingBackend::Hashed,
            dimensions,
        }
    }

    pub fn provider_id(&self) -> &'static str {
        match &self.backend {
            EmbeddingBackend::Api { .. } => "api",
            EmbeddingBackend::Hashed => "hashed",
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed a single text. Input is truncated to MAX_TEXT_CHARS and the
    /// result is normalized to unit L2 if the upstream model did not.
    pub async fn embed(&self, text: &str) -> Result<Embedding> {
        let text = truncate_chars(text, MAX_TEXT_CHARS);

        let mut vector = match &self.backend {
            EmbeddingBackend::Api {
                http_client,
                api_url,
                api_key,
                model,
            } => embed_api(http_client, api_url, api_key.as_deref(), model, text, self.dimensions).await?,
            EmbeddingBackend::Hashed => hashed_embedding(text, self.dimensions),
        };

        normalize(&mut vector);
        Ok(Embedding {
            dimensions: vector.len(),
            vector,
        })
    }

    /// Embed multiple texts, in groups of ten, preserving input order.
    pub async fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut results = Vec::with_capacity(texts.len());
        for group in texts.chunks(BATCH_SIZE) {
            let futures: Vec<_> = group.iter().map(|t| self.embed(t)).collect();
            for result in futures::future::join_all(futures).await {
                results.push(result?);
            }
        }
        Ok(results)
    }
}

/// Truncate at a char boundary without allocating when short enough.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            debug!("truncating embedding input from {} to {} chars", text.len(), max_chars);
            &text[..idx]
        }
        None => text,
    }
}

/// Scale a vector to unit L2 in place. Zero vectors are left alone.
fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 && (norm - 1.0).abs() > 1e-4 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

async fn embed_api(
    http_client: &reqwest::Client,
    api_url: &str,
    api_key: Option<&str>,
    model: &str,
    text: &str,
    dimensions: usize,
) -> Result<Vec<f32>> {
    let body = serde_json::json!({
        "model": model,
        "input": text,
    });

    let mut last_error = None;
    for attempt in 0..=RETRY_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        let mut request = http_client.post(api_url).json(&body);
        if let Some(key) = api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                let json: serde_json::Value =
                    response.json().await.context("embedding response body")?;
                let values = json["data"]
                    .as_array()
                    .and_then(|data| data.first())
                    .and_then(|first| first["embedding"].as_array())
                    .ok_or_else(|| anyhow!("invalid embedding response shape"))?;
                let vector: Vec<f32> = values
                    .iter()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect();
                if vector.len() != dimensions {
                    return Err(anyhow!(
                        "embedding dimension mismatch: got {}, expected {}",
                        vector.len(),
                        dimensions
                    ));
                }
                return Ok(vector);
            }
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                last_error = Some(anyhow!("embedding API error {}: {}", status, text));
            }
            Err(e) => {
                last_error = Some(e.into());
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("embedding request failed")))
}

/// Deterministic pseudo-embedding from a SHA-256 stream over the input.
/// Identical text always maps to the identical unit vector.
fn hashed_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = Vec::with_capacity(dimensions);
    let mut counter: u32 = 0;
    let mut block = [0u8; 32];
    let mut offset = block.len();

    for _ in 0..dimensions {
        if offset >= block.len() {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            block = hasher.finalize().into();
            counter += 1;
            offset = 0;
        }
        let byte = block[offset];
        offset += 1;
        vector.push((byte as f32 / 255.0) * 2.0 - 1.0);
    }

    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hashed_embedding_deterministic() {
        let client = EmbeddingClient::hashed(64);
        let a = client.embed("hello world").await.unwrap();
        let b = client.embed("hello world").await.unwrap();
        assert_eq!(a.vector, b.vector);
        assert_eq!(a.dimensions, 64);
    }

    #[tokio::test]
    async fn test_hashed_embedding_distinct_texts_differ() {
        let client = EmbeddingClient::hashed(64);
        let a = client.embed("alpha").await.unwrap();
        let b = client.embed("beta").await.unwrap();
        assert_ne!(a.vector, b.vector);
    }

    #[tokio::test]
    async fn test_embeddings_are_unit_length() {
        let client = EmbeddingClient::hashed(128);
        let e = client.embed("some memory content").await.unwrap();
        let norm: f32 = e.vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_truncation_cap() {
        let client = EmbeddingClient::hashed(32);
        let long = "x".repeat(MAX_TEXT_CHARS + 5_000);
        let truncated = client.embed(&long).await.unwrap();
        let exact = client.embed(&"x".repeat(MAX_TEXT_CHARS)).await.unwrap();
        assert_eq!(truncated.vector, exact.vector);
    }

    #[tokio::test]
    async fn test_embed_many_preserves_order() {
        let client = EmbeddingClient::hashed(32);
        let texts: Vec<String> = (0..25).map(|i| format!("text {i}")).collect();
        let batch = client.embed_many(&texts).await.unwrap();
        assert_eq!(batch.len(), 25);
        for (i, e) in batch.iter().enumerate() {
            let single = client.embed(&texts[i]).await.unwrap();
            assert_eq!(e.vector, single.vector);
        }
    }

    #[test]
    fn test_truncate_chars_multibyte_safe() {
        let text = "é".repeat(10);
        assert_eq!(truncate_chars(&text, 4).chars().count(), 4);
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
