//! Query-time embedding.
//!
//! Indexing-time embedding lives in the ingestion pipeline, outside this
//! crate; the loop only ever embeds short search queries. The production
//! implementation talks to an OpenAI-compatible `/v1/embeddings` endpoint
//! serving the Chinese BGE model.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Dense-vector embedder of fixed dimension.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// The fixed output dimension.
    fn dim(&self) -> usize;
}

/// HTTP embedder against an OpenAI-compatible embeddings endpoint.
pub struct HttpEmbedder {
    endpoint: String,
    model: String,
    dim: usize,
    http: Client,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, dim: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            dim,
            http: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingApiRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingApiData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiData {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.endpoint.trim_end_matches('/'));

        let response = self
            .http
            .post(&url)
            .json(&EmbeddingApiRequest {
                model: self.model.clone(),
                input: vec![text.to_string()],
            })
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Embedding(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(Error::Embedding(format!("({}): {}", status, body)));
        }

        let api_response: EmbeddingApiResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Embedding(format!("failed to parse response: {}", e)))?;

        let vector = api_response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::Embedding("empty embedding response".to_string()))?;

        if vector.len() != self.dim {
            return Err(Error::Embedding(format!(
                "dimension mismatch: expected {}, got {}",
                self.dim,
                vector.len()
            )));
        }

        Ok(vector)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Deterministic in-process embedder for tests.

    use super::*;
    use sha2::{Digest, Sha256};

    /// Hashes the input into a stable pseudo-vector; equal texts embed
    /// equally, which is all the dedup/fallback tests need.
    pub struct HashEmbedder {
        pub dim: usize,
    }

    impl HashEmbedder {
        pub fn new(dim: usize) -> Self {
            Self { dim }
        }
    }

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let digest = Sha256::digest(text.as_bytes());
            Ok((0..self.dim)
                .map(|i| digest[i % digest.len()] as f32 / 255.0)
                .collect())
        }

        fn dim(&self) -> usize {
            self.dim
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::HashEmbedder;
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_hash_embedder_is_stable() {
        let embedder = HashEmbedder::new(8);
        let a = embedder.embed("少女").await.unwrap();
        let b = embedder.embed("少女").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[tokio::test]
    async fn test_hash_embedder_distinguishes_texts() {
        let embedder = HashEmbedder::new(8);
        let a = embedder.embed("少女").await.unwrap();
        let b = embedder.embed("旅行者").await.unwrap();
        assert_ne!(a, b);
    }
}
