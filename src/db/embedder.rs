//! Text embedding for knowledge search

use std::time::Duration;

use async_trait::async_trait;

use crate::{Error, Result};

/// Embedding dimension for text-embedding-3-small
pub const EMBEDDING_DIM: usize = 1536;

/// Hard cap on one embedding request
const EMBED_TIMEOUT: Duration = Duration::from_secs(15);

/// Anything that can turn text into an embedding vector
///
/// The retrieval pipeline and the knowledge admin surface depend on this
/// trait, so tests can swap in a scripted model without network access.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Generate an embedding for a single text
    ///
    /// # Errors
    ///
    /// Returns error if the model call fails
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Text embedder backed by an `OpenAI`-compatible embeddings API
#[derive(Debug, Clone)]
pub struct Embedder {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl Embedder {
    /// Create a new embedder
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty or the HTTP client cannot be
    /// built
    pub fn new(api_base: String, api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("API key required for embeddings".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::builder().timeout(EMBED_TIMEOUT).build()?,
            api_base,
            api_key,
            model,
        })
    }

    /// Generate embeddings for multiple texts
    ///
    /// # Errors
    ///
    /// Returns error if API call fails
    pub async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        #[derive(serde::Serialize)]
        struct EmbeddingRequest<'a> {
            model: &'a str,
            input: &'a [&'a str],
        }

        #[derive(serde::Deserialize)]
        struct EmbeddingResponse {
            data: Vec<EmbeddingData>,
        }

        #[derive(serde::Deserialize)]
        struct EmbeddingData {
            embedding: Vec<f32>,
            index: usize,
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let url = format!("{}/embeddings", self.api_base.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!("embedding API error {status}: {body}")));
        }

        let mut result: EmbeddingResponse = response.json().await?;

        // Sort by index to maintain input order
        result.data.sort_by_key(|d| d.index);

        Ok(result.data.into_iter().map(|d| d.embedding).collect())
    }

    /// Serialize embedding to bytes for `SQLite` storage
    #[must_use]
    pub fn to_bytes(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Deserialize embedding from bytes
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| {
                let arr: [u8; 4] = chunk.try_into().unwrap_or([0; 4]);
                f32::from_le_bytes(arr)
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingModel for Embedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed_batch(&[text]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("empty embedding response".to_string()))
    }
}
