use crate::cache::EmbeddingCache;
use crate::embeddings::Embedder;
use crate::error::{Result, KgragError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/embeddings";

/// Request structure for OpenAI embeddings API
#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

/// Response structure from OpenAI embeddings API
#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI embeddings client for query text
///
/// Retries rate-limit and server errors with exponential backoff and
/// optionally caches query embeddings in an LRU.
pub struct OpenAIEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: Option<usize>,
    max_retries: usize,
    cache: Option<Arc<EmbeddingCache>>,
}

impl OpenAIEmbedder {
    /// # Errors
    ///
    /// Returns `KgragError::Config` if the HTTP client cannot be built
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| KgragError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key,
            model,
            dimensions: None,
            max_retries: 3,
            cache: None,
        })
    }

    /// Request a specific output dimension and reject responses that differ
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_cache(mut self, cache: Arc<EmbeddingCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Point at an OpenAI-compatible endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: vec![text],
            dimensions: self.dimensions,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| KgragError::EmbeddingUnavailable(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(KgragError::EmbeddingUnavailable(format!(
                "OpenAI API error {}: {}",
                status, body
            )));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| {
                KgragError::EmbeddingUnavailable(format!("Failed to parse response: {}", e))
            })?;

        let embedding = result
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| {
                KgragError::EmbeddingUnavailable("Empty response from OpenAI API".to_string())
            })?;

        if let Some(expected) = self.dimensions {
            if embedding.len() != expected {
                return Err(KgragError::EmbeddingUnavailable(format!(
                    "Unexpected embedding dimension: expected {}, got {}",
                    expected,
                    embedding.len()
                )));
            }
        }
        Ok(embedding)
    }

    async fn request_with_retry(&self, text: &str) -> Result<Vec<f32>> {
        let start = std::time::Instant::now();
        let mut attempt = 0;
        let mut delay = Duration::from_secs(1);

        loop {
            match self.request(text).await {
                Ok(embedding) => {
                    log::debug!(
                        "Embedding API call took {:?} (attempt {})",
                        start.elapsed(),
                        attempt + 1
                    );
                    return Ok(embedding);
                }
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    log::warn!("Retry {}/{} after error: {}", attempt + 1, self.max_retries, e);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// 429 rate limits and 5xx server errors are worth retrying
fn is_retryable(err: &KgragError) -> bool {
    let msg = err.to_string();
    ["429", "500", "502", "503", "504"].iter().any(|code| msg.contains(code))
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(&self.model, text) {
                log::debug!("Cache hit for query: {}", text);
                return Ok(cached);
            }
        }

        let embedding = self.request_with_retry(text).await?;

        if let Some(cache) = &self.cache {
            cache.put(&self.model, text, embedding.clone());
        }
        Ok(embedding)
    }
}
