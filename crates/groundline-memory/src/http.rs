//! Model-backed embeddings over an OpenAI-compatible HTTP endpoint.
//!
//! Enabled with the `http-embeddings` feature. Wrap the provider in a
//! [`FallbackEmbedder`](crate::FallbackEmbedder) so that an unreachable
//! model degrades to the deterministic local vectors.

use async_trait::async_trait;
use groundline_core::{GroundingError, GroundingResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::embedding::EmbeddingProvider;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embedding provider calling `POST {base_url}/v1/embeddings`.
pub struct HttpEmbedding {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
}

impl HttpEmbedding {
    /// Create a provider for `model` served at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> GroundingResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GroundingError::Http(format!("Failed to build client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            dimension,
        })
    }

    /// Attach a bearer token. Chainable builder method.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedding {
    async fn embed(&self, text: &str) -> GroundingResult<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let mut request = self.client.post(&url).json(&EmbeddingRequest {
            model: &self.model,
            input: text,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GroundingError::Http(format!("Embedding request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GroundingError::Http(format!(
                "Embedding endpoint returned {status}"
            )));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| GroundingError::Embedding(format!("Malformed embedding response: {e}")))?;

        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| GroundingError::Embedding("Empty embedding response".to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}
