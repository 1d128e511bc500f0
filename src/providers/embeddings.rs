// Embedding provider — HTTP client for an OpenAI-style /embeddings
// endpoint.
//
// The provider must return the same dimensionality for every call within a
// registry's lifetime; the registry enforces that with DimensionMismatch.
// This client only guarantees order: vectors come back aligned with the
// input texts regardless of the order the API listed them in.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::traits::EmbeddingProvider;

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRecord>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRecord {
    index: usize,
    embedding: Vec<f64>,
}

/// Embedding client for an OpenAI-compatible API.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpEmbeddingProvider {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("groundswell/0.1 (review-trend-analysis)")
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Embedding API request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API returned {}: {}", status, text);
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        if parsed.data.len() != texts.len() {
            anyhow::bail!(
                "Embedding API returned {} vectors for {} inputs",
                parsed.data.len(),
                texts.len()
            );
        }

        // Re-order by index — the API is not required to preserve input order
        let mut vectors: Vec<Option<Vec<f64>>> = vec![None; texts.len()];
        for record in parsed.data {
            let slot = vectors
                .get_mut(record.index)
                .with_context(|| format!("Embedding index {} out of range", record.index))?;
            *slot = Some(record.embedding);
        }
        let vectors: Vec<Vec<f64>> = vectors
            .into_iter()
            .enumerate()
            .map(|(i, v)| v.with_context(|| format!("Embedding missing for input {i}")))
            .collect::<Result<_>>()?;

        debug!(batch = texts.len(), "Computed embeddings");
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f64>> {
        let mut vectors = self.request(std::slice::from_ref(&text.to_string())).await?;
        Ok(vectors.remove(0))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }
}
