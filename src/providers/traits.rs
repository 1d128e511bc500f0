// Provider traits — swap-ready abstractions over the external capabilities.
//
// The engine never relies on the extractor being consistent: it returns
// unstructured candidate strings and all consolidation lives in the
// deterministic matcher. Implementations are async because both providers
// are HTTP APIs.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A raw review as stored in the per-date data files
/// (`data/YYYY-MM-DD.json`, the shape the scraper writes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    #[serde(rename = "reviewId")]
    pub review_id: String,
    pub content: String,
    /// Star rating, when the source provides one.
    #[serde(default)]
    pub score: Option<u8>,
    /// Source timestamp (ISO 8601), informational only.
    #[serde(default)]
    pub at: Option<String>,
}

/// A candidate topic phrase extracted from one review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateTopic {
    pub label: String,
    pub review_id: String,
}

/// Extracts candidate topic phrases from a batch of reviews.
///
/// A review with no specific content simply yields no candidates; an empty
/// result is not an error.
#[async_trait]
pub trait TopicExtractor: Send + Sync {
    async fn extract_topics(&self, reviews: &[Review]) -> Result<Vec<CandidateTopic>>;
}

/// Maps text into a fixed-dimension embedding vector. Every call within a
/// registry's lifetime must return the same dimensionality — a change is a
/// configuration error surfaced by the registry, not something to migrate
/// around.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f64>>;

    /// Embed multiple texts, returning vectors in the same order.
    /// Default implementation calls `embed` sequentially — providers with
    /// a batch endpoint override this.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}
