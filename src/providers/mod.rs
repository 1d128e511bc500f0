// External capabilities — the LLM topic extractor and the embedding
// provider, plus the retry/throttling shared by both.

pub mod embeddings;
pub mod extractor;
pub mod retry;
pub mod traits;

pub use traits::{CandidateTopic, EmbeddingProvider, Review, TopicExtractor};
