use std::env;

use anyhow::Result;

use crate::matcher::{BorderlinePolicy, MatcherConfig};

/// Central configuration loaded from environment variables.
///
/// All secrets come from env vars (never hardcoded). The .env file
/// is loaded automatically at startup via dotenvy.
pub struct Config {
    /// SQLite database path — holds the taxonomy, daily stats, and queues.
    pub db_path: String,
    /// Directory with per-date review files (data/YYYY-MM-DD.json).
    pub data_dir: String,
    /// Directory trend reports are written into.
    pub report_dir: String,

    /// OpenAI-compatible chat-completions endpoint for topic extraction.
    pub extractor_api_url: String,
    pub extractor_api_key: String,
    pub extractor_model: String,

    /// OpenAI-compatible embeddings endpoint.
    pub embedding_api_url: String,
    pub embedding_api_key: String,
    pub embedding_model: String,

    /// Consolidation thresholds and borderline policy.
    pub matcher: MatcherConfig,
    /// Max mentions counted per (topic, review) pair per day.
    pub per_review_cap: u64,
    /// Trend window length in days.
    pub window_days: usize,
    /// Spike multiplier over the other-day mean.
    pub spike_factor: f64,
    /// Reviews per extractor request.
    pub chunk_size: usize,
    /// Concurrent provider requests per batch.
    pub concurrency: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Only paths and tuning knobs have defaults — the provider endpoints
    /// and keys are required for anything beyond `init`, `report`, and
    /// `status`.
    pub fn load() -> Result<Self> {
        let borderline_policy = match env::var("GROUNDSWELL_BORDERLINE_POLICY").as_deref() {
            Ok(s) => BorderlinePolicy::from_env_str(s).ok_or_else(|| {
                anyhow::anyhow!(
                    "GROUNDSWELL_BORDERLINE_POLICY must be 'queue' or 'auto-merge', got '{s}'"
                )
            })?,
            // unset defaults to the review queue — auto-merge is opt-in
            Err(_) => BorderlinePolicy::Queue,
        };

        let matcher = MatcherConfig {
            t_merge: parse_env("GROUNDSWELL_MERGE_THRESHOLD", 0.85)?,
            t_review: parse_env("GROUNDSWELL_REVIEW_THRESHOLD", 0.70)?,
            tie_epsilon: parse_env("GROUNDSWELL_TIE_EPSILON", 0.01)?,
            candidate_k: parse_env("GROUNDSWELL_CANDIDATE_K", 5usize)?,
            borderline_policy,
        };

        if matcher.t_review > matcher.t_merge {
            anyhow::bail!(
                "GROUNDSWELL_REVIEW_THRESHOLD ({}) must not exceed GROUNDSWELL_MERGE_THRESHOLD ({})",
                matcher.t_review,
                matcher.t_merge
            );
        }

        Ok(Self {
            db_path: env::var("GROUNDSWELL_DB_PATH")
                .unwrap_or_else(|_| "./groundswell.db".to_string()),
            data_dir: env::var("GROUNDSWELL_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            report_dir: env::var("GROUNDSWELL_REPORT_DIR")
                .unwrap_or_else(|_| "./output".to_string()),
            extractor_api_url: env::var("EXTRACTOR_API_URL")
                .unwrap_or_else(|_| "https://api.groq.com/openai/v1".to_string()),
            extractor_api_key: env::var("EXTRACTOR_API_KEY").unwrap_or_default(),
            extractor_model: env::var("EXTRACTOR_MODEL")
                .unwrap_or_else(|_| "llama-3.3-70b-versatile".to_string()),
            embedding_api_url: env::var("EMBEDDING_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            embedding_api_key: env::var("EMBEDDING_API_KEY").unwrap_or_default(),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            matcher,
            per_review_cap: parse_env("GROUNDSWELL_PER_REVIEW_CAP", 1u64)?,
            window_days: parse_env("GROUNDSWELL_WINDOW_DAYS", 7usize)?,
            spike_factor: parse_env("GROUNDSWELL_SPIKE_FACTOR", 2.0)?,
            chunk_size: parse_env("GROUNDSWELL_CHUNK_SIZE", 20usize)?,
            concurrency: parse_env("GROUNDSWELL_CONCURRENCY", 4usize)?,
        })
    }

    /// Check that the provider credentials are configured.
    /// Call this before any operation that processes a batch.
    pub fn require_providers(&self) -> Result<()> {
        if self.extractor_api_key.is_empty() {
            anyhow::bail!(
                "EXTRACTOR_API_KEY not set. Add it to your .env file.\n\
                 See .env.example for the required variables."
            );
        }
        if self.embedding_api_key.is_empty() {
            anyhow::bail!(
                "EMBEDDING_API_KEY not set. Add it to your .env file.\n\
                 See .env.example for the required variables."
            );
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {key}='{raw}': {e}")),
        Err(_) => Ok(default),
    }
}
