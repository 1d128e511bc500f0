// Daily batch pipeline: consolidate one date's reviews into the taxonomy.
//
// Stages: load the date's review file, extract candidate topics chunk by
// chunk, embed the candidate labels, then run every candidate through the
// deduplication matcher sequentially and overwrite the date's stats.
//
// Provider calls (extraction, embeddings) run concurrently with retries;
// registry mutation is strictly sequential so each candidate's similarity
// search observes every topic created earlier in the batch. A chunk that
// exhausts retries lands its reviews in the unprocessed ledger and the run
// continues — one flaky provider response must not lose the day.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::db::queries;
use crate::matcher::{DeduplicationMatcher, MatchDecision, MatcherConfig};
use crate::providers::retry::{with_retry, RateLimiter};
use crate::providers::{CandidateTopic, EmbeddingProvider, Review, TopicExtractor};
use crate::registry::{RegistryError, TopicRegistry};
use crate::stats::{DailyObservation, DailyStatsAggregator};

/// Labels per embedding request.
const EMBED_BATCH: usize = 64;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub matcher: MatcherConfig,
    pub per_review_cap: u64,
    /// Reviews per extractor request.
    pub chunk_size: usize,
    /// Concurrent provider requests.
    pub concurrency: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            matcher: MatcherConfig::default(),
            per_review_cap: 1,
            chunk_size: 20,
            concurrency: 4,
        }
    }
}

/// What one `run` did, for the terminal summary.
#[derive(Debug, Default)]
pub struct ProcessSummary {
    pub reviews_loaded: usize,
    pub candidates: usize,
    pub matched: usize,
    pub low_confidence: usize,
    pub queued: usize,
    pub created: usize,
    pub unprocessed: usize,
    pub topics_counted: usize,
    pub mentions_counted: u64,
}

pub fn review_file_path(data_dir: &str, date: NaiveDate) -> PathBuf {
    Path::new(data_dir).join(format!("{date}.json"))
}

/// Load the reviews captured for one date.
pub fn load_reviews(data_dir: &str, date: NaiveDate) -> Result<Vec<Review>> {
    let path = review_file_path(data_dir, date);
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("No review file at {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid review JSON in {}", path.display()))
}

/// Process one date end to end.
///
/// Refuses a date that already has stats unless `force` is set; with it,
/// the date's stats, queue entries, and skip ledger are rebuilt from
/// scratch, so reprocessing the same inputs reproduces the same counts.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    registry: &mut TopicRegistry,
    extractor: &dyn TopicExtractor,
    embedder: &dyn EmbeddingProvider,
    rate_limiter: &RateLimiter,
    options: &PipelineOptions,
    data_dir: &str,
    date: NaiveDate,
    force: bool,
) -> Result<ProcessSummary> {
    if queries::date_is_processed(registry.connection(), date)? && !force {
        anyhow::bail!("{date} is already processed. Re-run with --force to rebuild it.");
    }

    let reviews = load_reviews(data_dir, date)?;
    info!(%date, reviews = reviews.len(), "Processing date");

    // A re-run starts the date clean
    queries::clear_pending_reviews_for_date(registry.connection(), date)?;
    queries::clear_unprocessed_for_date(registry.connection(), date)?;

    let mut summary = ProcessSummary {
        reviews_loaded: reviews.len(),
        ..ProcessSummary::default()
    };

    if reviews.is_empty() {
        queries::save_daily_stats(registry.connection_mut(), date, &BTreeMap::new())?;
        return Ok(summary);
    }

    // Stage 1: extract candidate topics, one request per chunk
    let chunks: Vec<&[Review]> = reviews.chunks(options.chunk_size.max(1)).collect();
    let pb = ProgressBar::new(chunks.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  Extracting [{bar:30}] {pos}/{len} ({eta})")
            .unwrap(),
    );

    let mut results: Vec<(usize, Result<Vec<CandidateTopic>>)> =
        stream::iter(chunks.iter().enumerate().map(|(i, chunk)| {
            let pb = pb.clone();
            async move {
                let out = with_retry(rate_limiter, || extractor.extract_topics(chunk)).await;
                pb.inc(1);
                (i, out)
            }
        }))
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await;
    pb.finish_and_clear();

    // Restore chunk order so later stages are deterministic
    results.sort_by_key(|(i, _)| *i);

    let mut candidates: Vec<CandidateTopic> = Vec::new();
    for (i, result) in results {
        match result {
            Ok(batch) => candidates.extend(batch),
            Err(e) => {
                warn!(chunk = i, error = %e, "Extraction failed after retries, skipping chunk");
                for review in chunks[i] {
                    queries::record_unprocessed_review(
                        registry.connection(),
                        date,
                        &review.review_id,
                        "topic extraction failed after retries",
                    )?;
                    summary.unprocessed += 1;
                }
            }
        }
    }
    summary.candidates = candidates.len();

    // Stage 2: embed each distinct label once
    let mut labels: Vec<String> = Vec::new();
    for c in &candidates {
        if !labels.contains(&c.label) {
            labels.push(c.label.clone());
        }
    }

    let mut embeddings: HashMap<String, Vec<f64>> = HashMap::new();
    let pb = ProgressBar::new(labels.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  Embedding [{bar:30}] {pos}/{len} ({eta})")
            .unwrap(),
    );
    for batch in labels.chunks(EMBED_BATCH) {
        match with_retry(rate_limiter, || embedder.embed_batch(batch)).await {
            Ok(vectors) => {
                for (label, vector) in batch.iter().zip(vectors) {
                    embeddings.insert(label.clone(), vector);
                }
            }
            Err(e) => {
                warn!(error = %e, "Embedding failed after retries, skipping batch");
            }
        }
        pb.inc(batch.len() as u64);
    }
    pb.finish_and_clear();

    // Stage 3: consolidate sequentially against the live registry
    let matcher = DeduplicationMatcher::new(options.matcher.clone());
    let mut observations: Vec<DailyObservation> = Vec::new();

    for candidate in &candidates {
        let Some(embedding) = embeddings.get(&candidate.label) else {
            queries::record_unprocessed_review(
                registry.connection(),
                date,
                &candidate.review_id,
                "embedding unavailable after retries",
            )?;
            summary.unprocessed += 1;
            continue;
        };

        let decision = match matcher.consolidate(
            registry,
            &candidate.label,
            embedding,
            date,
            &candidate.review_id,
        ) {
            Ok(decision) => decision,
            // A provider returning the wrong dimensionality is fatal for
            // this candidate, not for the batch
            Err(e)
                if matches!(
                    e.downcast_ref::<RegistryError>(),
                    Some(RegistryError::DimensionMismatch { .. })
                ) =>
            {
                warn!(label = %candidate.label, error = %e, "Embedding dimension mismatch, skipping candidate");
                queries::record_unprocessed_review(
                    registry.connection(),
                    date,
                    &candidate.review_id,
                    "embedding dimension mismatch",
                )?;
                summary.unprocessed += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        match &decision {
            MatchDecision::Matched { .. } => summary.matched += 1,
            MatchDecision::LowConfidenceMatch { .. } => summary.low_confidence += 1,
            MatchDecision::Queued { .. } => summary.queued += 1,
            MatchDecision::Created { .. } => summary.created += 1,
        }
        if let Some(topic_id) = decision.counted_topic() {
            observations.push(DailyObservation {
                topic_id,
                review_id: candidate.review_id.clone(),
            });
        }
    }

    // Stage 4: overwrite the date's stats in one transaction
    let counts = DailyStatsAggregator::new(options.per_review_cap).aggregate(&observations);
    summary.topics_counted = counts.len();
    summary.mentions_counted = counts.values().sum();
    queries::save_daily_stats(registry.connection_mut(), date, &counts)?;

    info!(
        %date,
        candidates = summary.candidates,
        created = summary.created,
        matched = summary.matched,
        queued = summary.queued,
        "Date processed"
    );
    Ok(summary)
}
