// Composition tests — the full daily pipeline with stubbed providers.
//
// These tests exercise the data flow between modules:
//   review file -> extraction -> embedding -> matcher -> daily stats -> trend matrix
// without any network calls. Providers are deterministic stubs, so the
// pipeline's own guarantees (idempotent reprocessing, zero-filled matrix,
// skip ledger on provider failure) are what is under test.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::Connection;

use groundswell::db::queries;
use groundswell::matcher::{BorderlinePolicy, MatcherConfig};
use groundswell::pipeline::{self, PipelineOptions};
use groundswell::providers::retry::RateLimiter;
use groundswell::providers::{CandidateTopic, EmbeddingProvider, Review, TopicExtractor};
use groundswell::registry::TopicRegistry;
use groundswell::trend::TrendMatrixBuilder;

// ============================================================
// Deterministic provider stubs
// ============================================================

/// Maps review content to fixed topic phrases, like a perfectly
/// reproducible LLM.
struct StubExtractor {
    topics_by_content: HashMap<String, Vec<String>>,
}

#[async_trait]
impl TopicExtractor for StubExtractor {
    async fn extract_topics(&self, reviews: &[Review]) -> Result<Vec<CandidateTopic>> {
        let mut out = Vec::new();
        for review in reviews {
            if let Some(labels) = self.topics_by_content.get(&review.content) {
                for label in labels {
                    out.push(CandidateTopic {
                        label: label.clone(),
                        review_id: review.review_id.clone(),
                    });
                }
            }
        }
        Ok(out)
    }
}

/// Fixed label -> vector table. Unknown labels are an error, so a test
/// fails loudly if the pipeline embeds something unexpected.
struct StubEmbedder {
    vectors: HashMap<String, Vec<f64>>,
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f64>> {
        self.vectors
            .get(text)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no stub vector for '{text}'"))
    }
}

/// Always fails without a transient marker, so retries stop immediately.
struct BrokenExtractor;

#[async_trait]
impl TopicExtractor for BrokenExtractor {
    async fn extract_topics(&self, _reviews: &[Review]) -> Result<Vec<CandidateTopic>> {
        anyhow::bail!("malformed request")
    }
}

// ============================================================
// Test fixtures
// ============================================================

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn registry() -> TopicRegistry {
    TopicRegistry::open(Connection::open_in_memory().unwrap()).unwrap()
}

fn limiter() -> RateLimiter {
    // Effectively unthrottled for tests
    RateLimiter::new(10_000, 1, 0)
}

fn options() -> PipelineOptions {
    PipelineOptions {
        matcher: MatcherConfig {
            borderline_policy: BorderlinePolicy::Queue,
            ..MatcherConfig::default()
        },
        per_review_cap: 1,
        chunk_size: 2,
        concurrency: 2,
    }
}

fn write_review_file(dir: &std::path::Path, d: NaiveDate, reviews: &[(&str, &str)]) {
    let json: Vec<serde_json::Value> = reviews
        .iter()
        .map(|(id, content)| {
            serde_json::json!({ "reviewId": id, "content": content, "score": 1 })
        })
        .collect();
    std::fs::write(
        dir.join(format!("{d}.json")),
        serde_json::to_string(&json).unwrap(),
    )
    .unwrap();
}

/// Three reviews: two restatements of the same complaint (cosine 0.92
/// between their vectors) and one unrelated topic.
fn providers() -> (StubExtractor, StubEmbedder) {
    let extractor = StubExtractor {
        topics_by_content: HashMap::from([
            (
                "Driver was really rude at the door".to_string(),
                vec!["rude driver".to_string()],
            ),
            (
                "The delivery partner was impolite".to_string(),
                vec!["impolite delivery partner".to_string()],
            ),
            (
                "App crashed during checkout".to_string(),
                vec!["app crashes on checkout".to_string()],
            ),
        ]),
    };

    let cos = 0.92_f64;
    let sin = (1.0 - cos * cos).sqrt();
    let embedder = StubEmbedder {
        vectors: HashMap::from([
            ("rude driver".to_string(), vec![1.0, 0.0, 0.0]),
            ("impolite delivery partner".to_string(), vec![cos, sin, 0.0]),
            ("app crashes on checkout".to_string(), vec![0.0, 0.0, 1.0]),
        ]),
    };
    (extractor, embedder)
}

const REVIEWS: &[(&str, &str)] = &[
    ("r1", "Driver was really rude at the door"),
    ("r2", "The delivery partner was impolite"),
    ("r3", "App crashed during checkout"),
];

// ============================================================
// Chain: review file -> pipeline -> stats
// ============================================================

#[tokio::test]
async fn pipeline_consolidates_restatements_into_one_topic() {
    let dir = tempfile::tempdir().unwrap();
    let d = date("2026-03-01");
    write_review_file(dir.path(), d, REVIEWS);

    let mut reg = registry();
    let (extractor, embedder) = providers();

    let summary = pipeline::run(
        &mut reg,
        &extractor,
        &embedder,
        &limiter(),
        &options(),
        dir.path().to_str().unwrap(),
        d,
        false,
    )
    .await
    .unwrap();

    assert_eq!(summary.reviews_loaded, 3);
    assert_eq!(summary.candidates, 3);
    // "impolite delivery partner" folds into "rude driver"
    assert_eq!(summary.created, 2);
    assert_eq!(summary.matched, 1);
    assert_eq!(reg.root_count(), 2);

    let stats = queries::get_daily_stats(reg.connection(), d).unwrap();
    assert_eq!(stats.values().sum::<u64>(), 3);
    // The consolidated topic counted both source reviews
    assert_eq!(stats.values().max(), Some(&2));
}

#[tokio::test]
async fn reprocessing_a_date_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let d = date("2026-03-01");
    write_review_file(dir.path(), d, REVIEWS);

    let mut reg = registry();
    let (extractor, embedder) = providers();
    let opts = options();
    let dir_str = dir.path().to_str().unwrap().to_string();

    pipeline::run(&mut reg, &extractor, &embedder, &limiter(), &opts, &dir_str, d, false)
        .await
        .unwrap();
    let first_stats = queries::get_daily_stats(reg.connection(), d).unwrap();
    let topics_after_first = reg.topic_count();

    // Without --force the second run is refused
    let err = pipeline::run(&mut reg, &extractor, &embedder, &limiter(), &opts, &dir_str, d, false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("--force"));

    // With force, same inputs reproduce identical counts and no new topics
    pipeline::run(&mut reg, &extractor, &embedder, &limiter(), &opts, &dir_str, d, true)
        .await
        .unwrap();
    let second_stats = queries::get_daily_stats(reg.connection(), d).unwrap();

    assert_eq!(first_stats, second_stats);
    assert_eq!(reg.topic_count(), topics_after_first);
}

#[tokio::test]
async fn provider_failure_lands_reviews_in_skip_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let d = date("2026-03-01");
    write_review_file(dir.path(), d, REVIEWS);

    let mut reg = registry();
    let (_, embedder) = providers();

    let summary = pipeline::run(
        &mut reg,
        &BrokenExtractor,
        &embedder,
        &limiter(),
        &options(),
        dir.path().to_str().unwrap(),
        d,
        false,
    )
    .await
    .unwrap();

    // The run completes; every review is recorded as unprocessed
    assert_eq!(summary.unprocessed, 3);
    assert_eq!(summary.candidates, 0);
    let skipped = queries::get_unprocessed_reviews(reg.connection(), d).unwrap();
    assert_eq!(skipped.len(), 3);
    assert!(skipped[0].reason.contains("extraction failed"));

    // The date still registers as processed despite the empty counts
    assert!(queries::date_is_processed(reg.connection(), d).unwrap());
}

#[tokio::test]
async fn empty_review_file_yields_empty_processed_date() {
    let dir = tempfile::tempdir().unwrap();
    let d = date("2026-03-01");
    std::fs::write(dir.path().join(format!("{d}.json")), "[]").unwrap();

    let mut reg = registry();
    let (extractor, embedder) = providers();
    let summary = pipeline::run(
        &mut reg,
        &extractor,
        &embedder,
        &limiter(),
        &options(),
        dir.path().to_str().unwrap(),
        d,
        false,
    )
    .await
    .unwrap();

    assert_eq!(summary.reviews_loaded, 0);
    assert!(queries::date_is_processed(reg.connection(), d).unwrap());
    assert!(queries::get_daily_stats(reg.connection(), d).unwrap().is_empty());

    // The reprocessing guard applies to zero-count dates too
    let err = pipeline::run(
        &mut reg,
        &extractor,
        &embedder,
        &limiter(),
        &options(),
        dir.path().to_str().unwrap(),
        d,
        false,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("--force"));
}

// ============================================================
// Chain: pipeline over several dates -> trend matrix
// ============================================================

#[tokio::test]
async fn trend_matrix_covers_full_window_with_zero_fill() {
    let dir = tempfile::tempdir().unwrap();
    let mut reg = registry();
    let (extractor, embedder) = providers();
    let opts = options();
    let dir_str = dir.path().to_str().unwrap().to_string();

    // Mentions on two of seven window days
    write_review_file(dir.path(), date("2026-03-01"), REVIEWS);
    write_review_file(dir.path(), date("2026-03-04"), &[("r9", "Driver was really rude at the door")]);

    for d in [date("2026-03-01"), date("2026-03-04")] {
        pipeline::run(&mut reg, &extractor, &embedder, &limiter(), &opts, &dir_str, d, false)
            .await
            .unwrap();
    }

    let builder = TrendMatrixBuilder {
        window_days: 7,
        spike_factor: 2.0,
    };
    let matrix = builder.build(&reg, date("2026-03-07")).unwrap();

    assert_eq!(matrix.dates.len(), 7);
    assert_eq!(matrix.dates[0], date("2026-03-01"));
    assert_eq!(matrix.dates[6], date("2026-03-07"));

    // Rows are ranked by cumulative mentions: the consolidated complaint first
    assert_eq!(matrix.rows[0].label, "rude driver");
    assert_eq!(matrix.rows[0].counts, vec![2, 0, 0, 1, 0, 0, 0]);
    assert_eq!(matrix.rows[0].window_total(), 3);

    let crash_row = matrix
        .rows
        .iter()
        .find(|r| r.label == "app crashes on checkout")
        .unwrap();
    assert_eq!(crash_row.counts, vec![1, 0, 0, 0, 0, 0, 0]);

    // Every row spans the whole window
    for row in &matrix.rows {
        assert_eq!(row.counts.len(), 7);
        assert_eq!(row.spike_days.len(), 7);
    }
}

#[tokio::test]
async fn wrong_dimension_embedding_skips_candidate_not_run() {
    let dir = tempfile::tempdir().unwrap();
    let d = date("2026-03-01");
    write_review_file(
        dir.path(),
        d,
        &[
            ("r1", "Driver was really rude at the door"),
            ("r2", "App crashed during checkout"),
        ],
    );

    // The second label embeds into a different dimensionality than the
    // one the first topic fixes for the registry
    let (extractor, mut embedder) = providers();
    embedder
        .vectors
        .insert("app crashes on checkout".to_string(), vec![0.0, 1.0]);

    let mut reg = registry();
    let summary = pipeline::run(
        &mut reg,
        &extractor,
        &embedder,
        &limiter(),
        &options(),
        dir.path().to_str().unwrap(),
        d,
        false,
    )
    .await
    .unwrap();

    // The mismatched candidate is skipped and recorded; the run completes
    assert_eq!(summary.created, 1);
    assert_eq!(summary.unprocessed, 1);
    assert_eq!(reg.root_count(), 1);
    assert!(queries::date_is_processed(reg.connection(), d).unwrap());

    let skipped = queries::get_unprocessed_reviews(reg.connection(), d).unwrap();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].review_id, "r2");
    assert!(skipped[0].reason.contains("dimension mismatch"));
}

#[tokio::test]
async fn borderline_candidate_is_queued_not_counted() {
    let dir = tempfile::tempdir().unwrap();
    let d = date("2026-03-01");
    write_review_file(
        dir.path(),
        d,
        &[
            ("r1", "Driver was really rude at the door"),
            ("r2", "Some vague attitude issue"),
        ],
    );

    let (mut extractor, mut embedder) = providers();
    extractor.topics_by_content.insert(
        "Some vague attitude issue".to_string(),
        vec!["driver attitude".to_string()],
    );
    let cos = 0.78_f64;
    let sin = (1.0 - cos * cos).sqrt();
    embedder
        .vectors
        .insert("driver attitude".to_string(), vec![cos, sin, 0.0]);

    let mut reg = registry();
    let summary = pipeline::run(
        &mut reg,
        &extractor,
        &embedder,
        &limiter(),
        &options(),
        dir.path().to_str().unwrap(),
        d,
        false,
    )
    .await
    .unwrap();

    assert_eq!(summary.queued, 1);
    let queue = queries::get_pending_reviews(reg.connection()).unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].label, "driver attitude");
    assert_eq!(queue[0].nearest_topic_id, 1);

    // Queued candidates never reach the stats
    let stats = queries::get_daily_stats(reg.connection(), d).unwrap();
    assert_eq!(stats.values().sum::<u64>(), 1);
}
