// Deduplication matcher — decides whether a candidate topic phrase is a
// restatement of an existing canonical topic or a genuinely new one.
//
// The external extractor is never guaranteed to phrase the same underlying
// issue identically twice, so all consolidation lives here: a k-NN query
// against the registry, two cosine-similarity thresholds, and a
// deterministic tie-break. For a fixed registry snapshot and fixed
// thresholds the decision is a pure function of that state — no hidden
// randomness. Candidates processed later in a batch may observe topics
// created earlier in the same batch; that is by construction, since search
// and mutation happen against the live registry inside one critical
// section.

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::params;
use tracing::{debug, warn};

use crate::registry::{ScoredTopic, TopicId, TopicRegistry};

/// What to do with a candidate whose best similarity falls in the review
/// band `[t_review, t_merge)`. Never silently dropped either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderlinePolicy {
    /// Persist to the pending_review queue for an external workflow.
    Queue,
    /// Merge into the nearest topic, logged with a low-confidence marker.
    AutoMerge,
}

impl BorderlinePolicy {
    pub fn from_env_str(s: &str) -> Option<Self> {
        match s {
            "queue" => Some(BorderlinePolicy::Queue),
            "auto-merge" => Some(BorderlinePolicy::AutoMerge),
            _ => None,
        }
    }
}

/// Matcher thresholds and knobs. Defaults follow the engine's review band:
/// auto-merge at ≥ 0.85, review between 0.70 and 0.85, new topic below.
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    pub t_merge: f64,
    pub t_review: f64,
    /// Candidates within this distance of the top similarity are considered
    /// tied and broken by (total_mentions desc, id asc).
    pub tie_epsilon: f64,
    /// How many nearest topics to consider per candidate.
    pub candidate_k: usize,
    pub borderline_policy: BorderlinePolicy,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            t_merge: 0.85,
            t_review: 0.70,
            tie_epsilon: 0.01,
            candidate_k: 5,
            borderline_policy: BorderlinePolicy::Queue,
        }
    }
}

/// The outcome of consolidating one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchDecision {
    /// Restatement of an existing topic; mention recorded on its root.
    Matched { topic_id: TopicId, similarity: f64 },
    /// Borderline candidate merged under the auto-merge policy.
    LowConfidenceMatch { topic_id: TopicId, similarity: f64 },
    /// Borderline candidate parked in the review queue; no mention counted.
    Queued {
        nearest_topic_id: TopicId,
        similarity: f64,
    },
    /// No sufficiently similar topic existed; a new one was created and the
    /// triggering mention recorded on it.
    Created { topic_id: TopicId },
}

impl MatchDecision {
    /// The topic id a mention was recorded on, if any.
    pub fn counted_topic(&self) -> Option<TopicId> {
        match self {
            MatchDecision::Matched { topic_id, .. }
            | MatchDecision::LowConfidenceMatch { topic_id, .. }
            | MatchDecision::Created { topic_id } => Some(*topic_id),
            MatchDecision::Queued { .. } => None,
        }
    }
}

pub struct DeduplicationMatcher {
    config: MatcherConfig,
}

impl DeduplicationMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    /// Consolidate one candidate `(label, embedding)` observed in review
    /// `review_id` on `date`.
    ///
    /// The caller holds the registry exclusively for the duration of this
    /// call, so the k-NN search and the mutation it justifies are one
    /// atomic decision — two near-identical novel candidates in the same
    /// batch cannot both be created, because the second one's search sees
    /// the first one's freshly committed topic.
    pub fn consolidate(
        &self,
        registry: &mut TopicRegistry,
        label: &str,
        embedding: &[f64],
        date: NaiveDate,
        review_id: &str,
    ) -> Result<MatchDecision> {
        let candidates = registry.find_candidates(embedding, self.config.candidate_k)?;

        let best = pick_best(&candidates, self.config.tie_epsilon);

        match best {
            Some(best) if best.similarity >= self.config.t_merge => {
                let root = registry.record_mention(best.id, date, label)?;
                debug!(
                    label,
                    topic = root,
                    similarity = best.similarity,
                    "Matched existing topic"
                );
                Ok(MatchDecision::Matched {
                    topic_id: root,
                    similarity: best.similarity,
                })
            }
            Some(best) if best.similarity >= self.config.t_review => {
                match self.config.borderline_policy {
                    BorderlinePolicy::AutoMerge => {
                        let root = registry.record_mention(best.id, date, label)?;
                        warn!(
                            label,
                            topic = root,
                            similarity = best.similarity,
                            "Low-confidence merge (borderline similarity)"
                        );
                        Ok(MatchDecision::LowConfidenceMatch {
                            topic_id: root,
                            similarity: best.similarity,
                        })
                    }
                    BorderlinePolicy::Queue => {
                        registry.connection().execute(
                            "INSERT INTO pending_review (date, label, review_id, nearest_topic_id, similarity)
                             VALUES (?1, ?2, ?3, ?4, ?5)",
                            params![date.to_string(), label, review_id, best.id, best.similarity],
                        )?;
                        debug!(
                            label,
                            nearest = best.id,
                            similarity = best.similarity,
                            "Queued borderline candidate for review"
                        );
                        Ok(MatchDecision::Queued {
                            nearest_topic_id: best.id,
                            similarity: best.similarity,
                        })
                    }
                }
            }
            _ => {
                let id = registry.create_topic(label, embedding, date)?;
                registry.record_mention(id, date, label)?;
                debug!(label, topic = id, "Created new topic");
                Ok(MatchDecision::Created { topic_id: id })
            }
        }
    }
}

/// Choose among candidates within `epsilon` of the top similarity: prefer
/// the more established topic (larger total_mentions), then the earliest
/// created (smallest id). Keeps the choice deterministic and reduces
/// fragmentation when several near-duplicates score alike.
fn pick_best(candidates: &[ScoredTopic], epsilon: f64) -> Option<&ScoredTopic> {
    let top = candidates.first()?;
    candidates
        .iter()
        .take_while(|c| top.similarity - c.similarity <= epsilon)
        .max_by(|a, b| {
            a.total_mentions
                .cmp(&b.total_mentions)
                .then(b.id.cmp(&a.id))
        })
}
