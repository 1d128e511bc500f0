// Registry data models — the types that flow through the consolidation engine.
//
// These are separate from the SQLite store so the matcher, aggregator, and
// trend builder can use them without depending on rusqlite directly.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Stable topic identifier. Assigned at creation, never reused; ids form a
/// total order reflecting creation time.
pub type TopicId = i64;

/// A canonical entry in the taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: TopicId,
    /// Current display label. May be updated; the id never changes.
    pub label: String,
    /// Embedding vector fixed at creation. Every topic in one registry
    /// shares the same dimensionality.
    pub embedding: Vec<f64>,
    /// Distinct raw label strings that have been folded into this topic.
    /// BTreeSet keeps serialization order stable.
    pub aliases: BTreeSet<String>,
    pub first_seen_date: NaiveDate,
    pub last_seen_date: NaiveDate,
    /// Monotonically non-decreasing mention counter.
    pub total_mentions: u64,
}

/// Typed registry failures. Callers downcast from anyhow when they need to
/// react to a specific case (e.g. the pipeline skips a batch item on
/// `DimensionMismatch` instead of aborting the run).
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("embedding dimension mismatch: registry uses {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    // Field is source_id, not source: thiserror reserves `source` for the
    // error cause chain.
    #[error("merge of topic {source_id} into {target_id} resolves to the same root {root}")]
    SelfMerge {
        source_id: TopicId,
        target_id: TopicId,
        root: TopicId,
    },

    #[error("unknown topic id {0}")]
    UnknownTopic(TopicId),

    /// Duplicate ids or a canonicalization cycle. Fatal: indicates a
    /// corrupted store, and automated repair risks losing merge history.
    #[error("registry integrity violation: {0}")]
    Corrupt(String),
}

/// Flat map from merged topic ids to the id they were merged into.
///
/// Invariant: every entry points directly at a root (an id with no entry),
/// so resolution is a single lookup. `merge_roots` re-points existing
/// entries to preserve this — merging A→B then B→C makes A resolve
/// directly to C.
#[derive(Debug, Clone, Default)]
pub struct CanonicalizationMap {
    merged_into: HashMap<TopicId, TopicId>,
}

impl CanonicalizationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted (source, target) pairs, validating that the
    /// stored forest has no cycles and collapsing any indirection left by
    /// older snapshots.
    pub fn from_pairs(pairs: &[(TopicId, TopicId)]) -> Result<Self, RegistryError> {
        let raw: HashMap<TopicId, TopicId> = pairs.iter().copied().collect();
        if raw.len() != pairs.len() {
            return Err(RegistryError::Corrupt(
                "duplicate source id in canonicalization map".to_string(),
            ));
        }

        let mut merged_into = HashMap::with_capacity(raw.len());
        for &source in raw.keys() {
            // Walk to the root, bounded by the map size to catch cycles.
            let mut current = source;
            let mut hops = 0usize;
            while let Some(&next) = raw.get(&current) {
                if next == current {
                    return Err(RegistryError::Corrupt(format!(
                        "topic {current} maps to itself in canonicalization map"
                    )));
                }
                current = next;
                hops += 1;
                if hops > raw.len() {
                    return Err(RegistryError::Corrupt(format!(
                        "cycle detected in canonicalization map at topic {source}"
                    )));
                }
            }
            merged_into.insert(source, current);
        }

        Ok(Self { merged_into })
    }

    /// Resolve an id to its current root. Roots resolve to themselves.
    pub fn resolve(&self, id: TopicId) -> TopicId {
        self.merged_into.get(&id).copied().unwrap_or(id)
    }

    /// True when the id has not been merged away.
    pub fn is_root(&self, id: TopicId) -> bool {
        !self.merged_into.contains_key(&id)
    }

    /// Point `source` (a root) at `target` (a root), and re-point every
    /// existing entry that resolved to `source` so the no-indirection
    /// invariant holds. Returns the entries that changed, for persistence.
    pub fn merge_roots(&mut self, source: TopicId, target: TopicId) -> Vec<(TopicId, TopicId)> {
        let mut changed = vec![(source, target)];
        for (&merged, root) in self.merged_into.iter_mut() {
            if *root == source {
                *root = target;
                changed.push((merged, target));
            }
        }
        self.merged_into.insert(source, target);
        changed
    }

    /// Number of merged-away (non-root) ids.
    pub fn merged_count(&self) -> usize {
        self.merged_into.len()
    }
}
