// TopicRegistry — the durable, append-only store of canonical topics.
//
// The registry is loaded wholesale from SQLite at open and held in memory
// for the duration of a batch run; every mutation is committed to the
// database before the call returns, so the registry survives a process
// restart at any commit boundary. Topic rows are never deleted — a merged
// topic keeps its row and gains an entry in canonical_map.
//
// The struct is not internally synchronized. The pipeline owns one
// instance behind a tokio::sync::Mutex (same discipline as wrapping a
// rusqlite Connection) so that similarity search and the mutation it
// justifies happen inside a single critical section.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::model::{CanonicalizationMap, RegistryError, Topic, TopicId};
use crate::db::schema;
use crate::similarity::cosine_similarity;

/// A registry entry scored against a query embedding.
///
/// Carries the fields the matcher's tie-break needs (mentions, id) so the
/// decision can be made without re-borrowing the registry.
#[derive(Debug, Clone)]
pub struct ScoredTopic {
    pub id: TopicId,
    pub label: String,
    pub total_mentions: u64,
    pub similarity: f64,
}

pub struct TopicRegistry {
    conn: Connection,
    topics: BTreeMap<TopicId, Topic>,
    canonical: CanonicalizationMap,
    embedding_dim: Option<usize>,
    next_id: TopicId,
}

impl TopicRegistry {
    /// Open the registry over an existing connection: create tables if
    /// needed, load the full snapshot, and verify integrity.
    ///
    /// Integrity violations (duplicate ids, canonicalization cycles) are
    /// fatal — a corrupted store must halt the run rather than be repaired
    /// silently.
    pub fn open(conn: Connection) -> Result<Self> {
        schema::create_tables(&conn)?;

        let mut topics: BTreeMap<TopicId, Topic> = BTreeMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT id, label, embedding, aliases, first_seen_date, last_seen_date, total_mentions
                 FROM topics ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| {
                let embedding_json: String = row.get(2)?;
                let aliases_json: String = row.get(3)?;
                let first_seen: String = row.get(4)?;
                let last_seen: String = row.get(5)?;
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    embedding_json,
                    aliases_json,
                    first_seen,
                    last_seen,
                    row.get::<_, i64>(6)?,
                ))
            })?;

            for row in rows {
                let (id, label, embedding_json, aliases_json, first_seen, last_seen, mentions) =
                    row?;
                let topic = Topic {
                    id,
                    label,
                    embedding: serde_json::from_str(&embedding_json)
                        .with_context(|| format!("Invalid embedding JSON for topic {id}"))?,
                    aliases: serde_json::from_str(&aliases_json)
                        .with_context(|| format!("Invalid aliases JSON for topic {id}"))?,
                    first_seen_date: parse_date(&first_seen)?,
                    last_seen_date: parse_date(&last_seen)?,
                    total_mentions: mentions as u64,
                };
                match topics.entry(id) {
                    Entry::Vacant(v) => {
                        v.insert(topic);
                    }
                    Entry::Occupied(_) => {
                        return Err(
                            RegistryError::Corrupt(format!("duplicate topic id {id}")).into()
                        );
                    }
                }
            }
        }

        let pairs: Vec<(TopicId, TopicId)> = {
            let mut stmt = conn.prepare("SELECT source_id, target_id FROM canonical_map")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        let canonical = CanonicalizationMap::from_pairs(&pairs)?;

        // Every map entry must reference known topics
        for &(source, target) in &pairs {
            if !topics.contains_key(&source) || !topics.contains_key(&target) {
                return Err(RegistryError::Corrupt(format!(
                    "canonical_map entry {source}→{target} references a missing topic"
                ))
                .into());
            }
        }

        let embedding_dim: Option<usize> = conn
            .query_row(
                "SELECT embedding_dim FROM registry_meta WHERE id = 1",
                [],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?
            .flatten()
            .map(|d| d as usize);

        // Cross-check the stored dimension against actual vectors
        if let Some(dim) = embedding_dim {
            if let Some(bad) = topics.values().find(|t| t.embedding.len() != dim) {
                return Err(RegistryError::Corrupt(format!(
                    "topic {} has embedding dimension {} but registry uses {dim}",
                    bad.id,
                    bad.embedding.len()
                ))
                .into());
            }
        }

        let next_id = topics.keys().next_back().map(|&id| id + 1).unwrap_or(1);

        info!(
            topics = topics.len(),
            merged = canonical.merged_count(),
            dim = ?embedding_dim,
            "Taxonomy registry loaded"
        );

        Ok(Self {
            conn,
            topics,
            canonical,
            embedding_dim,
            next_id,
        })
    }

    /// The registry's fixed embedding dimension, once established by the
    /// first created topic.
    pub fn embedding_dim(&self) -> Option<usize> {
        self.embedding_dim
    }

    /// Total topic rows, including merged-away ones.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Count of current canonical (root) topics.
    pub fn root_count(&self) -> usize {
        self.topics.len() - self.canonical.merged_count()
    }

    /// Resolve a topic id through the canonicalization map to its root.
    pub fn resolve(&self, id: TopicId) -> TopicId {
        self.canonical.resolve(id)
    }

    /// Look up a topic by exact id (merged rows included).
    pub fn topic(&self, id: TopicId) -> Option<&Topic> {
        self.topics.get(&id)
    }

    /// Verify a query or creation vector against the registry's fixed
    /// dimension. Passes trivially while the registry is still empty.
    fn check_dimension(&self, embedding: &[f64]) -> Result<(), RegistryError> {
        match self.embedding_dim {
            Some(dim) if dim != embedding.len() => Err(RegistryError::DimensionMismatch {
                expected: dim,
                got: embedding.len(),
            }),
            _ => Ok(()),
        }
    }

    /// The `k` most similar current canonical topics, sorted by cosine
    /// similarity descending (ties by id ascending, so the ordering is
    /// deterministic for a fixed snapshot).
    pub fn find_candidates(&self, embedding: &[f64], k: usize) -> Result<Vec<ScoredTopic>> {
        self.check_dimension(embedding)?;

        let mut scored: Vec<ScoredTopic> = self
            .topics
            .values()
            .filter(|t| self.canonical.is_root(t.id))
            .map(|t| ScoredTopic {
                id: t.id,
                label: t.label.clone(),
                total_mentions: t.total_mentions,
                similarity: cosine_similarity(embedding, &t.embedding),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Create a new canonical topic. The label becomes its first alias and
    /// mentions start at zero; the caller records the triggering mention
    /// separately. Committed before returning.
    pub fn create_topic(&mut self, label: &str, embedding: &[f64], date: NaiveDate) -> Result<TopicId> {
        self.check_dimension(embedding)?;

        let id = self.next_id;
        let mut aliases = BTreeSet::new();
        aliases.insert(label.to_string());

        let topic = Topic {
            id,
            label: label.to_string(),
            embedding: embedding.to_vec(),
            aliases,
            first_seen_date: date,
            last_seen_date: date,
            total_mentions: 0,
        };

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO topics (id, label, embedding, aliases, first_seen_date, last_seen_date, total_mentions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                id,
                topic.label,
                serde_json::to_string(&topic.embedding)?,
                serde_json::to_string(&topic.aliases)?,
                date.to_string(),
                date.to_string(),
            ],
        )?;
        tx.execute(
            "INSERT INTO registry_meta (id, embedding_dim) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET embedding_dim = ?1",
            params![embedding.len() as i64],
        )?;
        tx.commit().context("Failed to commit topic creation")?;

        self.embedding_dim = Some(embedding.len());
        self.topics.insert(id, topic);
        self.next_id = id + 1;

        debug!(id, label, "Created topic");
        Ok(id)
    }

    /// Record one mention of a topic: resolves to the root, increments
    /// `total_mentions`, updates `last_seen_date`, and adds the alias if it
    /// is new. Returns the root id the mention landed on.
    pub fn record_mention(&mut self, id: TopicId, date: NaiveDate, alias: &str) -> Result<TopicId> {
        let root = self.canonical.resolve(id);
        let topic = self
            .topics
            .get_mut(&root)
            .ok_or(RegistryError::UnknownTopic(id))?;

        topic.total_mentions += 1;
        if date > topic.last_seen_date {
            topic.last_seen_date = date;
        }
        topic.aliases.insert(alias.to_string());

        self.conn.execute(
            "UPDATE topics SET total_mentions = ?1, last_seen_date = ?2, aliases = ?3 WHERE id = ?4",
            params![
                topic.total_mentions as i64,
                topic.last_seen_date.to_string(),
                serde_json::to_string(&topic.aliases)?,
                root,
            ],
        )?;

        Ok(root)
    }

    /// Merge the topic rooted at `source_id` into the one rooted at
    /// `target_id`. The target absorbs the source's aliases and cumulative
    /// mention count; the canonicalization map is updated so every id that
    /// resolved to the source now resolves directly to the target.
    pub fn merge(&mut self, source_id: TopicId, target_id: TopicId) -> Result<()> {
        let source = self.canonical.resolve(source_id);
        let target = self.canonical.resolve(target_id);

        if !self.topics.contains_key(&source) {
            return Err(RegistryError::UnknownTopic(source_id).into());
        }
        if !self.topics.contains_key(&target) {
            return Err(RegistryError::UnknownTopic(target_id).into());
        }
        if source == target {
            return Err(RegistryError::SelfMerge {
                source_id,
                target_id,
                root: source,
            }
            .into());
        }

        let (source_mentions, source_aliases, source_first) = {
            let s = &self.topics[&source];
            (s.total_mentions, s.aliases.clone(), s.first_seen_date)
        };

        let changed = self.canonical.merge_roots(source, target);

        let tgt = self
            .topics
            .get_mut(&target)
            .ok_or(RegistryError::UnknownTopic(target_id))?;
        tgt.total_mentions += source_mentions;
        tgt.aliases.extend(source_aliases);
        if source_first < tgt.first_seen_date {
            tgt.first_seen_date = source_first;
        }

        let tx = self.conn.transaction()?;
        {
            let t = &self.topics[&target];
            tx.execute(
                "UPDATE topics SET total_mentions = ?1, aliases = ?2, first_seen_date = ?3 WHERE id = ?4",
                params![
                    t.total_mentions as i64,
                    serde_json::to_string(&t.aliases)?,
                    t.first_seen_date.to_string(),
                    target,
                ],
            )?;
            for (src, tgt_id) in &changed {
                tx.execute(
                    "INSERT INTO canonical_map (source_id, target_id) VALUES (?1, ?2)
                     ON CONFLICT(source_id) DO UPDATE SET target_id = ?2",
                    params![src, tgt_id],
                )?;
            }
        }
        tx.commit().context("Failed to commit merge")?;

        info!(source, target, "Merged topic");
        Ok(())
    }

    /// Borrow the underlying connection for stats/queue operations that
    /// share the same database file.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Mutable borrow for operations that need their own transaction
    /// (daily stats overwrite).
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("Invalid date '{s}'"))
}
