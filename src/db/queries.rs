// Database queries — CRUD operations for daily stats, the review queue,
// and the unprocessed-review ledger.
//
// Every database interaction outside the registry goes through this module.
// This keeps SQL contained in one place and gives the rest of the app clean
// Rust interfaces. The registry owns its own SQL (src/registry/store.rs)
// because its mutations must commit inside its critical section.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

use super::models::{PendingReviewItem, UnprocessedReview};
use crate::registry::TopicId;

// --- Daily stats ---

/// Replace a date's stats wholesale and mark the date processed. Runs in
/// one transaction so reprocessing a day either fully overwrites it or
/// leaves the old counts intact — re-running the same inputs reproduces
/// identical counts, never doubles.
///
/// The processed marker is written even when `counts` is empty; a day with
/// zero mentions is still a processed day.
pub fn save_daily_stats(
    conn: &mut Connection,
    date: NaiveDate,
    counts: &BTreeMap<TopicId, u64>,
) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM daily_stats WHERE date = ?1",
        params![date.to_string()],
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO daily_stats (date, topic_id, mention_count) VALUES (?1, ?2, ?3)",
        )?;
        for (&topic_id, &count) in counts {
            stmt.execute(params![date.to_string(), topic_id, count as i64])?;
        }
    }
    tx.execute(
        "INSERT INTO processed_dates (date) VALUES (?1)
         ON CONFLICT(date) DO UPDATE SET processed_at = datetime('now')",
        params![date.to_string()],
    )?;
    tx.commit()
        .with_context(|| format!("Failed to commit stats for {date}"))
}

/// Load one date's stats (empty map when the date was never processed).
pub fn get_daily_stats(conn: &Connection, date: NaiveDate) -> Result<BTreeMap<TopicId, u64>> {
    let mut stmt =
        conn.prepare("SELECT topic_id, mention_count FROM daily_stats WHERE date = ?1")?;
    let rows = stmt.query_map(params![date.to_string()], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as u64))
    })?;

    let mut counts = BTreeMap::new();
    for row in rows {
        let (topic_id, count) = row?;
        counts.insert(topic_id, count);
    }
    Ok(counts)
}

/// Whether a date has been processed. Keyed on `processed_dates`, not on
/// the presence of stats rows, so empty days count too.
pub fn date_is_processed(conn: &Connection, date: NaiveDate) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM processed_dates WHERE date = ?1",
            params![date.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// All stats rows inside an inclusive date window, for the trend builder.
pub fn get_stats_in_window(
    conn: &Connection,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<(NaiveDate, TopicId, u64)>> {
    let mut stmt = conn.prepare(
        "SELECT date, topic_id, mention_count FROM daily_stats
         WHERE date >= ?1 AND date <= ?2
         ORDER BY date, topic_id",
    )?;
    let rows = stmt.query_map(params![start.to_string(), end.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)? as u64,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (date_str, topic_id, count) = row?;
        let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
            .with_context(|| format!("Invalid date '{date_str}' in daily_stats"))?;
        out.push((date, topic_id, count));
    }
    Ok(out)
}

/// All processed dates, ascending. Used by the status screen and as the
/// default report window end.
pub fn processed_dates(conn: &Connection) -> Result<Vec<NaiveDate>> {
    let mut stmt = conn.prepare("SELECT date FROM processed_dates ORDER BY date")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut dates = Vec::new();
    for row in rows {
        let s = row?;
        dates.push(
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .with_context(|| format!("Invalid date '{s}' in processed_dates"))?,
        );
    }
    Ok(dates)
}

// --- Review queue ---

/// Unresolved borderline candidates, oldest first.
pub fn get_pending_reviews(conn: &Connection) -> Result<Vec<PendingReviewItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, date, label, review_id, nearest_topic_id, similarity, queued_at, resolved_at
         FROM pending_review
         WHERE resolved_at IS NULL
         ORDER BY queued_at, id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, i64>(4)?,
            row.get::<_, f64>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, Option<String>>(7)?,
        ))
    })?;

    let mut items = Vec::new();
    for row in rows {
        let (id, date_str, label, review_id, nearest, similarity, queued_at, resolved_at) = row?;
        items.push(PendingReviewItem {
            id,
            date: NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
                .with_context(|| format!("Invalid date '{date_str}' in pending_review"))?,
            label,
            review_id,
            nearest_topic_id: nearest,
            similarity,
            queued_at,
            resolved_at,
        });
    }
    Ok(items)
}

pub fn pending_review_count(conn: &Connection) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM pending_review WHERE resolved_at IS NULL",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Drop a date's queue entries before reprocessing it, so a re-run queues
/// each borderline candidate once instead of stacking duplicates.
pub fn clear_pending_reviews_for_date(conn: &Connection, date: NaiveDate) -> Result<()> {
    conn.execute(
        "DELETE FROM pending_review WHERE date = ?1 AND resolved_at IS NULL",
        params![date.to_string()],
    )?;
    Ok(())
}

// --- Unprocessed reviews ---

/// Record a review that exhausted retries. Upsert: reprocessing a date may
/// hit the same review again.
pub fn record_unprocessed_review(
    conn: &Connection,
    date: NaiveDate,
    review_id: &str,
    reason: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO unprocessed_reviews (date, review_id, reason, recorded_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(date, review_id) DO UPDATE SET reason = ?3, recorded_at = datetime('now')",
        params![date.to_string(), review_id, reason],
    )?;
    Ok(())
}

/// Clear a date's skip ledger before reprocessing it.
pub fn clear_unprocessed_for_date(conn: &Connection, date: NaiveDate) -> Result<()> {
    conn.execute(
        "DELETE FROM unprocessed_reviews WHERE date = ?1",
        params![date.to_string()],
    )?;
    Ok(())
}

pub fn get_unprocessed_reviews(conn: &Connection, date: NaiveDate) -> Result<Vec<UnprocessedReview>> {
    let mut stmt = conn.prepare(
        "SELECT date, review_id, reason, recorded_at FROM unprocessed_reviews
         WHERE date = ?1 ORDER BY review_id",
    )?;
    let rows = stmt.query_map(params![date.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut items = Vec::new();
    for row in rows {
        let (date_str, review_id, reason, recorded_at) = row?;
        items.push(UnprocessedReview {
            date: NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
                .with_context(|| format!("Invalid date '{date_str}' in unprocessed_reviews"))?,
            review_id,
            reason,
            recorded_at,
        });
    }
    Ok(items)
}
