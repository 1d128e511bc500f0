// Database schema — table creation and migrations.
//
// We use a simple version-based migration approach: a `schema_version` table
// tracks which migrations have run, and each migration is a function that
// executes SQL statements.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all tables if they don't exist yet.
///
/// This is idempotent — safe to call on every startup.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Tracks schema version for future migrations
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Registry-wide settings (singleton row). embedding_dim is fixed by
        -- the first topic ever created; a provider returning a different
        -- dimension afterwards is a configuration error.
        CREATE TABLE IF NOT EXISTS registry_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            embedding_dim INTEGER,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Canonical topics. Rows are never deleted; a merged topic keeps its
        -- row (auditable history) and gains an entry in canonical_map.
        -- Embedding and aliases are stored as JSON so the structure can
        -- evolve without migrations.
        CREATE TABLE IF NOT EXISTS topics (
            id INTEGER PRIMARY KEY,
            label TEXT NOT NULL,
            embedding TEXT NOT NULL,           -- JSON array of floats
            aliases TEXT NOT NULL,             -- JSON array of strings
            first_seen_date TEXT NOT NULL,     -- YYYY-MM-DD
            last_seen_date TEXT NOT NULL,
            total_mentions INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Merge forest: source topic id -> surviving topic id.
        -- Entries always point directly at a root.
        CREATE TABLE IF NOT EXISTS canonical_map (
            source_id INTEGER PRIMARY KEY REFERENCES topics(id),
            target_id INTEGER NOT NULL REFERENCES topics(id),
            merged_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Per-day mention counts. A date's rows are replaced wholesale when
        -- that date is (re)processed — never accumulated.
        CREATE TABLE IF NOT EXISTS daily_stats (
            date TEXT NOT NULL,
            topic_id INTEGER NOT NULL REFERENCES topics(id),
            mention_count INTEGER NOT NULL,
            PRIMARY KEY (date, topic_id)
        );

        -- One row per processed date. Kept separate from daily_stats so a
        -- date whose batch produced zero counts still registers as
        -- processed (daily_stats has no rows to witness it).
        CREATE TABLE IF NOT EXISTS processed_dates (
            date TEXT PRIMARY KEY,
            processed_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Borderline-similarity candidates held for external review.
        CREATE TABLE IF NOT EXISTS pending_review (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL,
            label TEXT NOT NULL,
            review_id TEXT NOT NULL,
            nearest_topic_id INTEGER NOT NULL REFERENCES topics(id),
            similarity REAL NOT NULL,
            queued_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Reviews that exhausted provider retries. Recorded so a skipped
        -- review is visible, never silently counted as 'no topic'.
        CREATE TABLE IF NOT EXISTS unprocessed_reviews (
            date TEXT NOT NULL,
            review_id TEXT NOT NULL,
            reason TEXT NOT NULL,
            recorded_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (date, review_id)
        );

        -- Index for trend queries over a date window
        CREATE INDEX IF NOT EXISTS idx_daily_stats_topic
            ON daily_stats(topic_id);

        -- Index for listing the review queue by date
        CREATE INDEX IF NOT EXISTS idx_pending_review_date
            ON pending_review(date);
        ",
    )
    .context("Failed to create database tables")?;

    // Record initial schema version if not already set
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [1],
    )?;

    // Migration v2: add resolved_at to pending_review so an external review
    // workflow can mark queue items as handled without deleting the trail.
    run_migration(conn, 2, |c| {
        c.execute_batch("ALTER TABLE pending_review ADD COLUMN resolved_at TEXT;")
    })?;

    Ok(())
}

/// Run a migration if it hasn't been applied yet.
/// The migration function receives the connection and should execute its SQL.
fn run_migration<F>(conn: &Connection, version: i64, migrate: F) -> Result<()>
where
    F: FnOnce(&Connection) -> rusqlite::Result<()>,
{
    let already_applied: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM schema_version WHERE version = ?1",
        [version],
        |row| row.get(0),
    )?;

    if !already_applied {
        migrate(conn).with_context(|| format!("Migration v{version} failed"))?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [version],
        )?;
    }

    Ok(())
}

/// Count the number of tables in the database (useful for init confirmation).
pub fn table_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_tables_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        // Running create_tables twice should not error
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();
    }

    #[test]
    fn test_table_count() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        let count = table_count(&conn).unwrap();
        // schema_version, registry_meta, topics, canonical_map, daily_stats,
        // processed_dates, pending_review, unprocessed_reviews = 8
        // (sqlite_sequence is filtered out by the sqlite_% pattern)
        assert_eq!(count, 8i64);
    }

    #[test]
    fn test_migration_v2_adds_resolved_at_column() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();

        conn.execute(
            "INSERT INTO topics (id, label, embedding, aliases, first_seen_date, last_seen_date)
             VALUES (1, 'slow delivery', '[0.1]', '[\"slow delivery\"]', '2026-01-01', '2026-01-01')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO pending_review (date, label, review_id, nearest_topic_id, similarity, resolved_at)
             VALUES ('2026-01-01', 'late order', 'r1', 1, 0.78, '2026-01-02')",
            [],
        )
        .unwrap();

        let resolved: String = conn
            .query_row(
                "SELECT resolved_at FROM pending_review WHERE review_id = 'r1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(resolved, "2026-01-02");
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();

        let versions: Vec<i64> = conn
            .prepare("SELECT version FROM schema_version ORDER BY version")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(versions, vec![1, 2]);
    }
}
