// SQLite persistence — schema, models, and queries for everything outside
// the topic registry (which owns its own SQL).

pub mod models;
pub mod queries;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Open (or create) the database file and ensure the schema is current.
pub fn open(path: &str) -> Result<Connection> {
    let conn =
        Connection::open(path).with_context(|| format!("Failed to open database at {path}"))?;
    schema::create_tables(&conn)?;
    Ok(conn)
}
