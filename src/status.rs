// System status display — DB size, taxonomy shape, processed date range.

use anyhow::Result;

use crate::db::queries;
use crate::registry::TopicRegistry;

/// Display system status to the terminal.
pub fn show(registry: Option<&TopicRegistry>, db_display_path: &str) -> Result<()> {
    let Some(registry) = registry else {
        println!("Database: not initialized");
        println!("\nRun `groundswell init` to set up the database.");
        return Ok(());
    };

    let file_size = std::fs::metadata(db_display_path)
        .map(|m| format_bytes(m.len()))
        .unwrap_or_else(|_| "unknown".to_string());
    println!("Database: {} ({})", db_display_path, file_size);

    println!(
        "Taxonomy: {} canonical topic(s), {} merged away",
        registry.root_count(),
        registry.topic_count() - registry.root_count()
    );
    match registry.embedding_dim() {
        Some(dim) => println!("Embedding dimension: {dim}"),
        None => println!("Embedding dimension: not yet established (no topics)"),
    }

    let dates = queries::processed_dates(registry.connection())?;
    match (dates.first(), dates.last()) {
        (Some(first), Some(last)) => {
            println!("Processed dates: {} ({first} to {last})", dates.len());
        }
        _ => {
            println!("Processed dates: none");
            println!("  Run `groundswell process <date>` to consolidate a day's reviews");
        }
    }

    let pending = queries::pending_review_count(registry.connection())?;
    if pending > 0 {
        println!("Pending review: {pending} borderline candidate(s)");
        println!("  Run `groundswell review-queue` to list them");
    } else {
        println!("Pending review: none");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
