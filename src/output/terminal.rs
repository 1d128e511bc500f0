// Colored terminal output for trend matrices, run summaries, and the
// review queue. The main.rs display functions delegate here.

use chrono::NaiveDate;
use colored::Colorize;

use crate::db::models::PendingReviewItem;
use crate::output::truncate_chars;
use crate::pipeline::ProcessSummary;
use crate::registry::TopicRegistry;
use crate::trend::TrendMatrix;

const LABEL_WIDTH: usize = 32;

/// Display the trend matrix as a ranked table, one row per topic.
pub fn display_trend_matrix(matrix: &TrendMatrix) {
    if matrix.rows.is_empty() {
        println!("No mentions recorded in this window. Run `groundswell process <date>` first.");
        return;
    }

    let window = format!(
        "{} .. {}",
        matrix.dates.first().map(ToString::to_string).unwrap_or_default(),
        matrix.dates.last().map(ToString::to_string).unwrap_or_default(),
    );
    println!(
        "\n{}",
        format!("=== Topic Trends ({} topics, {window}) ===", matrix.rows.len()).bold()
    );
    println!();

    // Header: one short column per window date
    let mut header = format!("  {:<width$}", "Topic".dimmed(), width = LABEL_WIDTH + 2);
    for date in &matrix.dates {
        header.push_str(&format!(" {:>5}", date.format("%m-%d").to_string().dimmed()));
    }
    header.push_str(&format!(
        " {:>6} {:>6} {:>6}",
        "Total".dimmed(),
        "Avg".dimmed(),
        "Delta".dimmed()
    ));
    println!("{header}");
    println!(
        "  {}",
        "-".repeat(LABEL_WIDTH + 2 + matrix.dates.len() * 6 + 21).dimmed()
    );

    for row in &matrix.rows {
        let mut line = format!(
            "  {:<width$}",
            truncate_chars(&row.label, LABEL_WIDTH),
            width = LABEL_WIDTH + 2
        );
        for (i, &count) in row.counts.iter().enumerate() {
            let cell = format!("{count:>5}");
            if row.spike_days.get(i).copied().unwrap_or(false) {
                line.push_str(&format!(" {}", cell.red().bold()));
            } else if count == 0 {
                line.push_str(&format!(" {}", cell.dimmed()));
            } else {
                line.push_str(&format!(" {cell}"));
            }
        }

        let delta = match row.delta {
            d if d > 0 => format!("{:>+6}", d).red().to_string(),
            d if d < 0 => format!("{:>6}", d).green().to_string(),
            _ => format!("{:>6}", 0).normal().to_string(),
        };
        line.push_str(&format!(
            " {:>6} {:>6.1} {delta}",
            row.window_total(),
            row.moving_average
        ));
        println!("{line}");
    }

    println!();

    // Top movers by volume inside this window
    let mut by_window: Vec<&crate::trend::TrendRow> = matrix.rows.iter().collect();
    by_window.sort_by(|a, b| b.window_total().cmp(&a.window_total()));
    println!("{}", "  Top trending this window:".bold());
    for (i, row) in by_window.iter().take(10).enumerate() {
        println!(
            "  {:>2}. {} ({} mentions)",
            i + 1,
            truncate_chars(&row.label, 48),
            row.window_total()
        );
    }

    println!();
    let spiking = matrix.rows.iter().filter(|r| r.has_spike()).count();
    if spiking > 0 {
        println!(
            "  {} {} topic(s) with a spike day (highlighted in red)",
            "!".red().bold(),
            spiking
        );
    }
    let rising = matrix.rows.iter().filter(|r| r.delta > 0).count();
    if rising > 0 {
        println!("  {} {} topic(s) rising vs the previous window", "~".yellow(), rising);
    }
}

/// Display what one processing run did.
pub fn display_process_summary(date: NaiveDate, summary: &ProcessSummary) {
    println!("\n{}", format!("=== Processed {date} ===").bold());
    println!("  Reviews loaded:   {}", summary.reviews_loaded);
    println!("  Topic candidates: {}", summary.candidates);
    println!(
        "  Matched: {}  New topics: {}  Low-confidence merges: {}",
        summary.matched,
        summary.created.to_string().cyan(),
        summary.low_confidence
    );
    println!(
        "  Counted: {} mention(s) across {} topic(s)",
        summary.mentions_counted, summary.topics_counted
    );
    if summary.queued > 0 {
        println!(
            "  {} {} borderline candidate(s) queued — run `groundswell review-queue`",
            "~".yellow(),
            summary.queued
        );
    }
    if summary.unprocessed > 0 {
        println!(
            "  {} {} review(s) skipped after provider failures (recorded for re-run)",
            "!".red(),
            summary.unprocessed
        );
    }
}

/// Display unresolved borderline candidates with their nearest topic.
pub fn display_review_queue(items: &[PendingReviewItem], registry: &TopicRegistry) {
    if items.is_empty() {
        println!("Review queue is empty.");
        return;
    }

    println!(
        "\n{}",
        format!("=== Review Queue ({} pending) ===", items.len()).bold()
    );
    println!();
    println!(
        "  {:>4}  {:<10}  {:<32}  {:<32}  {:>5}",
        "Id".dimmed(),
        "Date".dimmed(),
        "Candidate".dimmed(),
        "Nearest topic".dimmed(),
        "Sim".dimmed(),
    );
    println!("  {}", "-".repeat(92).dimmed());

    for item in items {
        let nearest = registry
            .topic(registry.resolve(item.nearest_topic_id))
            .map(|t| t.label.clone())
            .unwrap_or_else(|| format!("topic {}", item.nearest_topic_id));
        println!(
            "  {:>4}  {:<10}  {:<32}  {:<32}  {:>5.2}",
            item.id,
            item.date.to_string(),
            truncate_chars(&item.label, 30),
            truncate_chars(&nearest, 30),
            item.similarity,
        );
    }
    println!();
}
