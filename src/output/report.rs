// Report file generation — writes the trend matrix as CSV (for
// spreadsheets) and Markdown (for sharing) into the report directory.
//
// File names embed the window end date so consecutive runs do not clobber
// each other's reports.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;

use crate::trend::TrendMatrix;

/// Write both report formats. Returns the (csv, markdown) paths.
pub fn write_reports(
    matrix: &TrendMatrix,
    report_dir: &str,
    end: NaiveDate,
) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(report_dir)
        .with_context(|| format!("Failed to create report directory {report_dir}"))?;

    let csv_path = Path::new(report_dir).join(format!("trend_report_{end}.csv"));
    std::fs::write(&csv_path, render_csv(matrix))
        .with_context(|| format!("Failed to write {}", csv_path.display()))?;

    let md_path = Path::new(report_dir).join(format!("trend_report_{end}.md"));
    std::fs::write(&md_path, render_markdown(matrix))
        .with_context(|| format!("Failed to write {}", md_path.display()))?;

    Ok((csv_path, md_path))
}

pub fn render_csv(matrix: &TrendMatrix) -> String {
    let mut out = String::from("topic_id,topic");
    for date in &matrix.dates {
        out.push_str(&format!(",{date}"));
    }
    out.push_str(",total,moving_average,delta,spike\n");

    for row in &matrix.rows {
        out.push_str(&format!("{},{}", row.topic_id, csv_escape(&row.label)));
        for &count in &row.counts {
            out.push_str(&format!(",{count}"));
        }
        out.push_str(&format!(
            ",{},{:.2},{},{}\n",
            row.window_total(),
            row.moving_average,
            row.delta,
            if row.has_spike() { "yes" } else { "no" }
        ));
    }
    out
}

pub fn render_markdown(matrix: &TrendMatrix) -> String {
    let window = match (matrix.dates.first(), matrix.dates.last()) {
        (Some(start), Some(end)) => format!("{start} to {end}"),
        _ => String::from("empty window"),
    };
    let mut out = format!("# Topic Trend Report ({window})\n\n");

    if matrix.rows.is_empty() {
        out.push_str("No mentions recorded in this window.\n");
        return out;
    }

    out.push_str("| Topic |");
    for date in &matrix.dates {
        out.push_str(&format!(" {} |", date.format("%m-%d")));
    }
    out.push_str(" Total | Avg | Delta |\n");

    out.push_str("|---|");
    for _ in &matrix.dates {
        out.push_str("---|");
    }
    out.push_str("---|---|---|\n");

    for row in &matrix.rows {
        out.push_str(&format!("| {} |", md_escape(&row.label)));
        for (i, &count) in row.counts.iter().enumerate() {
            // Spike days rendered bold
            if row.spike_days.get(i).copied().unwrap_or(false) {
                out.push_str(&format!(" **{count}** |"));
            } else {
                out.push_str(&format!(" {count} |"));
            }
        }
        out.push_str(&format!(
            " {} | {:.1} | {:+} |\n",
            row.window_total(),
            row.moving_average,
            row.delta
        ));
    }

    let spiking: Vec<&str> = matrix
        .rows
        .iter()
        .filter(|r| r.has_spike())
        .map(|r| r.label.as_str())
        .collect();
    if !spiking.is_empty() {
        out.push_str(&format!("\nSpiking topics: {}\n", spiking.join(", ")));
    }
    out
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn md_escape(field: &str) -> String {
    field.replace('|', "\\|")
}
