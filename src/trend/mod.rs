// Trend matrix — assembles a sliding window of daily counts per topic and
// derives the signals the report renderer consumes.
//
// Nothing here is primary state: the matrix is recomputed on demand from
// the registry and the persisted daily stats for the requested window.
// Counts recorded before a merge are folded into the surviving root at
// build time, so the matrix always reflects the current taxonomy.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{Duration, NaiveDate};

use crate::db::queries;
use crate::registry::{TopicId, TopicRegistry};

/// One topic's row: per-date counts plus derived signals, ready to be
/// serialized to any tabular format.
#[derive(Debug, Clone)]
pub struct TrendRow {
    pub topic_id: TopicId,
    pub label: String,
    /// One count per window date, ascending, zero-filled.
    pub counts: Vec<u64>,
    /// Mean of the row over the full window.
    pub moving_average: f64,
    /// Window sum minus the immediately preceding, non-overlapping
    /// window's sum for the same topic.
    pub delta: i64,
    /// Per-date spike flags, aligned with `counts`. All false when the row
    /// has fewer than two non-zero days.
    pub spike_days: Vec<bool>,
}

impl TrendRow {
    pub fn window_total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn has_spike(&self) -> bool {
        self.spike_days.iter().any(|&s| s)
    }
}

/// The assembled window: columns (dates ascending) and rows (topics ranked
/// by total mentions descending, ties alphabetical by label).
#[derive(Debug, Clone)]
pub struct TrendMatrix {
    pub dates: Vec<NaiveDate>,
    pub rows: Vec<TrendRow>,
}

pub struct TrendMatrixBuilder {
    /// Window length N in days.
    pub window_days: usize,
    /// A day spikes when its count exceeds this multiple of the mean of
    /// the row's other days.
    pub spike_factor: f64,
}

impl Default for TrendMatrixBuilder {
    fn default() -> Self {
        Self {
            window_days: 7,
            spike_factor: 2.0,
        }
    }
}

impl TrendMatrixBuilder {
    /// Build the matrix for the window `[end - N + 1, end]` inclusive.
    ///
    /// Rows cover every topic whose resolved root has at least one mention
    /// inside the window; dates with no mention are filled with 0.
    pub fn build(&self, registry: &TopicRegistry, end: NaiveDate) -> Result<TrendMatrix> {
        let n = self.window_days as i64;
        let window_start = end - Duration::days(n - 1);
        // The preceding non-overlapping window, for the delta signal
        let prev_start = window_start - Duration::days(n);
        let prev_end = window_start - Duration::days(1);

        let dates: Vec<NaiveDate> = (0..n).map(|i| window_start + Duration::days(i)).collect();
        let index_of: BTreeMap<NaiveDate, usize> =
            dates.iter().enumerate().map(|(i, &d)| (d, i)).collect();

        // Fold stats onto current roots. Counts recorded under an id that
        // has since been merged land on the surviving topic.
        let mut window_counts: BTreeMap<TopicId, Vec<u64>> = BTreeMap::new();
        for (date, topic_id, count) in
            queries::get_stats_in_window(registry.connection(), window_start, end)?
        {
            let root = registry.resolve(topic_id);
            let row = window_counts
                .entry(root)
                .or_insert_with(|| vec![0; dates.len()]);
            row[index_of[&date]] += count;
        }

        let mut prev_totals: BTreeMap<TopicId, u64> = BTreeMap::new();
        for (_, topic_id, count) in
            queries::get_stats_in_window(registry.connection(), prev_start, prev_end)?
        {
            *prev_totals.entry(registry.resolve(topic_id)).or_insert(0) += count;
        }

        let mut rows: Vec<TrendRow> = Vec::with_capacity(window_counts.len());
        for (root, counts) in window_counts {
            let label = registry
                .topic(root)
                .map(|t| t.label.clone())
                .unwrap_or_else(|| format!("topic {root}"));

            let window_sum: u64 = counts.iter().sum();
            let moving_average = window_sum as f64 / dates.len() as f64;
            let delta = window_sum as i64 - prev_totals.get(&root).copied().unwrap_or(0) as i64;
            let spike_days = spike_flags(&counts, self.spike_factor);

            rows.push(TrendRow {
                topic_id: root,
                label,
                counts,
                moving_average,
                delta,
                spike_days,
            });
        }

        rows.sort_by(|a, b| {
            let a_total = registry.topic(a.topic_id).map(|t| t.total_mentions).unwrap_or(0);
            let b_total = registry.topic(b.topic_id).map(|t| t.total_mentions).unwrap_or(0);
            b_total.cmp(&a_total).then_with(|| a.label.cmp(&b.label))
        });

        Ok(TrendMatrix { dates, rows })
    }
}

/// Per-day spike flags: day `i` spikes when its count exceeds
/// `spike_factor × mean(other days)`. Rows with fewer than two non-zero
/// days never spike — a lone burst on an otherwise empty row is noise,
/// not a trend signal.
fn spike_flags(counts: &[u64], spike_factor: f64) -> Vec<bool> {
    let non_zero = counts.iter().filter(|&&c| c > 0).count();
    if non_zero < 2 || counts.len() < 2 {
        return vec![false; counts.len()];
    }

    let total: u64 = counts.iter().sum();
    counts
        .iter()
        .map(|&c| {
            let other_mean = (total - c) as f64 / (counts.len() - 1) as f64;
            c as f64 > spike_factor * other_mean
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spike_scenario_from_week_of_counts() {
        // counts [0,0,2,5,3,1,0]: the 5 spikes (5 > 2 × mean(0,0,2,3,1,0) = 2.0)
        // and so does the 3 (3 > 2 × mean(0,0,2,5,1,0) ≈ 2.67)
        let flags = spike_flags(&[0, 0, 2, 5, 3, 1, 0], 2.0);
        assert_eq!(flags, vec![false, false, false, true, true, false, false]);
    }

    #[test]
    fn spike_requires_two_non_zero_days() {
        // A lone burst never flags, whatever its size
        let flags = spike_flags(&[0, 0, 50, 0, 0, 0, 0], 2.0);
        assert!(flags.iter().all(|&f| !f));
    }

    #[test]
    fn uniform_row_has_no_spike() {
        let flags = spike_flags(&[3, 3, 3, 3, 3, 3, 3], 2.0);
        assert!(flags.iter().all(|&f| !f));
    }

    #[test]
    fn spike_factor_is_strict_inequality() {
        // [4,2,2]: other-mean for the 4 is 2.0; 4 > 2×2.0 is false
        let flags = spike_flags(&[4, 2, 2], 2.0);
        assert!(!flags[0]);
        // but with a lower factor it flags
        let flags = spike_flags(&[4, 2, 2], 1.5);
        assert!(flags[0]);
    }

    #[test]
    fn empty_and_single_day_rows() {
        assert!(spike_flags(&[], 2.0).is_empty());
        assert_eq!(spike_flags(&[5], 2.0), vec![false]);
    }
}
