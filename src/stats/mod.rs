// Daily stats aggregation — folds a day's matched observations into
// per-topic mention counts.
//
// The cap exists because one verbose review can repeat the same complaint
// phrase several times; without it a single review would dominate a topic's
// daily count. Persisting the result is an overwrite (db::queries::
// save_daily_stats), so reprocessing a date is idempotent.

use std::collections::BTreeMap;

use crate::registry::TopicId;

/// One matched mention: topic root + the review it came from. Ephemeral —
/// lives only for the duration of a day's aggregation, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyObservation {
    pub topic_id: TopicId,
    pub review_id: String,
}

/// Folds observations into per-topic counts with a per-(topic, review) cap.
#[derive(Debug, Clone)]
pub struct DailyStatsAggregator {
    /// Max mentions counted per (topic, review) pair. Default 1.
    per_review_cap: u64,
}

impl Default for DailyStatsAggregator {
    fn default() -> Self {
        Self { per_review_cap: 1 }
    }
}

impl DailyStatsAggregator {
    pub fn new(per_review_cap: u64) -> Self {
        Self {
            per_review_cap: per_review_cap.max(1),
        }
    }

    /// Aggregate one day's observations into per-topic mention counts.
    ///
    /// Within the day, at most `per_review_cap` mentions are counted per
    /// (topic, review) pair regardless of how often the extractor surfaced
    /// that topic from one review.
    pub fn aggregate(&self, observations: &[DailyObservation]) -> BTreeMap<TopicId, u64> {
        let mut per_pair: BTreeMap<(TopicId, &str), u64> = BTreeMap::new();
        for obs in observations {
            *per_pair
                .entry((obs.topic_id, obs.review_id.as_str()))
                .or_insert(0) += 1;
        }

        let mut counts: BTreeMap<TopicId, u64> = BTreeMap::new();
        for ((topic_id, _), n) in per_pair {
            *counts.entry(topic_id).or_insert(0) += n.min(self.per_review_cap);
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(topic_id: TopicId, review_id: &str) -> DailyObservation {
        DailyObservation {
            topic_id,
            review_id: review_id.to_string(),
        }
    }

    #[test]
    fn empty_observations_empty_counts() {
        let agg = DailyStatsAggregator::default();
        assert!(agg.aggregate(&[]).is_empty());
    }

    #[test]
    fn distinct_reviews_each_count() {
        let agg = DailyStatsAggregator::default();
        let counts = agg.aggregate(&[obs(1, "r1"), obs(1, "r2"), obs(2, "r1")]);
        assert_eq!(counts, BTreeMap::from([(1, 2u64), (2, 1u64)]));
    }

    #[test]
    fn same_review_capped_at_one_by_default() {
        // A review mentioning the same topic three times contributes 1
        let agg = DailyStatsAggregator::default();
        let counts = agg.aggregate(&[obs(1, "r1"), obs(1, "r1"), obs(1, "r1")]);
        assert_eq!(counts, BTreeMap::from([(1, 1u64)]));
    }

    #[test]
    fn configurable_cap_allows_more() {
        let agg = DailyStatsAggregator::new(2);
        let counts = agg.aggregate(&[obs(1, "r1"), obs(1, "r1"), obs(1, "r1")]);
        assert_eq!(counts, BTreeMap::from([(1, 2u64)]));
    }

    #[test]
    fn cap_of_zero_is_clamped_to_one() {
        let agg = DailyStatsAggregator::new(0);
        let counts = agg.aggregate(&[obs(1, "r1")]);
        assert_eq!(counts, BTreeMap::from([(1, 1u64)]));
    }

    #[test]
    fn cap_applies_per_topic_within_a_review() {
        // One review mentioning two topics counts once for each
        let agg = DailyStatsAggregator::default();
        let counts = agg.aggregate(&[obs(1, "r1"), obs(2, "r1"), obs(2, "r1")]);
        assert_eq!(counts, BTreeMap::from([(1, 1u64), (2, 1u64)]));
    }

    #[test]
    fn aggregation_is_deterministic() {
        let agg = DailyStatsAggregator::default();
        let forward = agg.aggregate(&[obs(1, "r1"), obs(2, "r2"), obs(1, "r3")]);
        let reversed = agg.aggregate(&[obs(1, "r3"), obs(2, "r2"), obs(1, "r1")]);
        assert_eq!(forward, reversed);
    }
}
