//! Topic coverage tracking.
//!
//! The tracker keeps a running count of how many steps addressed each
//! [`TopicCategory`]. Topic detection itself lives behind the
//! [`TopicClassifier`] trait so matching rules can be swapped.

pub mod classifier;

pub use classifier::{KeywordClassifier, TopicClassifier};

use crate::models::{StepRecord, TopicCategory};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Running record of which categories have been addressed.
///
/// Counts only grow. A category with no entry has count zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoverageTracker {
    counts: BTreeMap<TopicCategory, u32>,
}

impl CoverageTracker {
    /// Rebuild a tracker by recording every step in order.
    pub fn replay<'a>(steps: impl IntoIterator<Item = &'a StepRecord>) -> Self {
        let mut tracker = Self::default();
        for step in steps {
            tracker.record(step);
        }
        tracker
    }

    /// Add one to each category detected in the step.
    pub fn record(&mut self, step: &StepRecord) {
        for topic in &step.detected_topics {
            *self.counts.entry(*topic).or_insert(0) += 1;
        }
    }

    /// Count per category, including zero entries for every category.
    pub fn coverage_snapshot(&self) -> BTreeMap<TopicCategory, u32> {
        TopicCategory::ALL
            .iter()
            .map(|topic| (*topic, self.count(*topic)))
            .collect()
    }

    /// Number of categories addressed at least once.
    pub fn distinct_covered_count(&self) -> usize {
        self.counts.values().filter(|count| **count >= 1).count()
    }

    pub fn count(&self, topic: TopicCategory) -> u32 {
        self.counts.get(&topic).copied().unwrap_or(0)
    }

    pub fn covered_topics(&self) -> Vec<TopicCategory> {
        TopicCategory::ALL
            .iter()
            .copied()
            .filter(|topic| self.count(*topic) > 0)
            .collect()
    }

    pub fn remaining_topics(&self) -> Vec<TopicCategory> {
        TopicCategory::ALL
            .iter()
            .copied()
            .filter(|topic| self.count(*topic) == 0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::{ok, step};
    use crate::models::{ErrorKind, ExecutionOutcome};

    #[test]
    fn test_record_counts_each_detected_topic() {
        let mut tracker = CoverageTracker::default();
        tracker.record(&step(
            1,
            "",
            &[TopicCategory::Correlations, TopicCategory::Visualizations],
            ok(),
        ));
        tracker.record(&step(2, "", &[TopicCategory::Correlations], ok()));
        tracker.record(&step(3, "", &[], ok()));

        assert_eq!(tracker.count(TopicCategory::Correlations), 2);
        assert_eq!(tracker.count(TopicCategory::Visualizations), 1);
        assert_eq!(tracker.count(TopicCategory::Patterns), 0);
        assert_eq!(tracker.distinct_covered_count(), 2);
    }

    #[test]
    fn test_snapshot_lists_every_category() {
        let tracker = CoverageTracker::default();
        let snapshot = tracker.coverage_snapshot();
        assert_eq!(snapshot.len(), 8);
        assert!(snapshot.values().all(|count| *count == 0));
    }

    #[test]
    fn test_snapshot_is_idempotent() {
        let mut tracker = CoverageTracker::default();
        tracker.record(&step(1, "", &[TopicCategory::Statistics], ok()));
        assert_eq!(tracker.coverage_snapshot(), tracker.coverage_snapshot());
    }

    #[test]
    fn test_failed_steps_still_count() {
        let mut tracker = CoverageTracker::default();
        tracker.record(&step(
            1,
            "",
            &[TopicCategory::Distributions],
            ExecutionOutcome::Failure {
                kind: ErrorKind::Other,
                message: "boom".to_string(),
            },
        ));
        assert_eq!(tracker.count(TopicCategory::Distributions), 1);
    }

    #[test]
    fn test_replay_matches_incremental_recording() {
        let steps = vec![
            step(1, "", &[TopicCategory::DataExploration], ok()),
            step(2, "", &[TopicCategory::Patterns, TopicCategory::Statistics], ok()),
            step(3, "", &[TopicCategory::Patterns], ok()),
        ];

        let mut incremental = CoverageTracker::default();
        for s in &steps {
            incremental.record(s);
        }

        assert_eq!(CoverageTracker::replay(&steps), incremental);
    }

    #[test]
    fn test_covered_and_remaining_partition_categories() {
        let mut tracker = CoverageTracker::default();
        tracker.record(&step(
            1,
            "",
            &[TopicCategory::Correlations, TopicCategory::FeatureAnalysis],
            ok(),
        ));

        let covered = tracker.covered_topics();
        let remaining = tracker.remaining_topics();
        assert_eq!(
            covered,
            vec![TopicCategory::Correlations, TopicCategory::FeatureAnalysis]
        );
        assert_eq!(covered.len() + remaining.len(), TopicCategory::ALL.len());
        assert!(!remaining.contains(&TopicCategory::Correlations));
    }
}
