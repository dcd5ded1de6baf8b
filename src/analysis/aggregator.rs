//! Step aggregation and statistics.
//!
//! Pure helpers over a step history. Nothing here feeds back into the
//! controller; the results are only used for reporting.

use crate::models::{ErrorKind, ExecutionOutcome, RecoveryKind, StepRecord, TopicCategory};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Outcome totals for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub success: usize,
    pub failure: usize,
    pub not_executed: usize,
    /// Failures broken down by kind
    pub by_kind: BTreeMap<ErrorKind, usize>,
}

/// Recovery totals for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryTotals {
    pub reinitializations: usize,
    pub reuploads: usize,
}

impl RecoveryTotals {
    pub fn total(&self) -> usize {
        self.reinitializations + self.reuploads
    }
}

/// Count step outcomes.
pub fn outcome_counts(steps: &[StepRecord]) -> OutcomeCounts {
    let mut counts = OutcomeCounts::default();

    for step in steps {
        match &step.execution_outcome {
            ExecutionOutcome::Success { .. } => counts.success += 1,
            ExecutionOutcome::NotExecuted => counts.not_executed += 1,
            ExecutionOutcome::Failure { kind, .. } => {
                counts.failure += 1;
                *counts.by_kind.entry(*kind).or_default() += 1;
            }
        }
    }

    counts
}

/// Coverage counted over successful steps only.
pub fn successful_coverage(steps: &[StepRecord]) -> BTreeMap<TopicCategory, u32> {
    let mut coverage: BTreeMap<TopicCategory, u32> =
        TopicCategory::ALL.iter().map(|t| (*t, 0)).collect();

    for step in steps.iter().filter(|s| s.execution_outcome.is_success()) {
        for topic in &step.detected_topics {
            *coverage.entry(*topic).or_default() += 1;
        }
    }

    coverage
}

/// Step indices grouped by detected topic.
pub fn group_by_topic(steps: &[StepRecord]) -> HashMap<TopicCategory, Vec<usize>> {
    let mut grouped: HashMap<TopicCategory, Vec<usize>> = HashMap::new();

    for step in steps {
        for topic in &step.detected_topics {
            grouped.entry(*topic).or_default().push(step.index);
        }
    }

    grouped
}

/// Sum the recoveries performed across all steps.
pub fn recovery_totals(steps: &[StepRecord]) -> RecoveryTotals {
    let mut totals = RecoveryTotals::default();

    for action in steps.iter().flat_map(|s| &s.recoveries) {
        match action.kind {
            RecoveryKind::Reinitialized => totals.reinitializations += 1,
            RecoveryKind::Reuploaded => totals.reuploads += 1,
        }
    }

    totals
}

/// Number of steps that produced at least one image.
pub fn steps_with_artifacts(steps: &[StepRecord]) -> usize {
    steps.iter().filter(|s| s.artifact_count > 0).count()
}

/// Most frequent failure kind, if any step failed.
pub fn dominant_failure(counts: &OutcomeCounts) -> Option<ErrorKind> {
    counts
        .by_kind
        .iter()
        .max_by_key(|(kind, count)| (**count, std::cmp::Reverse(**kind)))
        .map(|(kind, _)| *kind)
}
