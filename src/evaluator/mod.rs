//! Completion evaluation for analysis sessions.
//!
//! The `CompletionEvaluator` decides after every step whether the session
//! should go on. It is a pure function of the session history and the
//! iteration limits, so the same inputs always give the same decision.

use crate::models::{AnalysisSession, ErrorKind, IterationLimits, StopReason};
use tracing::debug;

/// Phrases that mean the assistant considers the analysis finished.
pub const DEFAULT_COMPLETION_PHRASES: [&str; 10] = [
    "analysis is complete",
    "comprehensive analysis",
    "analysis complete",
    "sufficient insights",
    "thorough analysis",
    "complete understanding",
    "analysis finished",
    "all aspects covered",
    "comprehensive coverage",
    "analysis_complete",
];

/// Decision returned after each step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopDecision {
    /// Run another step
    Continue,
    /// Stop with the given reason
    Stop(StopReason),
}

impl StopDecision {
    pub fn reason(&self) -> Option<&StopReason> {
        match self {
            StopDecision::Continue => None,
            StopDecision::Stop(reason) => Some(reason),
        }
    }
}

/// Thresholds used by the evaluator.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Distinct categories needed for `CoverageSatisfied`
    pub coverage_threshold: usize,
    /// Trailing steps compared for `RepetitionDetected`
    pub repetition_window: usize,
    /// Lowercase phrases matched against the latest narrative
    pub completion_phrases: Vec<String>,
    /// Trailing assistant failures that stop the session (0 disables)
    pub max_consecutive_assistant_failures: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            coverage_threshold: 4,
            repetition_window: 3,
            completion_phrases: DEFAULT_COMPLETION_PHRASES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            max_consecutive_assistant_failures: 3,
        }
    }
}

/// Continue-vs-stop decision maker.
#[derive(Debug, Clone, Default)]
pub struct CompletionEvaluator {
    config: EvaluatorConfig,
}

impl CompletionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EvaluatorConfig) -> Self {
        let completion_phrases = config
            .completion_phrases
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self {
            config: EvaluatorConfig {
                completion_phrases,
                ..config
            },
        }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Decide whether the session should stop. Rules apply in order and the
    /// first one that fires wins.
    pub fn should_stop(&self, session: &AnalysisSession, limits: &IterationLimits) -> StopDecision {
        let len = session.len();

        if len >= limits.max_steps {
            return StopDecision::Stop(StopReason::MaxStepsReached);
        }

        if len < limits.min_steps {
            debug!("Step {} is below the minimum of {}", len, limits.min_steps);
            return StopDecision::Continue;
        }

        if let Some(reason) = self.check_explicit_signal(session) {
            return StopDecision::Stop(reason);
        }

        if let Some(reason) = self.check_assistant_failures(session) {
            return StopDecision::Stop(reason);
        }

        if let Some(reason) = self.check_coverage(session) {
            return StopDecision::Stop(reason);
        }

        if let Some(reason) = self.check_repetition(session) {
            return StopDecision::Stop(reason);
        }

        StopDecision::Continue
    }

    fn check_explicit_signal(&self, session: &AnalysisSession) -> Option<StopReason> {
        let narrative = session.last_step()?.assistant_narrative.to_lowercase();
        self.config
            .completion_phrases
            .iter()
            .find(|phrase| narrative.contains(phrase.as_str()))
            .map(|phrase| StopReason::ExplicitSignal {
                phrase: phrase.clone(),
            })
    }

    fn check_assistant_failures(&self, session: &AnalysisSession) -> Option<StopReason> {
        let limit = self.config.max_consecutive_assistant_failures;
        if limit == 0 || session.len() < limit {
            return None;
        }

        let all_failed = session.steps()[session.len() - limit..].iter().all(|step| {
            step.execution_outcome.error_kind() == Some(ErrorKind::AssistantUnavailable)
        });

        all_failed.then_some(StopReason::AssistantUnavailable { consecutive: limit })
    }

    fn check_coverage(&self, session: &AnalysisSession) -> Option<StopReason> {
        let covered = session.coverage().distinct_covered_count();
        (covered >= self.config.coverage_threshold)
            .then_some(StopReason::CoverageSatisfied { covered })
    }

    fn check_repetition(&self, session: &AnalysisSession) -> Option<StopReason> {
        let window = self.config.repetition_window;
        if window < 2 || session.len() < window {
            return None;
        }

        let recent = &session.steps()[session.len() - window..];
        let first = &recent[0].detected_topics;
        if first.is_empty() {
            return None;
        }

        recent
            .iter()
            .all(|step| &step.detected_topics == first)
            .then_some(StopReason::RepetitionDetected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::{ok, step};
    use crate::models::{CompletionMode, ExecutionOutcome, TopicCategory};

    fn session_with(steps: Vec<crate::models::StepRecord>) -> AnalysisSession {
        let mut session = AnalysisSession::new("explore", CompletionMode::AutoDetect, "data.csv");
        for s in steps {
            session.append_step(s);
        }
        session
    }

    fn limits(min: usize, max: usize) -> IterationLimits {
        IterationLimits::new(min, max, CompletionMode::AutoDetect).unwrap()
    }

    fn assistant_failure() -> ExecutionOutcome {
        ExecutionOutcome::Failure {
            kind: ErrorKind::AssistantUnavailable,
            message: "connection refused".to_string(),
        }
    }

    #[test]
    fn test_max_steps_wins_over_everything() {
        let session = session_with(vec![
            step(1, "analysis complete", &[], ok()),
            step(2, "analysis complete", &[], ok()),
        ]);
        assert_eq!(
            CompletionEvaluator::new().should_stop(&session, &limits(0, 2)),
            StopDecision::Stop(StopReason::MaxStepsReached)
        );
    }

    #[test]
    fn test_below_minimum_continues() {
        let session = session_with(vec![
            step(1, "The analysis is complete.", &TopicCategory::ALL, ok()),
            step(2, "The analysis is complete.", &TopicCategory::ALL, ok()),
        ]);
        let decision = CompletionEvaluator::new().should_stop(&session, &limits(3, 20));
        assert_eq!(decision, StopDecision::Continue);
        assert!(decision.reason().is_none());
    }

    #[test]
    fn test_explicit_signal_is_case_insensitive() {
        let session = session_with(vec![
            step(1, "a", &[], ok()),
            step(2, "b", &[], ok()),
            step(3, "I now have SUFFICIENT INSIGHTS into the data", &[], ok()),
        ]);
        assert_eq!(
            CompletionEvaluator::new().should_stop(&session, &limits(3, 20)),
            StopDecision::Stop(StopReason::ExplicitSignal {
                phrase: "sufficient insights".to_string()
            })
        );
    }

    #[test]
    fn test_comprehensive_analysis_phrase_stops() {
        let session = session_with(vec![
            step(1, "a", &[], ok()),
            step(2, "b", &[], ok()),
            step(3, "c", &[], ok()),
            step(4, "d", &[], ok()),
            step(5, "This concludes a comprehensive analysis", &[], ok()),
        ]);
        assert_eq!(
            CompletionEvaluator::new().should_stop(&session, &limits(3, 20)),
            StopDecision::Stop(StopReason::ExplicitSignal {
                phrase: "comprehensive analysis".to_string()
            })
        );
    }

    #[test]
    fn test_blank_phrases_are_ignored() {
        let evaluator = CompletionEvaluator::with_config(EvaluatorConfig {
            completion_phrases: vec!["".to_string(), "   ".to_string(), "We Are Done".to_string()],
            ..Default::default()
        });
        assert_eq!(evaluator.config().completion_phrases, vec!["we are done"]);

        let session = session_with(vec![
            step(1, "a", &[], ok()),
            step(2, "b", &[], ok()),
            step(3, "still looking at the data", &[], ok()),
        ]);
        assert_eq!(evaluator.should_stop(&session, &limits(3, 20)), StopDecision::Continue);
    }

    #[test]
    fn test_explicit_signal_only_checks_latest_step() {
        let session = session_with(vec![
            step(1, "analysis complete", &[], ok()),
            step(2, "b", &[], ok()),
            step(3, "c", &[], ok()),
        ]);
        assert_eq!(
            CompletionEvaluator::new().should_stop(&session, &limits(3, 20)),
            StopDecision::Continue
        );
    }

    #[test]
    fn test_coverage_satisfied_at_threshold() {
        let session = session_with(vec![
            step(1, "a", &[TopicCategory::DataExploration, TopicCategory::Statistics], ok()),
            step(2, "b", &[TopicCategory::Correlations], ok()),
            step(3, "c", &[TopicCategory::Visualizations], ok()),
        ]);
        let decision = CompletionEvaluator::new().should_stop(&session, &limits(3, 20));
        match decision {
            StopDecision::Stop(StopReason::CoverageSatisfied { covered }) => {
                assert!(covered >= 4);
                assert!(session.len() >= 3);
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn test_coverage_below_threshold_continues() {
        let session = session_with(vec![
            step(1, "a", &[TopicCategory::DataExploration], ok()),
            step(2, "b", &[TopicCategory::Correlations], ok()),
            step(3, "c", &[TopicCategory::Visualizations], ok()),
        ]);
        assert_eq!(
            CompletionEvaluator::new().should_stop(&session, &limits(3, 20)),
            StopDecision::Continue
        );
    }

    #[test]
    fn test_repetition_detected() {
        let topics = [TopicCategory::Correlations];
        let session = session_with(vec![
            step(1, "a", &topics, ok()),
            step(2, "b", &topics, ok()),
            step(3, "c", &topics, ok()),
        ]);
        assert_eq!(
            CompletionEvaluator::new().should_stop(&session, &limits(3, 20)),
            StopDecision::Stop(StopReason::RepetitionDetected)
        );
    }

    #[test]
    fn test_empty_topic_sets_are_not_repetition() {
        let session = session_with(vec![
            step(1, "a", &[], ok()),
            step(2, "b", &[], ok()),
            step(3, "c", &[], ok()),
        ]);
        assert_eq!(
            CompletionEvaluator::new().should_stop(&session, &limits(3, 20)),
            StopDecision::Continue
        );
    }

    #[test]
    fn test_consecutive_assistant_failures_stop() {
        let session = session_with(vec![
            step(1, "", &[], assistant_failure()),
            step(2, "", &[], assistant_failure()),
            step(3, "", &[], assistant_failure()),
        ]);
        assert_eq!(
            CompletionEvaluator::new().should_stop(&session, &limits(3, 20)),
            StopDecision::Stop(StopReason::AssistantUnavailable { consecutive: 3 })
        );
    }

    #[test]
    fn test_assistant_failure_guard_can_be_disabled() {
        let session = session_with(vec![
            step(1, "", &[], assistant_failure()),
            step(2, "", &[], assistant_failure()),
            step(3, "", &[], assistant_failure()),
        ]);
        let evaluator = CompletionEvaluator::with_config(EvaluatorConfig {
            max_consecutive_assistant_failures: 0,
            ..EvaluatorConfig::default()
        });
        assert_eq!(
            evaluator.should_stop(&session, &limits(3, 20)),
            StopDecision::Continue
        );
    }

    #[test]
    fn test_custom_thresholds() {
        let session = session_with(vec![
            step(1, "a", &[TopicCategory::Patterns], ok()),
            step(2, "b", &[TopicCategory::Patterns], ok()),
        ]);
        let evaluator = CompletionEvaluator::with_config(EvaluatorConfig {
            repetition_window: 2,
            completion_phrases: vec!["ALL DONE".to_string()],
            ..EvaluatorConfig::default()
        });
        assert_eq!(evaluator.config().completion_phrases, vec!["all done"]);
        assert_eq!(
            evaluator.should_stop(&session, &limits(2, 20)),
            StopDecision::Stop(StopReason::RepetitionDetected)
        );
    }

    #[test]
    fn test_decision_is_deterministic() {
        let session = session_with(vec![
            step(1, "a", &[TopicCategory::Statistics], ok()),
            step(2, "b", &[TopicCategory::Patterns], ok()),
            step(3, "c", &[TopicCategory::Distributions], ok()),
        ]);
        let evaluator = CompletionEvaluator::new();
        let l = limits(3, 20);
        assert_eq!(evaluator.should_stop(&session, &l), evaluator.should_stop(&session, &l));
    }
}
