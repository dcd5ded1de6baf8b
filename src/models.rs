//! Data models for the analysis controller.
//!
//! This module contains the core data structures used throughout
//! the application: sessions, steps, limits, outcomes and reports.

use crate::analysis::{OutcomeCounts, RecoveryTotals};
use crate::tracker::CoverageTracker;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// One of the fixed analysis categories a step can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicCategory {
    DataExploration,
    Correlations,
    Distributions,
    Visualizations,
    Patterns,
    Statistics,
    TargetAnalysis,
    FeatureAnalysis,
}

impl TopicCategory {
    /// All categories, in the order the prompts suggest covering them.
    pub const ALL: [TopicCategory; 8] = [
        TopicCategory::DataExploration,
        TopicCategory::Correlations,
        TopicCategory::Distributions,
        TopicCategory::Visualizations,
        TopicCategory::Patterns,
        TopicCategory::Statistics,
        TopicCategory::TargetAnalysis,
        TopicCategory::FeatureAnalysis,
    ];

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            TopicCategory::DataExploration => "Data Exploration",
            TopicCategory::Correlations => "Correlations",
            TopicCategory::Distributions => "Distributions",
            TopicCategory::Visualizations => "Visualizations",
            TopicCategory::Patterns => "Patterns",
            TopicCategory::Statistics => "Statistics",
            TopicCategory::TargetAnalysis => "Target Analysis",
            TopicCategory::FeatureAnalysis => "Feature Analysis",
        }
    }
}

impl fmt::Display for TopicCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Lifecycle status of an analysis session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Aborted,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Running => write!(f, "Running"),
            SessionStatus::Completed => write!(f, "Completed"),
            SessionStatus::Aborted => write!(f, "Aborted"),
        }
    }
}

/// How a session was started. Selects the opening prompt and default limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// Open-ended exploration of a goal, finishing when coverage says so.
    #[default]
    AutoDetect,
    /// Comprehensive dataset summary.
    Summary,
    /// User-supplied prompt, run as-is.
    CustomAutorun,
    /// Forced iterative mode with a higher floor.
    ManualIterate,
}

impl CompletionMode {
    /// Default `(min_steps, max_steps)` for this mode.
    pub fn default_bounds(&self) -> (usize, usize) {
        match self {
            CompletionMode::AutoDetect => (3, 20),
            CompletionMode::Summary => (5, 25),
            CompletionMode::CustomAutorun => (3, 15),
            CompletionMode::ManualIterate => (5, 25),
        }
    }
}

impl fmt::Display for CompletionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionMode::AutoDetect => write!(f, "auto-detect"),
            CompletionMode::Summary => write!(f, "summary"),
            CompletionMode::CustomAutorun => write!(f, "custom autorun"),
            CompletionMode::ManualIterate => write!(f, "manual iterate"),
        }
    }
}

/// Errors raised when building iteration limits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitsError {
    #[error("max_steps must be at least 1")]
    ZeroMaxSteps,
    #[error("min_steps ({min}) cannot exceed max_steps ({max})")]
    MinAboveMax { min: usize, max: usize },
}

/// Step bounds for one invocation. Never mutated mid-session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationLimits {
    pub min_steps: usize,
    pub max_steps: usize,
    pub completion_mode: CompletionMode,
}

impl IterationLimits {
    /// Create validated limits.
    pub fn new(
        min_steps: usize,
        max_steps: usize,
        completion_mode: CompletionMode,
    ) -> Result<Self, LimitsError> {
        if max_steps == 0 {
            return Err(LimitsError::ZeroMaxSteps);
        }
        if min_steps > max_steps {
            return Err(LimitsError::MinAboveMax {
                min: min_steps,
                max: max_steps,
            });
        }
        Ok(Self {
            min_steps,
            max_steps,
            completion_mode,
        })
    }

    /// Limits for a mode, with optional overrides for either bound.
    ///
    /// A mode's default minimum is lowered to an overridden maximum. An
    /// explicit minimum above the maximum is still an error.
    pub fn for_mode(
        mode: CompletionMode,
        min_override: Option<usize>,
        max_override: Option<usize>,
    ) -> Result<Self, LimitsError> {
        let (default_min, default_max) = mode.default_bounds();
        let max = max_override.unwrap_or(default_max);
        let min = min_override.unwrap_or_else(|| default_min.min(max));
        Self::new(min, max, mode)
    }
}

/// Failure taxonomy shared by the assistant and sandbox paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AssistantUnavailable,
    NotFound,
    Timeout,
    Import,
    DataAccess,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::AssistantUnavailable => write!(f, "assistant unavailable"),
            ErrorKind::NotFound => write!(f, "sandbox not found"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Import => write!(f, "missing dependency"),
            ErrorKind::DataAccess => write!(f, "data access"),
            ErrorKind::Other => write!(f, "execution error"),
        }
    }
}

/// Result of running a step's code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success { output: String },
    Failure { kind: ErrorKind, message: String },
    /// The reply carried no code, so nothing ran.
    NotExecuted,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ExecutionOutcome::Failure { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// What a recovery did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryKind {
    Reinitialized,
    Reuploaded,
}

/// A recovery performed while a step was in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryAction {
    pub kind: RecoveryKind,
    /// The failure that triggered it.
    pub trigger: ErrorKind,
    /// Sandbox generation after the recovery.
    pub generation: u32,
}

/// One iteration's outcome. Immutable once appended to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// 1-based position in the session history.
    pub index: usize,
    pub prompt_sent: String,
    pub assistant_narrative: String,
    /// Code returned for execution (empty when the reply had none).
    #[serde(default)]
    pub generated_code: String,
    pub execution_outcome: ExecutionOutcome,
    pub detected_topics: BTreeSet<TopicCategory>,
    /// Execution attempts made for this step (0, 1 or 2).
    #[serde(default)]
    pub attempts: u8,
    #[serde(default)]
    pub recoveries: Vec<RecoveryAction>,
    /// Image results produced by the step's code.
    #[serde(default)]
    pub artifact_count: usize,
    /// Files the image results were written to, if any.
    #[serde(default)]
    pub artifact_files: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    MaxStepsReached,
    ExplicitSignal { phrase: String },
    CoverageSatisfied { covered: usize },
    RepetitionDetected,
    AssistantUnavailable { consecutive: usize },
    Fatal { cause: String },
    UserAborted,
}

impl StopReason {
    /// Whether this reason ends the session as `Aborted` rather than `Completed`.
    pub fn is_abort(&self) -> bool {
        matches!(self, StopReason::Fatal { .. } | StopReason::UserAborted)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::MaxStepsReached => write!(f, "maximum step count reached"),
            StopReason::ExplicitSignal { phrase } => {
                write!(f, "assistant signalled completion ('{}')", phrase)
            }
            StopReason::CoverageSatisfied { covered } => {
                write!(f, "coverage satisfied ({} topics)", covered)
            }
            StopReason::RepetitionDetected => write!(f, "analysis became repetitive"),
            StopReason::AssistantUnavailable { consecutive } => write!(
                f,
                "assistant unavailable for {} consecutive steps",
                consecutive
            ),
            StopReason::Fatal { cause } => write!(f, "fatal: {}", cause),
            StopReason::UserAborted => write!(f, "aborted by user"),
        }
    }
}

/// Dataset handed over by the loading layer. Never parsed here.
#[derive(Clone, PartialEq, Eq)]
pub struct DatasetRef {
    pub name: String,
    pub content: Vec<u8>,
}

impl DatasetRef {
    pub fn new(name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content,
        }
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

impl fmt::Debug for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetRef")
            .field("name", &self.name)
            .field("bytes", &self.content.len())
            .finish()
    }
}

/// The unit of work for one dataset.
///
/// `steps` is append-only and `coverage` is only ever updated from the
/// steps appended through [`AnalysisSession::append_step`], so coverage can
/// always be rebuilt by replaying the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSession {
    goal: String,
    mode: CompletionMode,
    dataset_name: String,
    #[serde(default)]
    dataset_overview: Option<String>,
    steps: Vec<StepRecord>,
    coverage: CoverageTracker,
    status: SessionStatus,
    #[serde(default)]
    stop_reason: Option<StopReason>,
    started_at: DateTime<Utc>,
    #[serde(default)]
    finished_at: Option<DateTime<Utc>>,
}

impl AnalysisSession {
    /// Start a new, empty session.
    pub fn new(
        goal: impl Into<String>,
        mode: CompletionMode,
        dataset_name: impl Into<String>,
    ) -> Self {
        Self {
            goal: goal.into(),
            mode,
            dataset_name: dataset_name.into(),
            dataset_overview: None,
            steps: Vec::new(),
            coverage: CoverageTracker::default(),
            status: SessionStatus::Running,
            stop_reason: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn mode(&self) -> CompletionMode {
        self.mode
    }

    pub fn dataset_name(&self) -> &str {
        &self.dataset_name
    }

    pub fn dataset_overview(&self) -> Option<&str> {
        self.dataset_overview.as_deref()
    }

    pub fn set_dataset_overview(&mut self, overview: impl Into<String>) {
        self.dataset_overview = Some(overview.into());
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last_step(&self) -> Option<&StepRecord> {
        self.steps.last()
    }

    pub fn coverage(&self) -> &CoverageTracker {
        &self.coverage
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Index the next appended step will get.
    pub fn next_index(&self) -> usize {
        self.steps.len() + 1
    }

    /// Append a step and record its topics.
    pub fn append_step(&mut self, step: StepRecord) {
        self.coverage.record(&step);
        self.steps.push(step);
    }

    /// Stop the session. Fatal and user aborts end as `Aborted`.
    pub fn finish(&mut self, reason: StopReason) {
        self.status = if reason.is_abort() {
            SessionStatus::Aborted
        } else {
            SessionStatus::Completed
        };
        self.stop_reason = Some(reason);
        self.finished_at = Some(Utc::now());
    }

    /// Put a restored session back into the running state.
    pub fn resume(&mut self) {
        self.status = SessionStatus::Running;
        self.stop_reason = None;
        self.finished_at = None;
    }

    /// Rebuild coverage from the step history.
    pub fn recompute_coverage(&self) -> CoverageTracker {
        CoverageTracker::replay(&self.steps)
    }

    /// Replace stored coverage with the replayed one. Returns true if they differed.
    pub fn repair_coverage(&mut self) -> bool {
        let replayed = self.recompute_coverage();
        if replayed != self.coverage {
            self.coverage = replayed;
            true
        } else {
            false
        }
    }
}

/// Metadata about the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub dataset: String,
    pub goal: String,
    pub mode: CompletionMode,
    pub model_used: String,
    pub generated_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub min_steps: usize,
    pub max_steps: usize,
}

/// One line of the step log in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSummary {
    pub index: usize,
    pub narrative: String,
    pub topics: Vec<TopicCategory>,
    pub outcome: ExecutionOutcome,
    pub attempts: u8,
    pub recoveries: usize,
    pub artifacts: usize,
}

/// The complete session report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub metadata: ReportMetadata,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    pub total_steps: usize,
    pub coverage: BTreeMap<TopicCategory, u32>,
    /// Coverage counted over successful steps only.
    pub successful_coverage: BTreeMap<TopicCategory, u32>,
    /// Step indices that touched each covered topic.
    #[serde(default)]
    pub steps_by_topic: BTreeMap<TopicCategory, Vec<usize>>,
    pub covered_topics: Vec<TopicCategory>,
    pub remaining_topics: Vec<TopicCategory>,
    pub outcomes: OutcomeCounts,
    pub recoveries: RecoveryTotals,
    pub steps_with_artifacts: usize,
    pub steps: Vec<StepSummary>,
}

impl SessionReport {
    /// "Comprehensive" when at least `threshold` topics were covered.
    pub fn quality(&self, threshold: usize) -> &'static str {
        if self.covered_topics.len() >= threshold {
            "Comprehensive"
        } else {
            "Partial"
        }
    }
}
