//! The iteration engine.
//!
//! Drives one analysis session step by step:
//! 1. probe the sandbox and recover if it is unhealthy
//! 2. build the next prompt from the session state
//! 3. ask the assistant
//! 4. execute the returned code through the recovery coordinator
//! 5. append the step, which updates coverage
//! 6. ask the evaluator whether to stop
//!
//! Steps are strictly sequential. The only suspension points inside a step
//! are the assistant reply and the sandbox execution.

pub mod prompt;

pub use prompt::PromptBuilder;

use crate::assistant::AssistantClient;
use crate::evaluator::{CompletionEvaluator, StopDecision};
use crate::models::{
    AnalysisSession, DatasetRef, ErrorKind, ExecutionOutcome, IterationLimits, SessionStatus,
    StepRecord, StopReason,
};
use crate::recovery::{FatalError, RecoveryConfig, RecoveryCoordinator, StepExecution};
use crate::report::artifacts::save_artifacts;
use crate::sandbox::{HealthMonitor, SandboxClient, SandboxHandle};
use crate::tracker::{KeywordClassifier, TopicClassifier};
use chrono::Utc;
use indicatif::ProgressBar;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Flag checked at iteration boundaries. Setting it ends the session as
/// `Aborted` before the next step starts.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Engine settings that are not owned by a collaborator.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Recent steps quoted in each prompt
    pub context_window: usize,
    /// Characters of step output quoted in each prompt
    pub output_excerpt_chars: usize,
    /// Run a preview snippet after provisioning and keep its output
    pub preview_dataset: bool,
    /// Name the dataset has inside the sandbox
    pub remote_dataset_name: String,
    /// Where image results are written; `None` keeps counts only
    pub artifacts_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context_window: 3,
            output_excerpt_chars: 400,
            preview_dataset: true,
            remote_dataset_name: "data.csv".to_string(),
            artifacts_dir: None,
        }
    }
}

/// Code run once after provisioning to describe the dataset.
fn preview_snippet(remote_name: &str) -> String {
    format!(
        r#"import pandas as pd
df = pd.read_csv('{}')
print(f"Shape: {{df.shape[0]}} rows x {{df.shape[1]}} columns")
print("Columns:")
for col in df.columns:
    print(f"  {{col}}: {{df[col].dtype}} (missing: {{df[col].isnull().sum()}})")
print("Preview:")
print(df.head(3).to_string())
"#,
        remote_name
    )
}

/// Runs analysis sessions against an assistant and a sandbox.
pub struct IterationEngine<'a> {
    assistant: &'a dyn AssistantClient,
    sandbox: &'a dyn SandboxClient,
    classifier: Box<dyn TopicClassifier>,
    evaluator: CompletionEvaluator,
    monitor: HealthMonitor,
    recovery: RecoveryConfig,
    prompts: PromptBuilder,
    config: EngineConfig,
    abort: AbortSignal,
    progress: ProgressBar,
}

impl<'a> IterationEngine<'a> {
    pub fn new(assistant: &'a dyn AssistantClient, sandbox: &'a dyn SandboxClient) -> Self {
        let config = EngineConfig::default();
        Self {
            assistant,
            sandbox,
            classifier: Box::new(KeywordClassifier::default()),
            evaluator: CompletionEvaluator::new(),
            monitor: HealthMonitor::default(),
            recovery: RecoveryConfig::default(),
            prompts: prompt_builder(&config),
            config,
            abort: AbortSignal::new(),
            progress: ProgressBar::hidden(),
        }
    }

    #[cfg(test)]
    pub fn with_classifier(mut self, classifier: Box<dyn TopicClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_evaluator(mut self, evaluator: CompletionEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_monitor(mut self, monitor: HealthMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_recovery_config(mut self, recovery: RecoveryConfig) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.prompts = prompt_builder(&config);
        self.config = config;
        self
    }

    pub fn with_abort_signal(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Run `session` until the evaluator stops it, a fatal sandbox error
    /// occurs, or the abort signal is set.
    ///
    /// A restored session continues from its history; restored steps count
    /// toward `max_steps`.
    pub async fn run_session(
        &self,
        mut session: AnalysisSession,
        limits: &IterationLimits,
        dataset: &DatasetRef,
    ) -> AnalysisSession {
        if session.status() != SessionStatus::Running {
            info!("Resuming session with {} recorded steps", session.len());
            session.resume();
        }

        info!(
            "Starting {} session on {} (steps {}..={})",
            limits.completion_mode, dataset.name, limits.min_steps, limits.max_steps
        );

        let coordinator = RecoveryCoordinator::new(self.sandbox, self.recovery.clone());
        let mut handle = SandboxHandle::uninitialized();

        self.progress.set_message("Provisioning sandbox...");
        if let Err(fatal) = coordinator.provision(&mut handle, dataset).await {
            error!("Could not provision sandbox: {}", fatal);
            session.finish(StopReason::Fatal {
                cause: fatal.to_string(),
            });
            self.progress.finish_and_clear();
            return session;
        }

        if self.config.preview_dataset && session.dataset_overview().is_none() {
            self.preview(&mut session, &handle).await;
        }

        let reason = self
            .drive(&mut session, limits, dataset, &coordinator, &mut handle)
            .await;

        info!("Session stopped after {} steps: {}", session.len(), reason);
        session.finish(reason);

        if handle.id().is_some() {
            if let Err(e) = self.sandbox.destroy(&handle).await {
                warn!("Failed to clean up sandbox: {}", e);
            }
        }

        self.progress.finish_and_clear();
        session
    }

    async fn drive(
        &self,
        session: &mut AnalysisSession,
        limits: &IterationLimits,
        dataset: &DatasetRef,
        coordinator: &RecoveryCoordinator<'_>,
        handle: &mut SandboxHandle,
    ) -> StopReason {
        loop {
            if self.abort.is_triggered() {
                warn!("Abort requested, stopping before step {}", session.next_index());
                return StopReason::UserAborted;
            }

            if session.len() >= limits.max_steps {
                return StopReason::MaxStepsReached;
            }

            if let Err(fatal) = self.run_step(session, dataset, coordinator, handle).await {
                error!("Fatal sandbox error: {}", fatal);
                return StopReason::Fatal {
                    cause: fatal.to_string(),
                };
            }

            match self.evaluator.should_stop(session, limits) {
                StopDecision::Stop(reason) => return reason,
                StopDecision::Continue => {
                    debug!(
                        "Continuing after step {} ({} topics covered)",
                        session.len(),
                        session.coverage().distinct_covered_count()
                    );
                }
            }
        }
    }

    /// Run one step and append it to the session.
    ///
    /// Returns `Err` when the sandbox could not be recovered. If that happens
    /// while executing the step's code, the step is still recorded first.
    async fn run_step(
        &self,
        session: &mut AnalysisSession,
        dataset: &DatasetRef,
        coordinator: &RecoveryCoordinator<'_>,
        handle: &mut SandboxHandle,
    ) -> Result<(), FatalError> {
        let index = session.next_index();
        let mut recoveries = Vec::new();

        self.progress
            .set_message(format!("Step {}: checking sandbox...", index));
        let health = self.monitor.probe(self.sandbox, handle).await;
        if let Some(kind) = health.error_kind() {
            warn!("Sandbox is {:?} before step {}, recovering", health, index);
            handle.mark_degraded();
            recoveries.push(coordinator.recover(handle, dataset, kind).await?);
        }

        let prompt = self.prompts.build(session);

        self.progress
            .set_message(format!("Step {}: waiting for assistant...", index));
        let (narrative, code, execution) = match self.assistant.complete(&prompt).await {
            Err(e) => {
                warn!("Assistant request failed at step {}: {}", index, e);
                (
                    String::new(),
                    String::new(),
                    StepExecution {
                        outcome: ExecutionOutcome::Failure {
                            kind: ErrorKind::AssistantUnavailable,
                            message: e.to_string(),
                        },
                        attempts: 0,
                        recoveries: Vec::new(),
                        artifacts: Vec::new(),
                        fatal: None,
                    },
                )
            }
            Ok(reply) => match reply.code {
                None => {
                    debug!("Reply for step {} carried no code", index);
                    (
                        reply.narrative,
                        String::new(),
                        StepExecution {
                            outcome: ExecutionOutcome::NotExecuted,
                            attempts: 0,
                            recoveries: Vec::new(),
                            artifacts: Vec::new(),
                            fatal: None,
                        },
                    )
                }
                Some(code) => {
                    self.progress
                        .set_message(format!("Step {}: executing code...", index));
                    let execution = coordinator.execute(handle, dataset, &code).await;
                    (reply.narrative, code, execution)
                }
            },
        };

        recoveries.extend(execution.recoveries);
        let detected_topics = self.classifier.detect(&narrative, &code);
        let artifact_files = self.write_artifacts(index, &execution.artifacts);

        let step = StepRecord {
            index,
            prompt_sent: prompt.user,
            assistant_narrative: narrative,
            generated_code: code,
            execution_outcome: execution.outcome,
            detected_topics,
            attempts: execution.attempts,
            recoveries,
            artifact_count: execution.artifacts.len(),
            artifact_files,
            recorded_at: Utc::now(),
        };

        info!(
            "Step {}: {} ({} topics, {} artifacts)",
            index,
            outcome_summary(&step.execution_outcome),
            step.detected_topics.len(),
            step.artifact_count
        );
        session.append_step(step);

        match execution.fatal {
            Some(fatal) => Err(fatal),
            None => Ok(()),
        }
    }

    async fn preview(&self, session: &mut AnalysisSession, handle: &SandboxHandle) {
        self.progress.set_message("Previewing dataset...");
        let snippet = preview_snippet(&self.config.remote_dataset_name);
        match self.sandbox.execute(handle, &snippet).await {
            Ok(output) => {
                debug!("Dataset preview: {} bytes", output.stdout.len());
                session.set_dataset_overview(output.combined_text());
            }
            Err(e) => warn!("Could not preview dataset: {}", e),
        }
    }

    fn write_artifacts(&self, index: usize, artifacts: &[crate::sandbox::Artifact]) -> Vec<String> {
        let Some(dir) = &self.config.artifacts_dir else {
            return Vec::new();
        };
        if artifacts.is_empty() {
            return Vec::new();
        }

        match save_artifacts(dir, index, artifacts) {
            Ok(paths) => paths.iter().map(|p| p.display().to_string()).collect(),
            Err(e) => {
                warn!("Failed to save artifacts for step {}: {:#}", index, e);
                Vec::new()
            }
        }
    }
}

fn prompt_builder(config: &EngineConfig) -> PromptBuilder {
    PromptBuilder {
        context_window: config.context_window,
        output_excerpt_chars: config.output_excerpt_chars,
        remote_dataset_name: config.remote_dataset_name.clone(),
    }
}

fn outcome_summary(outcome: &ExecutionOutcome) -> String {
    match outcome {
        ExecutionOutcome::Success { .. } => "success".to_string(),
        ExecutionOutcome::Failure { kind, .. } => format!("failed ({})", kind),
        ExecutionOutcome::NotExecuted => "no code".to_string(),
    }
}
