//! Markdown and JSON session reports.
//!
//! [`build_report`] flattens a finished [`AnalysisSession`] into a
//! [`SessionReport`]; the `generate_*` functions render it.

use crate::analysis::{
    dominant_failure, group_by_topic, outcome_counts, recovery_totals, steps_with_artifacts,
    successful_coverage,
};
use crate::engine::prompt::excerpt;
use crate::models::{
    AnalysisSession, ExecutionOutcome, ReportMetadata, SessionReport, SessionStatus, StepSummary,
    StopReason,
};
use anyhow::Result;

/// Topics needed for a "Comprehensive" quality rating.
pub const QUALITY_THRESHOLD: usize = 4;

const NARRATIVE_CHARS: usize = 160;

/// Assemble the report for a session.
pub fn build_report(session: &AnalysisSession, metadata: ReportMetadata) -> SessionReport {
    let steps = session.steps();
    let coverage = session.coverage();

    SessionReport {
        metadata,
        status: session.status(),
        stop_reason: session.stop_reason().cloned(),
        total_steps: steps.len(),
        coverage: coverage.coverage_snapshot(),
        successful_coverage: successful_coverage(steps),
        steps_by_topic: group_by_topic(steps).into_iter().collect(),
        covered_topics: coverage.covered_topics(),
        remaining_topics: coverage.remaining_topics(),
        outcomes: outcome_counts(steps),
        recoveries: recovery_totals(steps),
        steps_with_artifacts: steps_with_artifacts(steps),
        steps: steps
            .iter()
            .map(|step| StepSummary {
                index: step.index,
                narrative: step.assistant_narrative.clone(),
                topics: step.detected_topics.iter().copied().collect(),
                outcome: step.execution_outcome.clone(),
                attempts: step.attempts,
                recoveries: step.recoveries.len(),
                artifacts: step.artifact_count,
            })
            .collect(),
    }
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &SessionReport) -> String {
    let mut output = String::new();

    output.push_str("# Exploratory Analysis Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_outcome_section(report));
    output.push_str(&generate_coverage_section(report));
    output.push_str(&generate_remaining_section(report));
    output.push_str(&generate_step_log(report));
    output.push_str(&generate_recovery_section(report));
    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Dataset:** `{}`\n", metadata.dataset));
    if !metadata.goal.is_empty() {
        section.push_str(&format!("- **Goal:** {}\n", metadata.goal));
    }
    section.push_str(&format!("- **Mode:** {}\n", metadata.mode));
    section.push_str(&format!(
        "- **Step Bounds:** {} to {}\n",
        metadata.min_steps, metadata.max_steps
    ));
    section.push_str(&format!("- **Model Used:** `{}`\n", metadata.model_used));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n\n",
        metadata.duration_seconds
    ));

    section
}

fn generate_outcome_section(report: &SessionReport) -> String {
    let mut section = String::new();

    section.push_str("## Outcome\n\n");
    section.push_str(&format!("- **Status:** {}\n", report.status));

    match (&report.status, &report.stop_reason) {
        (SessionStatus::Aborted, Some(StopReason::Fatal { cause })) => {
            section.push_str(&format!("- **Fatal Cause:** {}\n", cause));
        }
        (_, Some(reason)) => {
            section.push_str(&format!("- **Stop Reason:** {}\n", reason));
        }
        (_, None) => {}
    }

    section.push_str(&format!("- **Total Steps:** {}\n", report.total_steps));
    section.push_str(&format!(
        "- **Topics Covered:** {}/{}\n",
        report.covered_topics.len(),
        report.coverage.len()
    ));

    if report.status == SessionStatus::Aborted {
        let succeeded = report
            .successful_coverage
            .values()
            .filter(|count| **count > 0)
            .count();
        section.push_str(&format!(
            "- **Topics Covered by Successful Steps:** {}\n",
            succeeded
        ));
    }

    section.push_str(&format!(
        "- **Analysis Quality:** {}\n\n",
        report.quality(QUALITY_THRESHOLD)
    ));

    let outcomes = &report.outcomes;
    section.push_str("| Succeeded | Failed | Not Executed |\n");
    section.push_str("|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} |\n\n",
        outcomes.success, outcomes.failure, outcomes.not_executed
    ));

    if let Some(kind) = dominant_failure(outcomes) {
        section.push_str(&format!("Most common failure: {}\n\n", kind));
    }

    section
}

fn generate_coverage_section(report: &SessionReport) -> String {
    let mut section = String::new();

    section.push_str("## Topic Coverage\n\n");
    section.push_str("| Topic | Steps | Successful | Seen In |\n");
    section.push_str("|:---|:---:|:---:|:---|\n");

    for (topic, count) in &report.coverage {
        let successful = report.successful_coverage.get(topic).copied().unwrap_or(0);
        let marker = if *count > 0 { "✅" } else { "⬜" };
        let seen_in = report
            .steps_by_topic
            .get(topic)
            .map(|indices| {
                indices
                    .iter()
                    .map(|i| format!("#{}", i))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_else(|| "-".to_string());
        section.push_str(&format!(
            "| {} {} | {} | {} | {} |\n",
            marker, topic, count, successful, seen_in
        ));
    }
    section.push('\n');

    section
}

fn generate_remaining_section(report: &SessionReport) -> String {
    let mut section = String::new();

    section.push_str("## Remaining Topics\n\n");
    if report.remaining_topics.is_empty() {
        section.push_str("Every topic was covered.\n\n");
        return section;
    }

    for topic in &report.remaining_topics {
        section.push_str(&format!("- {}\n", topic));
    }
    section.push('\n');

    section
}

fn generate_step_log(report: &SessionReport) -> String {
    let mut section = String::new();

    section.push_str("## Step Log\n\n");
    if report.steps.is_empty() {
        section.push_str("No steps were recorded.\n\n");
        return section;
    }

    section.push_str("| # | Outcome | Topics | Attempts | Images | Summary |\n");
    section.push_str("|:---:|:---|:---|:---:|:---:|:---|\n");

    for step in &report.steps {
        section.push_str(&generate_step_row(step));
    }
    section.push('\n');

    section
}

fn generate_step_row(step: &StepSummary) -> String {
    let outcome = match &step.outcome {
        ExecutionOutcome::Success { .. } => "✅ success".to_string(),
        ExecutionOutcome::Failure { kind, .. } => format!("❌ {}", kind),
        ExecutionOutcome::NotExecuted => "➖ no code".to_string(),
    };

    let topics = if step.topics.is_empty() {
        "-".to_string()
    } else {
        step.topics
            .iter()
            .map(|t| t.label())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let narrative = excerpt(step.narrative.trim(), NARRATIVE_CHARS)
        .replace('\n', " ")
        .replace('|', "\\|");

    format!(
        "| {} | {} | {} | {} | {} | {} |\n",
        step.index, outcome, topics, step.attempts, step.artifacts, narrative
    )
}

fn generate_recovery_section(report: &SessionReport) -> String {
    let mut section = String::new();

    section.push_str("## Sandbox Recovery\n\n");
    if report.recoveries.total() == 0 {
        section.push_str("No recovery actions were needed.\n\n");
        return section;
    }

    section.push_str(&format!(
        "- **Reinitializations:** {}\n",
        report.recoveries.reinitializations
    ));
    section.push_str(&format!(
        "- **Dataset Re-uploads:** {}\n",
        report.recoveries.reuploads
    ));

    let retried = report.steps.iter().filter(|s| s.attempts > 1).count();
    section.push_str(&format!("- **Steps Retried:** {}\n\n", retried));

    section
}

fn generate_footer() -> String {
    "---\n\n*Report generated by edaloop*\n".to_string()
}

/// Generate a JSON report.
pub fn generate_json_report(report: &SessionReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}
