//! Prompt construction for each iteration.
//!
//! The opening prompt depends on the completion mode. Every later prompt is
//! built from the goal, the coverage status and a bounded window of recent
//! steps, so prompt size stays flat however long the session runs.

use crate::assistant::Prompt;
use crate::models::{AnalysisSession, CompletionMode, ErrorKind, ExecutionOutcome, StepRecord, TopicCategory};

/// Request sent when the previous reply carried no code.
pub const ASK_FOR_CODE: &str = "Please provide executable Python code for the next analysis step.";

/// Builds prompts from session state.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    /// Recent steps quoted in continuation prompts
    pub context_window: usize,
    /// Maximum characters of step output quoted per step
    pub output_excerpt_chars: usize,
    /// Name the dataset has inside the sandbox
    pub remote_dataset_name: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self {
            context_window: 3,
            output_excerpt_chars: 400,
            remote_dataset_name: "data.csv".to_string(),
        }
    }
}

impl PromptBuilder {
    /// Prompt for the next step of `session`.
    pub fn build(&self, session: &AnalysisSession) -> Prompt {
        match session.last_step() {
            None => Prompt {
                system: self.system_prompt(false),
                user: self.opening(session),
            },
            Some(last) => Prompt {
                system: self.system_prompt(true),
                user: self.continuation(session, last),
            },
        }
    }

    pub fn system_prompt(&self, continuation: bool) -> String {
        let mut prompt = String::new();
        prompt.push_str("You are an expert data scientist conducting step-by-step analysis.\n\n");
        prompt.push_str(&format!(
            "DATASET INFO: The dataset is already uploaded and available as '{}' in the sandbox.\n\n",
            self.remote_dataset_name
        ));
        prompt.push_str("RESPONSE FORMAT - You must respond with EXACTLY this structure:\n\n");
        prompt.push_str("EXPLANATION: [1-2 sentences explaining what you'll do in this step and why]\n\n");
        prompt.push_str("CODE:\n```python\n[Small focused code block for this specific step]\n```\n\n");
        prompt.push_str("ANALYSIS RULES:\n");
        prompt.push_str("- Each step should be SMALL and focused on ONE specific aspect\n");
        if continuation {
            prompt.push_str("- Continue unless you've thoroughly analyzed the data from multiple angles\n");
            prompt.push_str("- Only respond \"ANALYSIS_COMPLETE\" when you've covered all major aspects\n");
            prompt.push_str("- Build upon previous findings logically\n");
        } else {
            prompt.push_str("- Start with basic data exploration\n");
            prompt.push_str("- Include clear print statements explaining what you're doing\n");
        }
        prompt.push_str(&format!(
            "- ALWAYS use '{}' as the filename\n",
            self.remote_dataset_name
        ));
        prompt.push_str("- For visualizations: use plt.savefig('step_X_description.png'), plt.show() and plt.close()\n");
        prompt.push_str("- Progress through: basic stats -> correlations -> distributions -> patterns -> insights\n");
        prompt
    }

    /// First prompt of a session, chosen by mode.
    pub fn opening(&self, session: &AnalysisSession) -> String {
        let mut prompt = match session.mode() {
            CompletionMode::AutoDetect => format!(
                "START step-by-step analysis to explore: {}\n\n\
                 Begin with the first small step - basic data loading and structure overview using '{}'.\n",
                session.goal(),
                self.remote_dataset_name
            ),
            CompletionMode::Summary => format!(
                "BEGIN step-by-step comprehensive analysis of this dataset.\n\n\
                 Start with the first small step - data loading and basic structure using '{}'.\n",
                self.remote_dataset_name
            ),
            CompletionMode::CustomAutorun => format!("{}\n", session.goal()),
            CompletionMode::ManualIterate => format!(
                "Work through this analysis over several small steps: {}\n\n\
                 Do not try to answer everything at once. Start with the data structure using '{}'.\n",
                session.goal(),
                self.remote_dataset_name
            ),
        };

        if let Some(overview) = session.dataset_overview() {
            prompt.push_str("\nDATASET OVERVIEW:\n");
            prompt.push_str(&excerpt(overview, self.output_excerpt_chars * 4));
            prompt.push('\n');
        }

        prompt.push_str("\nUse the format with EXPLANATION and CODE sections.\n");
        prompt
    }

    /// Prompt following `last`.
    pub fn continuation(&self, session: &AnalysisSession, last: &StepRecord) -> String {
        // An unanswered request is repeated as-is.
        if last.execution_outcome.error_kind() == Some(ErrorKind::AssistantUnavailable) {
            return last.prompt_sent.clone();
        }

        let mut prompt = String::new();
        prompt.push_str(&format!(
            "ANALYSIS CONTINUATION - Step {}\n\n",
            session.next_index()
        ));
        prompt.push_str(&format!("GOAL: {}\n\n", session.goal()));

        prompt.push_str(&self.generate_feedback(last));
        prompt.push_str(&self.generate_recent_steps(session));
        prompt.push_str(&generate_coverage_status(session));
        prompt.push_str(&generate_priorities(session));

        prompt.push_str("\nIMPORTANT:\n");
        prompt.push_str("- Choose ONE focused analysis that adds NEW insights\n");
        prompt.push_str("- Avoid repeating previous analyses\n");
        prompt.push_str("- If all major topics are covered, provide a final summary and say the analysis is complete\n");
        prompt.push_str("- Generate executable Python code for your chosen analysis\n");
        prompt
    }

    fn generate_feedback(&self, last: &StepRecord) -> String {
        match &last.execution_outcome {
            ExecutionOutcome::NotExecuted => format!("{}\n\n", ASK_FOR_CODE),
            ExecutionOutcome::Success { output } => format!(
                "PREVIOUS STEP RESULTS:\n{}\n\n",
                if output.trim().is_empty() {
                    "No output".to_string()
                } else {
                    excerpt(output, self.output_excerpt_chars)
                }
            ),
            ExecutionOutcome::Failure {
                kind: ErrorKind::Import,
                message,
            } => format!(
                "PREVIOUS STEP FAILED: a package is not available in the sandbox.\n{}\n\
                 Do not use that package again; use an alternative approach with pandas, numpy or matplotlib.\n\n",
                excerpt(message, self.output_excerpt_chars)
            ),
            ExecutionOutcome::Failure { kind, message } => format!(
                "PREVIOUS STEP FAILED ({}):\n{}\n\
                 Fix the problem or try a different approach.\n\n",
                kind,
                excerpt(message, self.output_excerpt_chars)
            ),
        }
    }

    fn generate_recent_steps(&self, session: &AnalysisSession) -> String {
        if self.context_window == 0 {
            return String::new();
        }

        let steps = session.steps();
        let start = steps.len().saturating_sub(self.context_window);
        let mut section = String::from("RECENT STEPS:\n");

        for step in &steps[start..] {
            let narrative = if step.assistant_narrative.is_empty() {
                "(no explanation)"
            } else {
                step.assistant_narrative.as_str()
            };
            section.push_str(&format!(
                "- Step {}: {} [{}]\n",
                step.index,
                excerpt(narrative, self.output_excerpt_chars),
                outcome_label(&step.execution_outcome)
            ));
        }

        section.push('\n');
        section
    }
}

fn generate_coverage_status(session: &AnalysisSession) -> String {
    let covered = session.coverage().covered_topics();
    let remaining = session.coverage().remaining_topics();

    let mut section = String::from("COVERAGE STATUS:\n");
    section.push_str(&format!("Completed topics: {}\n", join_topics(&covered, "None yet")));
    section.push_str(&format!(
        "Remaining areas: {}\n\n",
        join_topics(&remaining, "All major areas covered")
    ));
    section
}

fn generate_priorities(session: &AnalysisSession) -> String {
    let remaining = session.coverage().remaining_topics();
    if remaining.is_empty() {
        return String::new();
    }

    let mut section = String::from("NEXT STEP PRIORITY:\n");
    for (i, topic) in remaining.iter().enumerate() {
        section.push_str(&format!("{}. {}: {}\n", i + 1, topic, focus_hint(*topic)));
    }
    section
}

fn focus_hint(topic: TopicCategory) -> &'static str {
    match topic {
        TopicCategory::DataExploration => "basic data overview and structure",
        TopicCategory::Correlations => "feature relationships and target correlations",
        TopicCategory::Distributions => "feature distributions and spread",
        TopicCategory::Visualizations => "key visualizations for insights",
        TopicCategory::Patterns => "pattern detection, trends and outliers",
        TopicCategory::Statistics => "summary statistics",
        TopicCategory::TargetAnalysis => "the target variable and what predicts it",
        TopicCategory::FeatureAnalysis => "individual features and derived variables",
    }
}

fn join_topics(topics: &[TopicCategory], empty: &str) -> String {
    if topics.is_empty() {
        empty.to_string()
    } else {
        topics
            .iter()
            .map(|t| t.label())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn outcome_label(outcome: &ExecutionOutcome) -> String {
    match outcome {
        ExecutionOutcome::Success { .. } => "ok".to_string(),
        ExecutionOutcome::Failure { kind, .. } => format!("failed: {}", kind),
        ExecutionOutcome::NotExecuted => "no code".to_string(),
    }
}

/// First `max_chars` characters of `text`, marked when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::{ok, step};

    fn session(mode: CompletionMode) -> AnalysisSession {
        AnalysisSession::new("survival drivers", mode, "titanic.csv")
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("héllo wörld", 4), "héll...");
        assert_eq!(excerpt("short", 400), "short");
    }

    #[test]
    fn test_opening_depends_on_mode() {
        let builder = PromptBuilder::default();
        let auto = builder.build(&session(CompletionMode::AutoDetect));
        assert!(auto.user.starts_with("START step-by-step analysis to explore: survival drivers"));
        assert!(auto.system.contains("Start with basic data exploration"));

        let summary = builder.opening(&session(CompletionMode::Summary));
        assert!(summary.starts_with("BEGIN step-by-step comprehensive analysis"));

        let custom = builder.opening(&session(CompletionMode::CustomAutorun));
        assert!(custom.starts_with("survival drivers\n"));
    }

    #[test]
    fn test_opening_quotes_overview() {
        let mut s = session(CompletionMode::AutoDetect);
        s.set_dataset_overview("891 rows x 12 columns");
        let prompt = PromptBuilder::default().opening(&s);
        assert!(prompt.contains("DATASET OVERVIEW:\n891 rows x 12 columns"));
    }

    #[test]
    fn test_continuation_truncates_output() {
        let mut s = session(CompletionMode::AutoDetect);
        s.append_step(step(
            1,
            "Look at the shape",
            &[TopicCategory::DataExploration],
            ExecutionOutcome::Success {
                output: "x".repeat(1000),
            },
        ));

        let prompt = PromptBuilder::default().build(&s);
        assert!(prompt.system.contains("ANALYSIS_COMPLETE"));
        assert!(prompt.user.contains("ANALYSIS CONTINUATION - Step 2"));
        assert!(prompt.user.contains(&format!("{}...", "x".repeat(400))));
        assert!(!prompt.user.contains(&"x".repeat(401)));
        assert!(prompt.user.contains("Completed topics: Data Exploration"));
        assert!(prompt.user.contains("1. Correlations"));
    }

    #[test]
    fn test_context_window_bounds_recent_steps() {
        let mut s = session(CompletionMode::AutoDetect);
        for i in 1..=6 {
            s.append_step(step(i, &format!("narrative {}", i), &[], ok()));
        }
        let prompt = PromptBuilder::default().build(&s);
        assert!(!prompt.user.contains("- Step 3:"));
        assert!(prompt.user.contains("- Step 4: narrative 4 [ok]"));
        assert!(prompt.user.contains("- Step 6: narrative 6 [ok]"));
    }

    #[test]
    fn test_not_executed_asks_for_code() {
        let mut s = session(CompletionMode::AutoDetect);
        s.append_step(step(1, "thinking", &[], ExecutionOutcome::NotExecuted));
        let prompt = PromptBuilder::default().build(&s);
        assert!(prompt.user.contains(ASK_FOR_CODE));
    }

    #[test]
    fn test_failures_are_described() {
        let mut s = session(CompletionMode::AutoDetect);
        s.append_step(step(
            1,
            "",
            &[],
            ExecutionOutcome::Failure {
                kind: ErrorKind::Import,
                message: "No module named 'xgboost'".to_string(),
            },
        ));
        let prompt = PromptBuilder::default().build(&s);
        assert!(prompt.user.contains("a package is not available"));
        assert!(prompt.user.contains("xgboost"));

        s.append_step(step(
            2,
            "",
            &[],
            ExecutionOutcome::Failure {
                kind: ErrorKind::Other,
                message: "KeyError: 'Age'".to_string(),
            },
        ));
        let prompt = PromptBuilder::default().build(&s);
        assert!(prompt.user.contains("PREVIOUS STEP FAILED (execution error):\nKeyError: 'Age'"));
    }

    #[test]
    fn test_assistant_failure_repeats_prompt() {
        let mut s = session(CompletionMode::AutoDetect);
        s.append_step(step(
            1,
            "",
            &[],
            ExecutionOutcome::Failure {
                kind: ErrorKind::AssistantUnavailable,
                message: "timed out".to_string(),
            },
        ));
        let prompt = PromptBuilder::default().build(&s);
        assert_eq!(prompt.user, "prompt 1");
    }
}
