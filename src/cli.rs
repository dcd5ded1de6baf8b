//! Command-line interface argument parsing.
//!
//! Every tunable flag is optional so that values from `.edaloop.toml`
//! survive unless the user overrides them explicitly.

use crate::models::CompletionMode;
use clap::Parser;
use std::path::PathBuf;

/// edaloop - adaptive exploratory data analysis driven by an LLM
///
/// Uploads a dataset to a remote Python sandbox, asks the assistant for one
/// analysis step at a time, runs the generated code, and stops once the
/// analysis is complete, repetitive, or out of budget.
///
/// Examples:
///   edaloop titanic.csv --goal "what drove survival?"
///   edaloop sales.csv --mode summary -o sales_report.md
///   edaloop churn.csv --mode iterate --max-steps 10 --artifacts-dir plots
///   edaloop churn.csv --resume run.json --save-session run.json
///   edaloop --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Dataset file to analyze (uploaded to the sandbox as-is)
    #[arg(value_name = "DATASET", required_unless_present = "init_config")]
    pub dataset: Option<PathBuf>,

    /// Analysis goal, or the prompt to run in autorun mode
    #[arg(short, long, value_name = "TEXT")]
    pub goal: Option<String>,

    /// How the session is started and which step bounds apply
    #[arg(long, default_value = "auto", value_name = "MODE")]
    pub mode: ModeArg,

    /// Minimum steps before the session may stop on its own
    #[arg(long, value_name = "COUNT")]
    pub min_steps: Option<usize>,

    /// Hard upper bound on steps
    #[arg(long, value_name = "COUNT")]
    pub max_steps: Option<usize>,

    /// Assistant model name
    #[arg(short, long, env = "EDALOOP_MODEL")]
    pub model: Option<String>,

    /// Chat completions base URL (OpenAI compatible)
    #[arg(long, value_name = "URL", env = "EDALOOP_ASSISTANT_URL")]
    pub assistant_url: Option<String>,

    /// Sandbox service base URL
    #[arg(long, value_name = "URL", env = "EDALOOP_SANDBOX_URL")]
    pub sandbox_url: Option<String>,

    /// Assistant API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, hide = true)]
    pub openai_api_key: Option<String>,

    /// Sandbox API key
    #[arg(long, env = "SANDBOX_API_KEY", hide_env_values = true, hide = true)]
    pub sandbox_api_key: Option<String>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .edaloop.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Directory where generated charts are written
    #[arg(long, value_name = "DIR")]
    pub artifacts_dir: Option<PathBuf>,

    /// Save the finished session to this file
    #[arg(long, value_name = "FILE")]
    pub save_session: Option<PathBuf>,

    /// Continue a session saved with --save-session
    #[arg(long, value_name = "FILE")]
    pub resume: Option<PathBuf>,

    /// Assistant request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .edaloop.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Session mode as spelled on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ModeArg {
    /// Explore the goal until coverage or the assistant says it is done
    #[default]
    Auto,
    /// Comprehensive dataset summary
    Summary,
    /// Run the given prompt as-is
    Autorun,
    /// Iterate with a higher step floor
    Iterate,
}

impl From<ModeArg> for CompletionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Auto => CompletionMode::AutoDetect,
            ModeArg::Summary => CompletionMode::Summary,
            ModeArg::Autorun => CompletionMode::CustomAutorun,
            ModeArg::Iterate => CompletionMode::ManualIterate,
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn completion_mode(&self) -> CompletionMode {
        self.mode.into()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        let dataset = self
            .dataset
            .as_ref()
            .ok_or_else(|| "A dataset file is required".to_string())?;
        let metadata = std::fs::metadata(dataset)
            .map_err(|_| format!("Dataset file does not exist: {}", dataset.display()))?;
        if !metadata.is_file() {
            return Err(format!("Dataset path is not a file: {}", dataset.display()));
        }
        if metadata.len() == 0 {
            return Err(format!("Dataset file is empty: {}", dataset.display()));
        }

        for (name, url) in [
            ("Assistant", &self.assistant_url),
            ("Sandbox", &self.sandbox_url),
        ] {
            if let Some(url) = url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(format!("{} URL must start with 'http://' or 'https://'", name));
                }
            }
        }

        if self.max_steps == Some(0) {
            return Err("Max steps must be at least 1".to_string());
        }
        if let (Some(min), Some(max)) = (self.min_steps, self.max_steps) {
            if min > max {
                return Err(format!(
                    "Min steps ({}) cannot exceed max steps ({})",
                    min, max
                ));
            }
        }

        if self.mode == ModeArg::Autorun && self.goal.as_deref().map_or(true, |g| g.trim().is_empty()) {
            return Err("Autorun mode needs a prompt via --goal".to_string());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if let Some(ref resume) = self.resume {
            if !resume.exists() {
                return Err(format!("Session file does not exist: {}", resume.display()));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
