//! Configuration file handling.
//!
//! Settings live in `.edaloop.toml`. Command-line flags override file values;
//! API keys are only ever taken from the environment.

use crate::assistant::OpenAiConfig;
use crate::evaluator::{EvaluatorConfig, DEFAULT_COMPLETION_PHRASES};
use crate::recovery::RecoveryConfig;
use crate::sandbox::HttpSandboxConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = ".edaloop.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub assistant: AssistantSettings,

    #[serde(default)]
    pub sandbox: SandboxSettings,

    #[serde(default)]
    pub iteration: IterationSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default report path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Where charts are written. Unset keeps only counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts_dir: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            artifacts_dir: None,
        }
    }
}

fn default_output() -> String {
    "eda_report.md".to_string()
}

/// Assistant endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantSettings {
    #[serde(default = "default_assistant_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Request timeout in seconds.
    #[serde(default = "default_assistant_timeout")]
    pub timeout_seconds: u64,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            base_url: default_assistant_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_seconds: default_assistant_timeout(),
        }
    }
}

fn default_assistant_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    1500
}

fn default_assistant_timeout() -> u64 {
    120
}

/// Sandbox service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSettings {
    #[serde(default = "default_sandbox_url")]
    pub base_url: String,

    #[serde(default = "default_template")]
    pub template: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_seconds: u64,

    /// Health probe timeout in seconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_seconds: u64,

    /// File name of the dataset inside the sandbox.
    #[serde(default = "default_remote_dataset_name")]
    pub remote_dataset_name: String,

    /// Create+upload attempts before a reinitialization is fatal.
    #[serde(default = "default_reinit_attempts")]
    pub reinit_attempts: u32,

    /// Describe the dataset once before the first step.
    #[serde(default = "default_true")]
    pub preview_dataset: bool,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            base_url: default_sandbox_url(),
            template: default_template(),
            timeout_seconds: default_sandbox_timeout(),
            probe_timeout_seconds: default_probe_timeout(),
            remote_dataset_name: default_remote_dataset_name(),
            reinit_attempts: default_reinit_attempts(),
            preview_dataset: true,
        }
    }
}

fn default_sandbox_url() -> String {
    "http://localhost:49999".to_string()
}

fn default_template() -> String {
    "python-data".to_string()
}

fn default_sandbox_timeout() -> u64 {
    60
}

fn default_probe_timeout() -> u64 {
    30
}

fn default_remote_dataset_name() -> String {
    "data.csv".to_string()
}

fn default_reinit_attempts() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

/// Loop control settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationSettings {
    /// Overrides the mode's minimum when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_steps: Option<usize>,

    /// Overrides the mode's maximum when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<usize>,

    #[serde(default = "default_coverage_threshold")]
    pub coverage_threshold: usize,

    #[serde(default = "default_repetition_window")]
    pub repetition_window: usize,

    /// Recent steps quoted in each prompt.
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    /// 0 disables the assistant-failure stop.
    #[serde(default = "default_assistant_failures")]
    pub max_consecutive_assistant_failures: usize,

    #[serde(default = "default_completion_phrases")]
    pub completion_phrases: Vec<String>,
}

impl Default for IterationSettings {
    fn default() -> Self {
        Self {
            min_steps: None,
            max_steps: None,
            coverage_threshold: default_coverage_threshold(),
            repetition_window: default_repetition_window(),
            context_window: default_context_window(),
            max_consecutive_assistant_failures: default_assistant_failures(),
            completion_phrases: default_completion_phrases(),
        }
    }
}

fn default_coverage_threshold() -> usize {
    4
}

fn default_repetition_window() -> usize {
    3
}

fn default_context_window() -> usize {
    3
}

fn default_assistant_failures() -> usize {
    3
}

fn default_completion_phrases() -> Vec<String> {
    DEFAULT_COMPLETION_PHRASES
        .iter()
        .map(|p| p.to_string())
        .collect()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only values given on the command line replace file settings.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if let Some(ref dir) = args.artifacts_dir {
            self.general.artifacts_dir = Some(dir.clone());
        }

        if let Some(ref model) = args.model {
            self.assistant.model = model.clone();
        }
        if let Some(ref url) = args.assistant_url {
            self.assistant.base_url = url.clone();
        }
        if let Some(timeout) = args.timeout {
            self.assistant.timeout_seconds = timeout;
        }

        if let Some(ref url) = args.sandbox_url {
            self.sandbox.base_url = url.clone();
        }

        if args.min_steps.is_some() {
            self.iteration.min_steps = args.min_steps;
        }
        if args.max_steps.is_some() {
            self.iteration.max_steps = args.max_steps;
        }
    }

    /// Assistant client settings. The key comes from the environment.
    pub fn openai_config(&self, api_key: Option<String>) -> OpenAiConfig {
        OpenAiConfig {
            base_url: self.assistant.base_url.clone(),
            api_key,
            model: self.assistant.model.clone(),
            temperature: self.assistant.temperature,
            max_tokens: self.assistant.max_tokens,
            timeout_seconds: self.assistant.timeout_seconds,
        }
    }

    /// Sandbox client settings. The key comes from the environment.
    pub fn sandbox_config(&self, api_key: Option<String>) -> HttpSandboxConfig {
        HttpSandboxConfig {
            base_url: self.sandbox.base_url.clone(),
            api_key,
            template: self.sandbox.template.clone(),
            timeout_seconds: self.sandbox.timeout_seconds,
            remote_dataset_name: self.sandbox.remote_dataset_name.clone(),
        }
    }

    pub fn evaluator_config(&self) -> EvaluatorConfig {
        EvaluatorConfig {
            coverage_threshold: self.iteration.coverage_threshold,
            repetition_window: self.iteration.repetition_window,
            completion_phrases: self.iteration.completion_phrases.clone(),
            max_consecutive_assistant_failures: self.iteration.max_consecutive_assistant_failures,
        }
    }

    pub fn recovery_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            reinit_attempts: self.sandbox.reinit_attempts,
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.sandbox.probe_timeout_seconds)
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
