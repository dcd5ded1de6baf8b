//! edaloop - adaptive exploratory data analysis loop
//!
//! Sends a dataset to a remote Python sandbox and lets an LLM assistant
//! analyse it one step at a time, deciding after every step whether the
//! analysis is done.
//!
//! Exit codes:
//!   0 - Session completed
//!   1 - Runtime error (configuration, dataset, report writing, etc.)
//!   3 - Session aborted (fatal sandbox failure or Ctrl-C)

mod analysis;
mod assistant;
mod cli;
mod config;
mod engine;
mod evaluator;
mod models;
mod recovery;
mod report;
mod sandbox;
mod snapshot;
mod tracker;

use anyhow::{Context, Result};
use assistant::{AssistantClient, OpenAiAssistant};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{Config, DEFAULT_CONFIG_FILE};
use engine::{AbortSignal, EngineConfig, IterationEngine};
use evaluator::CompletionEvaluator;
use indicatif::{ProgressBar, ProgressStyle};
use models::{AnalysisSession, DatasetRef, IterationLimits, ReportMetadata, SessionStatus};
use sandbox::{HealthMonitor, HttpSandboxClient};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("edaloop v{}", env!("CARGO_PKG_VERSION"));
    debug!("Dataset: {:?}, mode: {:?}", args.dataset, args.mode);

    match run_analysis(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Analysis failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .edaloop.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to change endpoints, step bounds, and stop rules.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run one analysis session end to end. Returns the exit code.
async fn run_analysis(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let dataset = load_dataset(&args)?;
    println!("📂 Dataset: {} ({} bytes)", dataset.name, dataset.len());

    let session = match args.resume {
        Some(ref path) => {
            let session = snapshot::load(path)
                .with_context(|| format!("Failed to load session from {}", path.display()))?;
            if session.dataset_name() != dataset.name {
                warn!(
                    "Session was recorded on {}, continuing it on {}",
                    session.dataset_name(),
                    dataset.name
                );
            }
            println!("⏯️  Resuming session with {} recorded steps", session.len());
            session
        }
        None => AnalysisSession::new(
            args.goal.clone().unwrap_or_default(),
            args.completion_mode(),
            dataset.name.clone(),
        ),
    };

    let limits = IterationLimits::for_mode(
        session.mode(),
        config.iteration.min_steps,
        config.iteration.max_steps,
    )
    .context("Invalid step bounds")?;

    let assistant = OpenAiAssistant::new(config.openai_config(args.openai_api_key.clone()))
        .context("Failed to create assistant client")?;
    let sandbox_client = HttpSandboxClient::new(config.sandbox_config(args.sandbox_api_key.clone()))
        .context("Failed to create sandbox client")?;

    println!("🤖 Assistant: {} at {}", config.assistant.model, config.assistant.base_url);
    println!("📦 Sandbox: {}", config.sandbox.base_url);
    println!(
        "🔁 Mode: {} ({} to {} steps)",
        limits.completion_mode, limits.min_steps, limits.max_steps
    );

    let abort = AbortSignal::new();
    spawn_interrupt_handler(abort.clone());

    let engine_config = EngineConfig {
        context_window: config.iteration.context_window,
        preview_dataset: config.sandbox.preview_dataset,
        remote_dataset_name: config.sandbox.remote_dataset_name.clone(),
        artifacts_dir: config.general.artifacts_dir.clone(),
        ..Default::default()
    };

    let engine = IterationEngine::new(&assistant, &sandbox_client)
        .with_evaluator(CompletionEvaluator::with_config(config.evaluator_config()))
        .with_monitor(HealthMonitor::new(config.probe_timeout()))
        .with_recovery_config(config.recovery_config())
        .with_config(engine_config)
        .with_abort_signal(abort)
        .with_progress(create_spinner(args.quiet));

    println!("\n🔬 Running analysis loop...\n");
    let session = engine.run_session(session, &limits, &dataset).await;

    if let Some(ref path) = args.save_session {
        snapshot::save(path, &session)
            .with_context(|| format!("Failed to save session to {}", path.display()))?;
        println!("💾 Session saved to: {}", path.display());
    }

    println!("\n📝 Generating report...");
    let duration = start_time.elapsed().as_secs_f64();
    let metadata = ReportMetadata {
        dataset: dataset.name.clone(),
        goal: session.goal().to_string(),
        mode: session.mode(),
        model_used: assistant.model_name().to_string(),
        generated_at: Utc::now(),
        duration_seconds: duration,
        min_steps: limits.min_steps,
        max_steps: limits.max_steps,
    };
    let session_report = report::build_report(&session, metadata);

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&session_report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&session_report),
    };

    let output_path = PathBuf::from(&config.general.output);
    std::fs::write(&output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    println!("\n📊 Analysis Summary:");
    println!("   Status: {}", session_report.status);
    if let Some(ref reason) = session_report.stop_reason {
        println!("   Stopped: {}", reason);
    }
    println!("   Steps: {}", session_report.total_steps);
    println!(
        "   Topics covered: {}/{}",
        session_report.covered_topics.len(),
        session_report.coverage.len()
    );
    println!(
        "   - ✅ Succeeded: {} | ❌ Failed: {} | ➖ No code: {}",
        session_report.outcomes.success,
        session_report.outcomes.failure,
        session_report.outcomes.not_executed
    );
    println!("   Visualizations: {}", session_report.steps_with_artifacts);
    println!("   Sandbox recoveries: {}", session_report.recoveries.total());
    println!(
        "   Quality: {}",
        session_report.quality(report::QUALITY_THRESHOLD)
    );
    println!("   Duration: {:.1}s", duration);

    match session.status() {
        SessionStatus::Aborted => {
            eprintln!(
                "\n⛔ Session aborted. Partial report saved to: {}",
                output_path.display()
            );
            Ok(3)
        }
        _ => {
            println!(
                "\n✅ Analysis complete! Report saved to: {}",
                output_path.display()
            );
            Ok(0)
        }
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}

/// Read the dataset file into memory. Its contents are never parsed here.
fn load_dataset(args: &Args) -> Result<DatasetRef> {
    let path = args
        .dataset
        .as_ref()
        .context("A dataset file is required")?;

    let content = std::fs::read(path)
        .with_context(|| format!("Failed to read dataset: {}", path.display()))?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(DatasetRef::new(name, content))
}

/// Stop at the next step boundary on Ctrl-C.
fn spawn_interrupt_handler(abort: AbortSignal) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current step");
            abort.trigger();
        }
    });
}

fn create_spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}
