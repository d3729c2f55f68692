use book_adapters::{
    create_embedding_model, create_language_model, AdapterError, BackendOptions, RetryConfig,
};
use book_core::{
    ArtifactError, ArtifactStore, Backend, Config, ConfigError, EmbeddingModel, FacadeLogSink,
    LogLevel, LogRecord, LogSink, MessageLog, MessageLogMode, ModelError, PipelineError,
    PipelineRunner, ProjectStatus, PromptError, PromptRegistry, QualityTier, SharedLogSink,
    StatusError, StepEnv,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

const LOG_TARGET: &str = "bookctl";

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let sink: SharedLogSink = Arc::new(FacadeLogSink::new(LOG_TARGET));
    match cli.command {
        Command::Write(args) => run_write(&cli.config, args, sink),
        Command::Status(args) => run_status(args, sink),
        Command::Embed(args) => run_embed(&cli.config, args),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = if verbose {
        EnvFilter::new(default)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn run_write(config_path: &Path, args: WriteArgs, sink: SharedLogSink) -> Result<(), CliError> {
    let mut config = Config::load_or_default(config_path)?;
    args.apply(&mut config);

    let artifacts = ArtifactStore::open_with_sink(&args.book_dir, sink.clone())?;
    let prompts = PromptRegistry::from_prompt_config(&config.prompts)?;

    let message_log = args
        .message_log_mode()
        .map(|mode| Arc::new(MessageLog::in_dir(artifacts.book_dir(), mode)));
    let model = create_language_model(
        &config.llm,
        BackendOptions {
            api_key: None,
            message_log,
            book_dir: artifacts.book_dir().to_path_buf(),
        },
    )?;

    sink.log(LogRecord::new(
        LogLevel::Info,
        format!(
            "Writing book in {} with the {:?} backend ({} tier).",
            artifacts.book_dir().display(),
            config.llm.backend,
            config.pipeline.tier
        ),
    ));

    let env = StepEnv::new(&artifacts, &prompts, sink.as_ref()).with_tier(config.pipeline.tier);
    let mut runner = PipelineRunner::for_book(env, &config.pipeline)?;
    let report = runner.run(model.as_ref())?;
    report.write_summary(&artifacts)?;

    println!("Steps completed: {}", report.steps.join(", "));
    println!("Requests: {}", report.requests);
    print!("{}", report.summary_text());
    Ok(())
}

fn run_status(args: StatusArgs, sink: SharedLogSink) -> Result<(), CliError> {
    let artifacts = ArtifactStore::open_with_sink(&args.book_dir, sink)?;
    let status = ProjectStatus::load(artifacts.output_dir())?;
    print!("{}", status_report(status.as_ref()));

    let entries = artifacts.manifest_entries();
    println!();
    if entries.is_empty() {
        println!("No completed artifacts.");
    } else {
        println!("Completed artifacts:");
        for (name, entry) in entries {
            println!(
                "  {name:<28} {:>8} bytes  {}",
                entry.bytes,
                entry.completed_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }
    Ok(())
}

/// Current status and history. A book that was never run reports `unknown`.
fn status_report(status: Option<&ProjectStatus>) -> String {
    let mut report = String::new();
    match status.and_then(ProjectStatus::current) {
        Some(entry) => {
            report.push_str(&format!(
                "Current status: {} ({})\n",
                entry.status, entry.time
            ));
        }
        None => report.push_str("Current status: unknown\n"),
    }
    if let Some(status) = status {
        report.push_str("\nHistory:\n");
        for (time, entry) in status.history() {
            report.push_str(&format!("  {time}  {entry}\n"));
        }
    }
    report
}

fn run_embed(config_path: &Path, args: EmbedArgs) -> Result<(), CliError> {
    let config = Config::load_or_default(config_path)?;
    let model = create_embedding_model(
        &config.embedding,
        RetryConfig::from_llm_config(&config.llm),
    )?;
    let vectors = model.embed(&args.text)?;
    for (text, vector) in args.text.iter().zip(&vectors) {
        println!("{} dimensions: {text}", vector.len());
    }
    Ok(())
}

#[derive(Debug, Error)]
enum CliError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("failed to load prompts: {0}")]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error("model call failed: {0}")]
    Model(#[from] ModelError),
    #[error("status file error: {0}")]
    Status(#[from] StatusError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

#[derive(Parser)]
#[command(name = "bookctl", version, about = "Drafts a book from a short description")]
struct Cli {
    /// Config file path; missing files fall back to defaults
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    /// Log at debug level, overriding RUST_LOG
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run or resume the pipeline for a book directory
    Write(WriteArgs),
    /// Show progress and completed artifacts
    Status(StatusArgs),
    /// Embed texts and print vector sizes
    Embed(EmbedArgs),
}

#[derive(Args)]
struct WriteArgs {
    /// Directory containing description.txt
    book_dir: PathBuf,

    #[arg(long, value_enum)]
    backend: Option<BackendArg>,

    #[arg(long, value_enum)]
    tier: Option<TierArg>,

    /// Ollama model for the local backend
    #[arg(long)]
    local_model: Option<String>,

    /// Mirror every request and answer to messages.txt
    #[arg(long)]
    logging: bool,

    /// Like --logging but keeps earlier runs
    #[arg(long)]
    persistent_logging: bool,

    /// Draft and refine a plot before the title
    #[arg(long)]
    with_plot: bool,
}

impl WriteArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(backend) = self.backend {
            config.llm.backend = backend.into();
        }
        if let Some(tier) = self.tier {
            config.pipeline.tier = tier.into();
        }
        if let Some(model) = &self.local_model {
            config.llm.local_model = model.clone();
        }
        if self.with_plot {
            config.pipeline.include_plot = true;
        }
    }

    fn message_log_mode(&self) -> Option<MessageLogMode> {
        if self.persistent_logging {
            Some(MessageLogMode::Persistent)
        } else if self.logging {
            Some(MessageLogMode::Overwrite)
        } else {
            None
        }
    }
}

#[derive(Args)]
struct StatusArgs {
    book_dir: PathBuf,
}

#[derive(Args)]
struct EmbedArgs {
    #[arg(long, required = true, num_args = 1..)]
    text: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Chat,
    Assistants,
    Local,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Chat => Backend::Chat,
            BackendArg::Assistants => Backend::Assistants,
            BackendArg::Local => Backend::Local,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TierArg {
    Standard,
    Advanced,
}

impl From<TierArg> for QualityTier {
    fn from(arg: TierArg) -> Self {
        match arg {
            TierArg::Standard => QualityTier::Standard,
            TierArg::Advanced => QualityTier::Advanced,
        }
    }
}
