mod library;
mod render;
mod repl;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tryon_contracts::config::StylistConfig;
use tryon_contracts::events::EventLog;
use tryon_engine::{
    DryrunService, FlowOutcome, GeminiService, GenerativeService, ImageSlot, Session,
    StylistClient,
};

use crate::repl::{run_chat, CliSession};

#[derive(Debug, Parser)]
#[command(name = "tryon", version, about = "Virtual try-on stylist")]
struct Cli {
    /// Default tracing filter when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session: upload, try on, then refine by chat.
    Chat(ChatArgs),
    /// One-shot composite of a garment onto a person photo.
    Compose(ComposeArgs),
    /// List the sample outfit library.
    Outfits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Provider {
    Gemini,
    Dryrun,
}

#[derive(Debug, Args)]
struct ServiceArgs {
    #[arg(long, value_enum, default_value_t = Provider::Gemini)]
    provider: Provider,
    /// TOML file overriding models, prompts and the response policy.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Append session events to this JSONL file.
    #[arg(long)]
    events: Option<PathBuf>,
    /// Per-request timeout for the Gemini service.
    #[arg(long, default_value_t = 90)]
    timeout_secs: u64,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[command(flatten)]
    service: ServiceArgs,
    /// Where /save writes when no path is given.
    #[arg(long, default_value = ".")]
    out: PathBuf,
    #[arg(long)]
    person: Option<PathBuf>,
    #[arg(long)]
    garment: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ComposeArgs {
    #[command(flatten)]
    service: ServiceArgs,
    #[arg(long)]
    person: PathBuf,
    #[arg(long)]
    garment: PathBuf,
    /// Output file or directory.
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("tryon error: {err:#}");
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    match cli.command {
        Command::Chat(args) => {
            run_chat_session(args).await?;
            Ok(0)
        }
        Command::Compose(args) => run_compose(args).await,
        Command::Outfits => {
            library::print_outfits();
            Ok(0)
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn build_session(args: &ServiceArgs) -> Result<CliSession> {
    let config = StylistConfig::load(args.config.as_deref()).context("failed to load config")?;
    let service: Box<dyn GenerativeService> = match args.provider {
        Provider::Gemini => Box::new(
            GeminiService::from_env()?.with_timeout(Duration::from_secs(args.timeout_secs)),
        ),
        Provider::Dryrun => Box::new(DryrunService),
    };
    info!(provider = service.name(), "service ready");
    let mut session = Session::new(StylistClient::new(service, config));
    if let Some(path) = &args.events {
        let log = EventLog::open_new_session(path)
            .await
            .with_context(|| format!("failed to open event log {}", path.display()))?;
        info!(session_id = log.session_id(), path = %path.display(), "logging events");
        session = session.with_event_log(log);
    }
    Ok(session)
}

async fn run_chat_session(args: ChatArgs) -> Result<()> {
    let session = build_session(&args.service).await?;
    if let Some(path) = &args.person {
        session
            .upload(ImageSlot::Person, path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))?;
    }
    if let Some(path) = &args.garment {
        session
            .upload(ImageSlot::Garment, path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))?;
    }
    run_chat(session, args.out).await
}

async fn run_compose(args: ComposeArgs) -> Result<i32> {
    let session = build_session(&args.service).await?;
    session
        .upload(ImageSlot::Person, &args.person)
        .await
        .with_context(|| format!("failed to load {}", args.person.display()))?;
    session
        .upload(ImageSlot::Garment, &args.garment)
        .await
        .with_context(|| format!("failed to load {}", args.garment.display()))?;

    let outcome = session.try_on().await?;
    session.flush_log().await?;
    match outcome {
        FlowOutcome::Completed => {}
        FlowOutcome::Failed(message) => {
            eprintln!("{message}");
            return Ok(1);
        }
        FlowOutcome::Stale => return Ok(1),
    }

    let state = session.snapshot();
    if let Some(path) = session.save_result(&args.out).await? {
        println!("Saved {}", path.display());
    } else if let Some(text) = state.result_text() {
        println!("{text}");
    }
    for message in state.transcript() {
        println!("{}", render::format_bold(&message.text));
    }
    Ok(0)
}
