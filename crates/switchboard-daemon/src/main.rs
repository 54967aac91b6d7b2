//! Switchboard CLI.
//!
//! Runs the streaming core against transcripts on disk.
//!
//! # Usage
//!
//! ```bash
//! # Dump a session's history as canonical JSON lines
//! switchboard history --engine codex --root ~/.switchboard/sessions --session abc123
//!
//! # Replay a captured live feed (lines starting with `!` are error events)
//! switchboard replay --engine claude --root ./sessions --session abc123 --events feed.jsonl
//!
//! # Verbose logging
//! RUST_LOG=debug switchboard history ...
//! ```

use std::error::Error;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use switchboard_core::backend::FileBackend;
use switchboard_core::config::OrchestratorConfig;
use switchboard_core::engines::Engine;
use switchboard_core::event_bus::EventBus;
use switchboard_core::history::{HistoryLoader, LoadError};
use switchboard_core::orchestrator::{LoadOutcome, StreamOrchestrator};
use switchboard_core::session::SessionRef;

type CliResult<T> = Result<T, Box<dyn Error>>;

/// Session streaming toolbox for Claude, Codex and Gemini transcripts
#[derive(Parser, Debug)]
#[command(name = "switchboard")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Orchestrator config file (JSON)
    #[arg(short = 'c', long, env = "SWITCHBOARD_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "SWITCHBOARD_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a session's history as canonical JSON lines
    History {
        #[command(flatten)]
        target: Target,
    },

    /// Load history, then replay a live event file through a connection
    Replay {
        #[command(flatten)]
        target: Target,

        /// File with one raw output event per line
        #[arg(short = 'e', long, value_name = "FILE")]
        events: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct Target {
    /// claude, codex or gemini
    #[arg(long)]
    engine: Engine,

    /// Directory holding `{session}.jsonl` / `{session}.json` transcripts
    #[arg(long, value_name = "DIR")]
    root: PathBuf,

    /// Session id (a fresh id when omitted)
    #[arg(long)]
    session: Option<String>,
}

impl Target {
    fn session_ref(&self) -> SessionRef {
        let id = self
            .session
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        SessionRef::new(id, self.root.display().to_string(), "cli", self.engine)
    }
}

/// One line of a replay file.
#[derive(Debug, PartialEq)]
enum ReplayEvent<'a> {
    Output(&'a str),
    Error(&'a str),
}

fn parse_event_line(line: &str) -> Option<ReplayEvent<'_>> {
    let line = line.trim_end();
    if line.trim().is_empty() {
        return None;
    }
    match line.strip_prefix('!') {
        Some(error) => Some(ReplayEvent::Error(error.trim())),
        None => Some(ReplayEvent::Output(line)),
    }
}

async fn run_history(
    config: &OrchestratorConfig,
    target: &Target,
    out: &mut impl Write,
) -> CliResult<()> {
    let session = target.session_ref();
    let loader = HistoryLoader::with_config(
        Arc::new(FileBackend::new(&target.root)),
        config.loader_config(),
    );

    match loader.load(&session).await {
        Ok(history) => {
            for message in &history.messages {
                writeln!(out, "{}", serde_json::to_string(message)?)?;
            }
            if let Some(limits) = &history.rate_limits {
                log::info!("{session}: rate limits {}", serde_json::to_string(limits)?);
            }
            log::info!("{session}: {} messages", history.messages.len());
            Ok(())
        }
        Err(LoadError::NotFound) => {
            log::info!("{session}: no history yet");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_replay(
    config: OrchestratorConfig,
    target: &Target,
    events: &Path,
    out: &mut impl Write,
) -> CliResult<()> {
    let session = target.session_ref();
    let bus = Arc::new(EventBus::new());
    let orchestrator = StreamOrchestrator::new(
        Arc::new(FileBackend::new(&target.root)),
        bus.clone(),
        config,
    )
    .on_not_found(Arc::new(|s: &SessionRef| {
        log::info!("{s}: new session, starting without history");
    }));

    let outcome = orchestrator.load_history(&session).await;
    if let LoadOutcome::Loaded(count) = outcome {
        log::info!("{session}: {count} history messages");
    }

    orchestrator.reconnect(&session.session_id, session.engine)?;
    let queue = orchestrator
        .live_queue()
        .ok_or("live connection has no queue")?;

    let feed = std::fs::read_to_string(events)?;
    for line in feed.lines() {
        match parse_event_line(line) {
            Some(ReplayEvent::Output(raw)) => {
                bus.emit(&session.engine.output_channel(&session.session_id), &raw);
            }
            Some(ReplayEvent::Error(error)) => {
                bus.emit(&session.engine.error_channel(&session.session_id), &error);
            }
            None => {}
        }
    }
    bus.emit(&session.engine.complete_channel(&session.session_id), &Value::Null);

    while let Some(message) = queue.next().await {
        writeln!(out, "{}", serde_json::to_string(&message)?)?;
    }
    writeln!(out, "{}", json!({ "error": orchestrator.state().error }))?;

    orchestrator.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_level.as_str()))
        .init();

    let config = match &args.config {
        Some(path) => OrchestratorConfig::from_file(path)?,
        None => OrchestratorConfig::default(),
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match &args.command {
        Command::History { target } => run_history(&config, target, &mut out).await,
        Command::Replay { target, events } => run_replay(config, target, events, &mut out).await,
    }
}
