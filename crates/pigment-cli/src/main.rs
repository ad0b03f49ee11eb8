mod terminal;

use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use pigment_contracts::events::{EventLog, EventPayload};
use pigment_engine::{GeneratorConfig, SessionOrchestrator, SessionSummary};
use serde_json::{json, Value};

use crate::terminal::TerminalPresenter;

#[derive(Debug, Parser)]
#[command(name = "pigment", version, about = "Prompt-to-image streaming client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one generation session and save the image.
    Generate(GenerateArgs),
    /// One generation session per line read from stdin.
    Chat(ChatArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    out: PathBuf,
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    out_dir: PathBuf,
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Debug, Clone, Default, Args)]
struct SessionArgs {
    /// Streaming channel URI; overrides PIGMENT_WS_URL.
    #[arg(long)]
    endpoint: Option<String>,
    /// Generation forwarder URL; overrides PIGMENT_SUBMIT_URL.
    #[arg(long)]
    submit_url: Option<String>,
    #[arg(long)]
    handshake_timeout_ms: Option<u64>,
    #[arg(long)]
    session_timeout_ms: Option<u64>,
    #[arg(long)]
    quiet_period_ms: Option<u64>,
    #[arg(long)]
    max_reconnects: Option<u32>,
    /// JSONL event log path.
    #[arg(long)]
    events: Option<PathBuf>,
    /// Echo every debug log line to stderr, not just errors.
    #[arg(long)]
    verbose: bool,
}

impl SessionArgs {
    fn config(&self) -> GeneratorConfig {
        let mut config = GeneratorConfig::from_env();
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.trim().to_string();
        }
        if let Some(url) = &self.submit_url {
            config.submit_url = url.trim().to_string();
        }
        if let Some(ms) = self.handshake_timeout_ms {
            config.handshake_timeout = Duration::from_millis(ms.max(1));
        }
        if let Some(ms) = self.session_timeout_ms {
            config.session_timeout = Duration::from_millis(ms.max(1));
        }
        if let Some(ms) = self.quiet_period_ms {
            config.quiet_period = Duration::from_millis(ms.max(1));
        }
        if let Some(max) = self.max_reconnects {
            config.max_reconnect_attempts = max.max(1);
        }
        config
    }

    fn event_log(&self, default_dir: &Path) -> EventLog {
        EventLog::new(
            self.events
                .clone()
                .unwrap_or_else(|| default_dir.join("events.jsonl")),
        )
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("pigment error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let out_dir = args
        .out
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let events = args.session.event_log(&out_dir);
    let presenter = Arc::new(TerminalPresenter::new(
        &args.out,
        Some(events.clone()),
        args.session.verbose,
    ));
    let orchestrator = SessionOrchestrator::connect_default(args.session.config(), presenter.clone())?;

    let outcome = orchestrator.generate(&args.prompt);
    record_summary(&events, orchestrator.last_session().as_ref());
    let artifact = outcome?;
    let saved = presenter.delivered().unwrap_or(args.out);
    println!("Saved {} ({} bytes)", saved.display(), artifact.len());
    Ok(0)
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let events = args.session.event_log(&args.out_dir);
    let presenter = Arc::new(TerminalPresenter::new(
        args.out_dir.join("image.png"),
        Some(events.clone()),
        args.session.verbose,
    ));
    let orchestrator = SessionOrchestrator::connect_default(args.session.config(), presenter.clone())?;

    let stdin = io::stdin();
    let mut line = String::new();
    println!(
        "Pigment chat started ({}). Enter a prompt, /quit to exit.",
        orchestrator.config().endpoint
    );

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "/quit" | "/exit") {
            break;
        }

        presenter.set_target(chat_image_path(&args.out_dir));
        let outcome = orchestrator.generate(input);
        record_summary(&events, orchestrator.last_session().as_ref());
        match outcome {
            Ok(artifact) => {
                if let Some(saved) = presenter.delivered() {
                    println!("Saved {} ({} bytes)", saved.display(), artifact.len());
                }
            }
            Err(err) => println!("Generation failed: {err}"),
        }
    }
    Ok(())
}

fn chat_image_path(out_dir: &Path) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    out_dir.join(format!("image-{stamp}-{}.png", &suffix[..8]))
}

fn record_summary(events: &EventLog, summary: Option<&SessionSummary>) {
    let Some(summary) = summary else {
        return;
    };
    let mut payload = EventPayload::new();
    payload.insert("session_id".to_string(), Value::String(summary.id.clone()));
    payload.insert("prompt".to_string(), Value::String(summary.prompt.clone()));
    payload.insert(
        "status".to_string(),
        Value::String(summary.status.as_str().to_string()),
    );
    payload.insert("reconnect_count".to_string(), json!(summary.reconnect_count));
    payload.insert(
        "created_at".to_string(),
        Value::String(summary.created_at.to_rfc3339()),
    );
    payload.insert("artifact_len".to_string(), json!(summary.artifact_len));
    payload.insert("failure".to_string(), json!(summary.failure));
    if let Err(err) = events
        .record("session_finished", payload)
        .with_context(|| format!("failed to append to {}", events.path().display()))
    {
        eprintln!("pigment warning: {err:#}");
    }
}
