//! AgentDesk CLI
//!
//! Replays captured app-server traffic through the synchronizer so
//! reorder and duplication bugs can be reproduced offline.

use agentdesk::protocol::{RequestId, ServerMessage};
use agentdesk::store::{ItemKind, Store};
use agentdesk::{AgentDeskError, AgentTransport, SessionConfig, SessionController};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Characters of item text shown per line in the summary
const PREVIEW_CHARS: usize = 72;

/// AgentDesk - conversation state synchronizer tools
#[derive(Parser, Debug)]
#[command(name = "agentdesk")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output: log every routing decision
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Feed a JSONL capture of server messages into a fresh store
    Replay {
        /// Capture file, one JSON-RPC message per line
        file: PathBuf,

        /// Thread to treat as focused so its events are admitted
        #[arg(long)]
        focus: Option<String>,

        /// Print the final store as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
}

/// Transport for replays: nothing goes out
struct OfflineTransport;

impl AgentTransport for OfflineTransport {
    async fn request(&self, method: &str, _params: Value) -> agentdesk::Result<Value> {
        Err(AgentDeskError::Transport(format!("{} is unavailable during replay", method)))
    }

    async fn respond(&self, _id: RequestId, _result: Value) -> agentdesk::Result<()> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Replay { file, focus, json } => replay(file, focus, json),
    }
}

fn replay(file: PathBuf, focus: Option<String>, json: bool) -> anyhow::Result<()> {
    let reader = BufReader::new(std::fs::File::open(&file)?);
    let cwd = std::env::current_dir()?;
    let mut session = SessionController::new(OfflineTransport, SessionConfig::new(cwd));
    if focus.is_some() {
        session.set_active_thread(focus);
    }

    let mut applied = 0usize;
    let mut skipped = 0usize;
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let message = serde_json::from_str::<Value>(&line)
            .ok()
            .and_then(|value| ServerMessage::from_json(&value));
        match message {
            Some(ServerMessage::Response { .. }) | None => {
                warn!("Skipping line {}: not a notification or server request", number + 1);
                skipped += 1;
            }
            Some(message) => {
                session.handle_message(message);
                applied += 1;
            }
        }
    }
    info!("Replayed {} message(s) from {:?}, skipped {}", applied, file, skipped);

    let mut stdout = io::stdout().lock();
    if json {
        writeln!(stdout, "{}", serde_json::to_string_pretty(session.store())?)?;
    } else {
        write_summary(&mut stdout, session.store())?;
    }
    Ok(())
}

fn write_summary(out: &mut impl Write, store: &Store) -> io::Result<()> {
    for summary in &store.summaries {
        let title = summary.title.as_deref().unwrap_or("(untitled)");
        writeln!(out, "thread {}  {}", summary.id, title)?;
        let Some(thread) = store.thread(&summary.id) else {
            continue;
        };
        for turn in &thread.turns {
            writeln!(out, "  turn {} [{:?}]", turn.id, turn.status)?;
            if let Some(plan) = &turn.plan {
                for step in &plan.steps {
                    writeln!(out, "    plan: [{}] {}", step.status, step.step)?;
                }
            }
            if let Some(error) = &turn.error {
                writeln!(out, "    error: {}", error.message)?;
            }
            for item in &turn.items {
                writeln!(
                    out,
                    "    - {} {} [{:?}]{} {}",
                    item.kind.name(),
                    item.id,
                    item.status,
                    if item.optimistic { " (local)" } else { "" },
                    preview(&item.kind)
                )?;
            }
        }
    }
    if !store.approvals.is_empty() {
        writeln!(out, "pending approvals:")?;
        for (item_id, approval) in &store.approvals {
            writeln!(out, "  {} via {} (request {})", item_id, approval.method, approval.rpc_id)?;
        }
    }
    Ok(())
}

fn preview(kind: &ItemKind) -> String {
    let text = match kind {
        ItemKind::UserMessage { text, .. } | ItemKind::AgentMessage { text } => text.clone(),
        ItemKind::Reasoning { summary, content } => {
            summary.last().or(content.last()).cloned().unwrap_or_default()
        }
        ItemKind::CommandExecution { command, exit_code, .. } => match exit_code {
            Some(code) => format!("$ {} (exit {})", command, code),
            None => format!("$ {}", command),
        },
        ItemKind::FileChange { changes, .. } => changes
            .iter()
            .map(|change| change.path.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        ItemKind::ToolCall(call) => format!("{}({})", call.name, call.arguments),
        ItemKind::ModeChange { mode } => format!("mode -> {}", mode),
        ItemKind::TurnDiff { diff } => format!("{} diff line(s)", diff.lines().count()),
        ItemKind::TurnError { message } => message.clone(),
        ItemKind::Other { item_type, .. } => item_type.clone(),
    };
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > PREVIEW_CHARS {
        let cut: String = flat.chars().take(PREVIEW_CHARS - 1).collect();
        format!("{}…", cut)
    } else {
        flat
    }
}
