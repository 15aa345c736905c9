//! Log-channel completion bridge.
//!
//! Types instructions into a UI-only agent's window, asks the agent to append
//! a marker line to a shared file when done, and waits for that line before
//! sending the next instruction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use bridge::conversation::{CommandSpec, ConversationEvent};
use bridge::core::envelope::CommandEnvelope;
use bridge::core::ids::{CommandId, ConversationId};
use bridge::core::types::{CompletionRecord, ConversationResult, ConversationStatus, Failure};
use bridge::exit_codes;
use bridge::io::config::{BridgeConfig, DEFAULT_CONFIG_PATH, load_config, write_config};
use bridge::io::conversation_file::{ConversationPlan, load_conversation};
use bridge::io::log_channel::LogChannel;
use bridge::logging;
use bridge::session::{run_conversation, wait_for_marker};
use bridge::wait::{SystemClock, WaitProgress};
use clap::{ArgAction, Parser, Subcommand};

const PREVIEW_CHARS: usize = 50;

#[derive(Parser)]
#[command(
    name = "bridge",
    version,
    about = "Drive a UI-only agent and confirm each instruction through a shared log file"
)]
struct Cli {
    /// Config file (missing file means defaults).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Increase diagnostic output on stderr (-v, -vv).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Truncate the log channel.
    Reset,
    /// Print the envelope that would be typed for an instruction.
    Envelope {
        /// Command id to embed in the marker.
        #[arg(long, default_value_t = 1)]
        id: u32,
        /// Conversation id to embed (generated when omitted).
        #[arg(long)]
        conversation_id: Option<String>,
        instruction: String,
    },
    /// Send one instruction and wait for its completion marker.
    Send {
        /// Completion deadline (defaults to `default_timeout_secs`).
        #[arg(long)]
        timeout_secs: Option<u64>,
        #[arg(long)]
        conversation_id: Option<String>,
        instruction: String,
    },
    /// Run every command of a conversation file in order.
    Run {
        /// TOML file with `[[commands]]` entries.
        conversation: PathBuf,
    },
    /// Wait for a marker appended from now on, without sending anything.
    Wait {
        #[arg(long)]
        id: u32,
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Reset => cmd_reset(&load_config(&cli.config)?),
        Command::Envelope {
            id,
            conversation_id,
            instruction,
        } => cmd_envelope(
            &load_config(&cli.config)?,
            id,
            conversation_id.as_deref(),
            &instruction,
        ),
        Command::Send {
            timeout_secs,
            conversation_id,
            instruction,
        } => {
            let cfg = load_config(&cli.config)?;
            let plan = ConversationPlan {
                conversation_id: conversation_id
                    .as_deref()
                    .map(ConversationId::parse)
                    .transpose()?,
                commands: vec![CommandSpec {
                    instruction,
                    timeout: resolve_timeout(&cfg, timeout_secs)?,
                }],
            };
            cmd_conversation(&cfg, plan)
        }
        Command::Run { conversation } => {
            let cfg = load_config(&cli.config)?;
            let plan = load_conversation(&conversation)?.into_plan(cfg.default_timeout())?;
            cmd_conversation(&cfg, plan)
        }
        Command::Wait { id, timeout_secs } => {
            let cfg = load_config(&cli.config)?;
            let timeout = resolve_timeout(&cfg, timeout_secs)?;
            cmd_wait(&cfg, id, timeout)
        }
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if !force && config_path.exists() {
        println!("{} already exists", config_path.display());
        return Ok(exit_codes::OK);
    }
    write_config(config_path, &BridgeConfig::default())
        .with_context(|| format!("write {}", config_path.display()))?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_reset(cfg: &BridgeConfig) -> Result<i32> {
    LogChannel::new(&cfg.log_path).reset()?;
    println!("reset {}", cfg.log_path.display());
    Ok(exit_codes::OK)
}

fn cmd_envelope(
    cfg: &BridgeConfig,
    id: u32,
    conversation_id: Option<&str>,
    instruction: &str,
) -> Result<i32> {
    let conversation_id = match conversation_id {
        Some(raw) => ConversationId::parse(raw)?,
        None => ConversationId::generate(),
    };
    let envelope = CommandEnvelope::build(
        &conversation_id,
        CommandId::new(id)?,
        instruction,
        &cfg.envelope_settings()?,
    )?;
    println!("{}", envelope.text());
    Ok(exit_codes::OK)
}

fn cmd_conversation(cfg: &BridgeConfig, plan: ConversationPlan) -> Result<i32> {
    let locator = cfg.window_locator();
    let effector = cfg.effector();
    let clock = SystemClock::new();
    let outcome = run_conversation(cfg, plan, &locator, &effector, &clock, print_event)?;

    let result = &outcome.result;
    if let Some(error) = &result.error {
        eprintln!("conversation {} aborted: {error}", result.conversation_id);
    }
    println!(
        "conversation {} {} ({}/{} confirmed)",
        result.conversation_id,
        result.status.as_str(),
        result.records.iter().filter(|record| record.success()).count(),
        result.records.len()
    );
    println!("transcript: {}", outcome.transcript_path.display());
    Ok(conversation_exit_code(result))
}

fn cmd_wait(cfg: &BridgeConfig, id: u32, timeout: Duration) -> Result<i32> {
    let clock = SystemClock::new();
    let record = wait_for_marker(cfg, CommandId::new(id)?, timeout, &clock, print_progress)?;
    match record.matched_line() {
        Some(line) => println!("{line}"),
        None => eprintln!("command {id}: no completion within {}s", timeout.as_secs()),
    }
    Ok(record_exit_code(&record))
}

fn resolve_timeout(cfg: &BridgeConfig, timeout_secs: Option<u64>) -> Result<Duration> {
    match timeout_secs {
        None => Ok(cfg.default_timeout()),
        Some(0) => Err(anyhow!("--timeout-secs must be > 0")),
        Some(secs) => Ok(Duration::from_secs(secs)),
    }
}

fn conversation_exit_code(result: &ConversationResult) -> i32 {
    match result.failure() {
        Some((record, _)) => record_exit_code(record),
        None if result.status == ConversationStatus::Completed => exit_codes::OK,
        None => exit_codes::INVALID,
    }
}

fn record_exit_code(record: &CompletionRecord) -> i32 {
    match record.failure() {
        None => exit_codes::OK,
        Some(failure) if failure.is_undelivered() => exit_codes::UNDELIVERED,
        Some(Failure::MalformedChannel { .. }) => exit_codes::CHANNEL_UNREADABLE,
        Some(_) => exit_codes::TIMED_OUT,
    }
}

fn print_event(event: &ConversationEvent<'_>) {
    match event {
        ConversationEvent::Started {
            conversation_id,
            commands,
        } => eprintln!("conversation {conversation_id}: {commands} command(s)"),
        ConversationEvent::Dispatching { envelope } => eprintln!(
            "{}: sending {}",
            envelope.marker().token(),
            preview(envelope.instruction())
        ),
        ConversationEvent::Delivered { command_id, window } => {
            eprintln!("command {command_id}: delivered to '{}'", window.title);
        }
        ConversationEvent::Waiting(progress) => print_progress(progress),
        ConversationEvent::Finished { record } => match record.matched_line() {
            Some(line) => eprintln!("command {}: completed: {line}", record.command_id),
            None => {
                if let Some(failure) = record.failure() {
                    eprintln!("command {}: failed: {failure}", record.command_id);
                }
            }
        },
    }
}

fn print_progress(progress: &WaitProgress) {
    if progress.new_bytes == 0 {
        eprintln!(
            "command {}: waiting ({}s of {}s)",
            progress.command_id,
            progress.elapsed.as_secs(),
            progress.deadline.as_secs()
        );
    }
}

fn preview(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or_default();
    let mut out: String = first_line.chars().take(PREVIEW_CHARS).collect();
    if first_line.chars().count() > PREVIEW_CHARS || text.lines().nth(1).is_some() {
        out.push_str("...");
    }
    out
}
