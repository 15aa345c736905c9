//! Orchestration for the `send`, `run` and `wait` commands.
//!
//! Wires a loaded [`BridgeConfig`] to the protocol pieces and persists the
//! transcript once the conversation ends.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{debug, info};

use crate::conversation::{ConversationEvent, ConversationRunner, ConversationSettings};
use crate::core::ids::{CommandId, ConversationId};
use crate::core::marker::Marker;
use crate::core::types::{CompletionRecord, ConversationResult};
use crate::dispatch::Dispatcher;
use crate::io::config::BridgeConfig;
use crate::io::conversation_file::ConversationPlan;
use crate::io::desktop::WindowLocator;
use crate::io::effector::InputEffector;
use crate::io::log_channel::LogChannel;
use crate::io::transcript::{Transcript, ensure_transcript_absent, write_transcript};
use crate::wait::{Clock, CompletionWaiter, WaitProgress};

/// Finished conversation plus where its transcript was written.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub result: ConversationResult,
    pub transcript_path: PathBuf,
}

/// Run `plan` against the configured channel and write its transcript.
///
/// Refuses to start when the conversation id already has a transcript. A run
/// aborted by a hard error still writes one, with the error recorded.
pub fn run_conversation<L, E, C, F>(
    cfg: &BridgeConfig,
    plan: ConversationPlan,
    locator: &L,
    effector: &E,
    clock: &C,
    on_event: F,
) -> Result<SessionOutcome>
where
    L: WindowLocator,
    E: InputEffector,
    C: Clock,
    F: FnMut(&ConversationEvent<'_>),
{
    let conversation_id = plan
        .conversation_id
        .unwrap_or_else(ConversationId::generate);
    ensure_transcript_absent(&cfg.transcript_dir, &conversation_id)?;
    info!(%conversation_id, commands = plan.commands.len(), "starting conversation");

    let settings = ConversationSettings {
        poll_interval: cfg.poll_interval(),
        pause_between_commands: cfg.pause_between_commands(),
        envelope: cfg.envelope_settings()?,
    };
    let dispatcher = Dispatcher::new(locator, effector, cfg.window_query());
    let mut channel = LogChannel::new(&cfg.log_path);
    let mut runner = ConversationRunner::new(conversation_id, plan.commands);

    let started_at = Local::now();
    let result = runner.run(&mut channel, &dispatcher, clock, &settings, on_event)?;
    let ended_at = Local::now();

    let transcript = Transcript::new(&result, &cfg.log_path, started_at, ended_at);
    let transcript_path = write_transcript(&cfg.transcript_dir, &transcript)
        .context("write conversation transcript")?;
    debug!(path = %transcript_path.display(), "transcript written");
    Ok(SessionOutcome {
        result,
        transcript_path,
    })
}

/// Wait for `command_id`'s marker in content appended from now on.
///
/// Does not reset the channel; anything already in the file is skipped.
pub fn wait_for_marker<C, F>(
    cfg: &BridgeConfig,
    command_id: CommandId,
    timeout: Duration,
    clock: &C,
    on_progress: F,
) -> Result<CompletionRecord>
where
    C: Clock,
    F: FnMut(&WaitProgress),
{
    let marker = Marker::new(&cfg.marker_prefix, command_id)?;
    let mut channel = LogChannel::attach_at_end(&cfg.log_path)?;
    let waiter = CompletionWaiter::new(clock, cfg.poll_interval());
    Ok(waiter.wait(&mut channel, &marker, timeout, on_progress))
}
