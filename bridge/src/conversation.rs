//! Ordered multi-command conversations.
//!
//! A conversation resets the log channel once, then for each command builds
//! an envelope, dispatches it and waits for its marker. The first dispatch
//! failure or unconfirmed command aborts the run; nothing after it is sent.

use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::envelope::{CommandEnvelope, EnvelopeSettings};
use crate::core::ids::{CommandId, CommandIdSequence, ConversationId};
use crate::core::types::{CompletionRecord, ConversationResult, ConversationStatus, Failure};
use crate::dispatch::{Dispatch, DispatchOutcome};
use crate::io::desktop::WindowHandle;
use crate::io::log_channel::LogChannel;
use crate::wait::{Clock, CompletionWaiter, WaitProgress};

/// One instruction and its completion deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub instruction: String,
    pub timeout: Duration,
}

/// Settings shared by every command of a conversation.
#[derive(Debug, Clone)]
pub struct ConversationSettings {
    pub poll_interval: Duration,
    /// Pause after a confirmed command before the next dispatch.
    pub pause_between_commands: Duration,
    pub envelope: EnvelopeSettings,
}

/// Observability events; they carry no control flow.
#[derive(Debug)]
pub enum ConversationEvent<'a> {
    Started {
        conversation_id: &'a ConversationId,
        commands: usize,
    },
    Dispatching {
        envelope: &'a CommandEnvelope,
    },
    Delivered {
        command_id: CommandId,
        window: &'a WindowHandle,
    },
    Waiting(&'a WaitProgress),
    Finished {
        record: &'a CompletionRecord,
    },
}

/// Drives one conversation through `Pending -> Running -> {Completed, Aborted}`.
#[derive(Debug)]
pub struct ConversationRunner {
    conversation_id: ConversationId,
    commands: Vec<CommandSpec>,
    status: ConversationStatus,
}

impl ConversationRunner {
    pub fn new(conversation_id: ConversationId, commands: Vec<CommandSpec>) -> Self {
        Self {
            conversation_id,
            commands,
            status: ConversationStatus::Pending,
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn status(&self) -> ConversationStatus {
        self.status
    }

    /// Run every command in order and return the records produced.
    ///
    /// Expected failures end the run as `Aborted` with the failing record
    /// last. A hard error after the channel reset (locator backend, envelope
    /// rendering) also ends it as `Aborted`, with the records so far and the
    /// error in [`ConversationResult::error`]. Only misuse and a failed reset
    /// are returned as `Err`.
    #[instrument(skip_all, fields(conversation_id = %self.conversation_id))]
    pub fn run<D, C, F>(
        &mut self,
        channel: &mut LogChannel,
        dispatcher: &D,
        clock: &C,
        settings: &ConversationSettings,
        mut on_event: F,
    ) -> Result<ConversationResult>
    where
        D: Dispatch,
        C: Clock,
        F: FnMut(&ConversationEvent<'_>),
    {
        if self.status != ConversationStatus::Pending {
            return Err(anyhow!(
                "conversation {} already {}",
                self.conversation_id,
                self.status.as_str()
            ));
        }
        if self.commands.is_empty() {
            return Err(anyhow!(
                "conversation {} has no commands",
                self.conversation_id
            ));
        }

        self.status = ConversationStatus::Running;
        // Reset exactly once: later commands rely on the watermark carrying forward.
        if let Err(err) = channel.reset() {
            self.status = ConversationStatus::Aborted;
            return Err(err);
        }
        on_event(&ConversationEvent::Started {
            conversation_id: &self.conversation_id,
            commands: self.commands.len(),
        });

        let mut records = Vec::with_capacity(self.commands.len());
        let driven = self.drive(
            channel,
            dispatcher,
            clock,
            settings,
            &mut on_event,
            &mut records,
        );
        let error = match driven {
            Ok(status) => {
                self.status = status;
                None
            }
            Err(err) => {
                let message = format!("{err:#}");
                warn!(err = %message, records = records.len(), "conversation aborted by hard error");
                self.status = ConversationStatus::Aborted;
                Some(message)
            }
        };

        info!(
            status = self.status.as_str(),
            records = records.len(),
            "conversation finished"
        );
        Ok(ConversationResult {
            conversation_id: self.conversation_id.clone(),
            status: self.status,
            records,
            error,
        })
    }

    fn drive<D, C, F>(
        &self,
        channel: &mut LogChannel,
        dispatcher: &D,
        clock: &C,
        settings: &ConversationSettings,
        on_event: &mut F,
        records: &mut Vec<CompletionRecord>,
    ) -> Result<ConversationStatus>
    where
        D: Dispatch,
        C: Clock,
        F: FnMut(&ConversationEvent<'_>),
    {
        let waiter = CompletionWaiter::new(clock, settings.poll_interval);
        let mut ids = CommandIdSequence::new();
        for (idx, spec) in self.commands.iter().enumerate() {
            if idx > 0 && !settings.pause_between_commands.is_zero() {
                clock.sleep(settings.pause_between_commands);
            }
            let command_id = ids.issue()?;
            let envelope = CommandEnvelope::build(
                &self.conversation_id,
                command_id,
                &spec.instruction,
                &settings.envelope,
            )?;
            on_event(&ConversationEvent::Dispatching {
                envelope: &envelope,
            });

            let record = match skip_undispatched_content(channel, command_id) {
                Some(unreadable) => unreadable,
                None => {
                    let dispatch_started = clock.now();
                    match dispatcher.send(&envelope)? {
                        DispatchOutcome::Delivered { window } => {
                            on_event(&ConversationEvent::Delivered {
                                command_id,
                                window: &window,
                            });
                            waiter.wait(channel, envelope.marker(), spec.timeout, |progress| {
                                on_event(&ConversationEvent::Waiting(progress));
                            })
                        }
                        DispatchOutcome::Failed(failure) => CompletionRecord::failed(
                            command_id,
                            failure,
                            clock.now().saturating_sub(dispatch_started),
                        ),
                    }
                }
            };

            on_event(&ConversationEvent::Finished { record: &record });
            let success = record.success();
            if let Some(failure) = record.failure() {
                warn!(%command_id, %failure, "aborting conversation");
            }
            records.push(record);
            if !success {
                return Ok(ConversationStatus::Aborted);
            }
        }

        Ok(ConversationStatus::Completed)
    }
}

/// Move the watermark to the current end of the channel right before a
/// dispatch, so only content appended afterwards can confirm the command.
///
/// Also creates the channel's parent directory on first use. Returns a failed
/// record when the channel cannot be read.
fn skip_undispatched_content(
    channel: &mut LogChannel,
    command_id: CommandId,
) -> Option<CompletionRecord> {
    match channel.poll_once() {
        Ok(stale) => {
            if !stale.is_empty() {
                debug!(%command_id, bytes = stale.len(), "discarding content written before dispatch");
            }
            None
        }
        Err(err) => {
            warn!(%command_id, err = %format!("{err:#}"), "log channel unreadable before dispatch");
            Some(CompletionRecord::failed(
                command_id,
                Failure::MalformedChannel {
                    reason: format!("{err:#}"),
                },
                Duration::ZERO,
            ))
        }
    }
}
