//! Conversation and command identity.

use std::fmt;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Local};
use rand::Rng;
use serde::{Deserialize, Serialize};

const MAX_CONVERSATION_ID_LEN: usize = 64;

/// Opaque token naming one conversation run.
///
/// Embedded in every completion line so content from an earlier session is
/// distinguishable from the current one when reading the channel by hand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Generate a fresh id from the wall clock plus a short random suffix.
    pub fn generate() -> Self {
        Self::from_parts(Local::now(), rand::thread_rng().r#gen())
    }

    fn from_parts(now: DateTime<Local>, suffix: u16) -> Self {
        Self(format!("conv-{}-{suffix:04x}", now.format("%Y%m%d-%H%M%S")))
    }

    /// Accept a caller-supplied id after checking it is safe for file paths.
    pub fn parse(raw: &str) -> Result<Self> {
        validate_conversation_id(raw)?;
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate that an id is usable as a transcript directory name.
pub fn validate_conversation_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(anyhow!("conversation id must not be empty"));
    }
    if id.len() > MAX_CONVERSATION_ID_LEN {
        return Err(anyhow!(
            "conversation id must be at most {MAX_CONVERSATION_ID_LEN} chars (got {})",
            id.len()
        ));
    }
    if id == "." || id == ".." {
        return Err(anyhow!("conversation id must not be '{id}'"));
    }
    if id
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Err(anyhow!(
            "conversation id must be [A-Za-z0-9._-] only (got '{id}')"
        ));
    }
    Ok(())
}

/// Ordinal of one request/response round trip, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(u32);

impl CommandId {
    pub const FIRST: CommandId = CommandId(1);

    /// Build an id from a raw ordinal. Zero is reserved and rejected.
    pub fn new(raw: u32) -> Result<Self> {
        if raw == 0 {
            return Err(anyhow!("command id must be >= 1"));
        }
        Ok(Self(raw))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// The id following this one.
    pub fn next(self) -> Result<Self> {
        self.0
            .checked_add(1)
            .map(Self)
            .ok_or_else(|| anyhow!("command id overflow after {}", self.0))
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out strictly increasing command ids for one conversation.
#[derive(Debug, Clone)]
pub struct CommandIdSequence {
    next: Option<CommandId>,
}

impl CommandIdSequence {
    pub fn new() -> Self {
        Self {
            next: Some(CommandId::FIRST),
        }
    }

    /// Take the next id. Ids are never handed out twice.
    pub fn issue(&mut self) -> Result<CommandId> {
        let id = self
            .next
            .ok_or_else(|| anyhow!("command id sequence exhausted"))?;
        self.next = id.next().ok();
        Ok(id)
    }
}

impl Default for CommandIdSequence {
    fn default() -> Self {
        Self::new()
    }
}
