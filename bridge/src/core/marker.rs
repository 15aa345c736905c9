//! Completion markers written by the agent into the log channel.
//!
//! A marker is the token `<prefix>_<command id>` (default `Command_7`). It is
//! matched as a whole token: the characters on either side must not be
//! `[A-Za-z0-9_]`, so `Command_1` never matches inside `Command_12`,
//! `Command_1_2` or `XCommand_1`.

use anyhow::{Context, Result, anyhow};
use regex::Regex;

use crate::core::ids::{CommandId, ConversationId};

/// Marker prefix used when the config does not override it.
pub const DEFAULT_MARKER_PREFIX: &str = "Command";

/// Tag that opens every completion line the agent is asked to write.
pub const COMPLETION_TAG: &str = "RESPONSE_COMPLETE";

/// Compiled, delimiter-bounded marker for one command.
#[derive(Debug, Clone)]
pub struct Marker {
    command_id: CommandId,
    token: String,
    pattern: Regex,
}

impl Marker {
    pub fn new(prefix: &str, command_id: CommandId) -> Result<Self> {
        validate_marker_prefix(prefix)?;
        let token = format!("{prefix}_{command_id}");
        let pattern = Regex::new(&format!(
            r"(?:^|[^A-Za-z0-9_])({})(?:[^A-Za-z0-9_]|$)",
            regex::escape(&token)
        ))
        .with_context(|| format!("compile marker pattern for {token}"))?;
        Ok(Self {
            command_id,
            token,
            pattern,
        })
    }

    pub fn command_id(&self) -> CommandId {
        self.command_id
    }

    /// The bare token, e.g. `Command_3`.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The exact line the agent is told to append on completion.
    pub fn completion_line(&self, conversation_id: &ConversationId) -> String {
        format!(
            "{COMPLETION_TAG}: {} (conversation {conversation_id})",
            self.token
        )
    }

    pub fn is_in(&self, content: &str) -> bool {
        self.pattern.is_match(content)
    }

    /// Return the line holding the first occurrence of the marker.
    ///
    /// Trailing whitespace (including `\r`) is stripped.
    pub fn find_line<'a>(&self, content: &'a str) -> Option<&'a str> {
        let token = self.pattern.captures(content)?.get(1)?;
        let line_start = content[..token.start()]
            .rfind('\n')
            .map(|idx| idx + 1)
            .unwrap_or(0);
        let line_end = content[token.end()..]
            .find('\n')
            .map(|idx| token.end() + idx)
            .unwrap_or(content.len());
        Some(content[line_start..line_end].trim_end())
    }
}

/// Check `content` for the default-prefix marker of `command_id`.
pub fn contains_marker(content: &str, command_id: CommandId) -> bool {
    Marker::new(DEFAULT_MARKER_PREFIX, command_id)
        .map(|marker| marker.is_in(content))
        .unwrap_or(false)
}

/// Validate a configurable marker prefix.
pub fn validate_marker_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(anyhow!("marker prefix must not be empty"));
    }
    if prefix
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
    {
        return Err(anyhow!(
            "marker prefix must be [A-Za-z0-9_-] only (got '{prefix}')"
        ));
    }
    Ok(())
}
