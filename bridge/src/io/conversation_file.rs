//! Conversation scripts: an ordered list of instructions in TOML.
//!
//! ```toml
//! conversation_id = "desk-demo"   # optional
//!
//! [[commands]]
//! instruction = "Take a screenshot of the desktop and describe it."
//!
//! [[commands]]
//! instruction = "Open the notes application."
//! timeout_secs = 60
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::conversation::CommandSpec;
use crate::core::ids::ConversationId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConversationFile {
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub commands: Vec<CommandEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandEntry {
    pub instruction: String,
    /// Overrides the configured default deadline for this command.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// A parsed, validated conversation ready to hand to the runner.
#[derive(Debug, Clone)]
pub struct ConversationPlan {
    pub conversation_id: Option<ConversationId>,
    pub commands: Vec<CommandSpec>,
}

impl ConversationFile {
    pub fn validate(&self) -> Result<()> {
        if let Some(id) = &self.conversation_id {
            ConversationId::parse(id)?;
        }
        if self.commands.is_empty() {
            return Err(anyhow!("conversation must contain at least one command"));
        }
        for (idx, entry) in self.commands.iter().enumerate() {
            if entry.instruction.trim().is_empty() {
                return Err(anyhow!("commands[{idx}].instruction must not be empty"));
            }
            if entry.timeout_secs == Some(0) {
                return Err(anyhow!("commands[{idx}].timeout_secs must be > 0"));
            }
        }
        Ok(())
    }

    /// Resolve per-command deadlines against `default_timeout`.
    pub fn into_plan(self, default_timeout: Duration) -> Result<ConversationPlan> {
        self.validate()?;
        let conversation_id = self
            .conversation_id
            .as_deref()
            .map(ConversationId::parse)
            .transpose()?;
        let commands = self
            .commands
            .into_iter()
            .map(|entry| CommandSpec {
                instruction: entry.instruction,
                timeout: entry
                    .timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(default_timeout),
            })
            .collect();
        Ok(ConversationPlan {
            conversation_id,
            commands,
        })
    }
}

/// Load and validate a conversation script.
pub fn load_conversation(path: &Path) -> Result<ConversationFile> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let file: ConversationFile =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    file.validate()
        .with_context(|| format!("invalid conversation {}", path.display()))?;
    Ok(file)
}
