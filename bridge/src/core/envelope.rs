//! Outgoing command payloads.
//!
//! An envelope is the instruction text followed by a completion directive
//! telling the agent which line to append to which file once it is done.
//! Rendering is deterministic: the same inputs always produce the same text.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, context};

use crate::core::ids::{CommandId, ConversationId};
use crate::core::marker::Marker;

const BUILTIN_DIRECTIVE: &str = include_str!("templates/completion_directive.md");

/// Source of the completion directive (minijinja syntax).
///
/// Available variables: `command_id`, `conversation_id`, `marker`,
/// `marker_line`, `log_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveTemplate {
    Builtin,
    Custom(String),
}

impl DirectiveTemplate {
    /// Parse a user-supplied template and check a sample render.
    pub fn custom(source: impl Into<String>) -> Result<Self> {
        let template = Self::Custom(source.into());
        let sample = DirectiveVars {
            command_id: CommandId::FIRST,
            conversation_id: "sample",
            marker: "Sample_1",
            marker_line: "SAMPLE LINE",
            log_path: Path::new("sample.log"),
        };
        let rendered = template.render(&sample).context("render directive template")?;
        if !rendered.contains(sample.marker_line) {
            return Err(anyhow!(
                "directive template must include {{{{ marker_line }}}}"
            ));
        }
        Ok(template)
    }

    fn source(&self) -> &str {
        match self {
            Self::Builtin => BUILTIN_DIRECTIVE,
            Self::Custom(source) => source,
        }
    }

    fn render(&self, vars: &DirectiveVars<'_>) -> Result<String> {
        let env = Environment::new();
        let rendered = env.render_str(
            self.source(),
            context! {
                command_id => vars.command_id.get(),
                conversation_id => vars.conversation_id,
                marker => vars.marker,
                marker_line => vars.marker_line,
                log_path => vars.log_path.display().to_string(),
            },
        )?;
        Ok(rendered.trim_end().to_string())
    }
}

struct DirectiveVars<'a> {
    command_id: CommandId,
    conversation_id: &'a str,
    marker: &'a str,
    marker_line: &'a str,
    log_path: &'a Path,
}

/// Conversation-wide inputs shared by every envelope.
#[derive(Debug, Clone)]
pub struct EnvelopeSettings {
    pub log_path: PathBuf,
    pub marker_prefix: String,
    pub template: DirectiveTemplate,
}

/// Immutable payload for one command.
#[derive(Debug, Clone)]
pub struct CommandEnvelope {
    command_id: CommandId,
    instruction: String,
    directive: String,
    completion_line: String,
    marker: Marker,
}

impl CommandEnvelope {
    pub fn build(
        conversation_id: &ConversationId,
        command_id: CommandId,
        instruction: &str,
        settings: &EnvelopeSettings,
    ) -> Result<Self> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(anyhow!("instruction for command {command_id} is empty"));
        }
        let marker = Marker::new(&settings.marker_prefix, command_id)?;
        let completion_line = marker.completion_line(conversation_id);
        let directive = settings
            .template
            .render(&DirectiveVars {
                command_id,
                conversation_id: conversation_id.as_str(),
                marker: marker.token(),
                marker_line: &completion_line,
                log_path: &settings.log_path,
            })
            .with_context(|| format!("render directive for command {command_id}"))?;
        if !directive.contains(&completion_line) {
            return Err(anyhow!(
                "rendered directive for command {command_id} does not contain the completion line"
            ));
        }
        Ok(Self {
            command_id,
            instruction: instruction.to_string(),
            directive,
            completion_line,
            marker,
        })
    }

    pub fn command_id(&self) -> CommandId {
        self.command_id
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn directive(&self) -> &str {
        &self.directive
    }

    /// The exact line the agent is asked to append.
    pub fn completion_line(&self) -> &str {
        &self.completion_line
    }

    pub fn marker(&self) -> &Marker {
        &self.marker
    }

    /// Full text to deliver in one submission.
    pub fn text(&self) -> String {
        format!("{}\n\n{}", self.instruction, self.directive)
    }
}
