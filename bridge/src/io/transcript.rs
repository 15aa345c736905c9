//! Conversation transcripts under `<transcript_dir>/<conversation id>/`.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Local, SecondsFormat};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::ids::ConversationId;
use crate::core::types::{
    CompletionRecord, ConversationResult, ConversationStatus, duration_ms,
};

/// Persisted summary of one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub conversation_id: ConversationId,
    pub status: ConversationStatus,
    pub log_path: String,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
    pub records: Vec<CompletionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Transcript {
    pub fn new(
        result: &ConversationResult,
        log_path: &Path,
        started_at: DateTime<Local>,
        ended_at: DateTime<Local>,
    ) -> Self {
        let duration = (ended_at - started_at).to_std().unwrap_or_default();
        Self {
            conversation_id: result.conversation_id.clone(),
            status: result.status,
            log_path: log_path.display().to_string(),
            started_at: started_at.to_rfc3339_opts(SecondsFormat::Secs, false),
            ended_at: ended_at.to_rfc3339_opts(SecondsFormat::Secs, false),
            duration_ms: duration_ms(duration),
            records: result.records.clone(),
            error: result.error.clone(),
        }
    }
}

pub fn transcript_path(dir: &Path, conversation_id: &ConversationId) -> PathBuf {
    dir.join(conversation_id.as_str()).join("result.json")
}

/// Fail if `conversation_id` already has a transcript under `dir`.
pub fn ensure_transcript_absent(dir: &Path, conversation_id: &ConversationId) -> Result<()> {
    let path = transcript_path(dir, conversation_id);
    if path.exists() {
        return Err(anyhow!(
            "conversation {conversation_id} already has a transcript at {}; pick another conversation id",
            path.display()
        ));
    }
    Ok(())
}

/// Write `result.json` for the transcript's conversation, returning its path.
///
/// An existing transcript for the same conversation id is never overwritten.
pub fn write_transcript(dir: &Path, transcript: &Transcript) -> Result<PathBuf> {
    let path = transcript_path(dir, &transcript.conversation_id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create transcript dir {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(transcript).context("serialize transcript")?;
    buf.push('\n');
    let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            return Err(anyhow!(
                "refusing to overwrite existing transcript {}",
                path.display()
            ));
        }
        Err(err) => return Err(err).with_context(|| format!("create {}", path.display())),
    };
    file.write_all(buf.as_bytes())
        .with_context(|| format!("write {}", path.display()))?;
    debug!(path = %path.display(), "wrote transcript");
    Ok(path)
}

pub fn read_transcript(path: &Path) -> Result<Transcript> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}
