//! Shared deterministic types for the completion protocol.
//!
//! Expected protocol outcomes (no window, timeout, unreadable channel) are
//! plain values here rather than errors, so callers always get the partial
//! record list back.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::ids::{CommandId, ConversationId};

/// Why a single command did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    /// No window matched the target query.
    TargetNotFound { query: String },
    /// The effector could not deliver the envelope.
    DeliveryFailure { step: String, reason: String },
    /// The marker never appeared before the deadline.
    CompletionTimeout { waited_ms: u64 },
    /// The channel could not be read for a reason other than not existing yet.
    MalformedChannel { reason: String },
}

impl Failure {
    /// True when the command never reached the agent.
    pub fn is_undelivered(&self) -> bool {
        matches!(
            self,
            Self::TargetNotFound { .. } | Self::DeliveryFailure { .. }
        )
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TargetNotFound { query } => write!(f, "no target window matched {query}"),
            Self::DeliveryFailure { step, reason } => {
                write!(f, "delivery failed during {step}: {reason}")
            }
            Self::CompletionTimeout { waited_ms } => {
                write!(f, "no completion marker after {waited_ms} ms")
            }
            Self::MalformedChannel { reason } => write!(f, "log channel unreadable: {reason}"),
        }
    }
}

/// Outcome of one command round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompletionOutcome {
    Completed { matched_line: String },
    Failed { failure: Failure },
}

/// Result of one command: matched line on success, failure reason otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub command_id: CommandId,
    #[serde(flatten)]
    pub outcome: CompletionOutcome,
    /// Time from dispatch (or dispatch attempt) to the outcome.
    pub elapsed_ms: u64,
}

impl CompletionRecord {
    pub fn completed(command_id: CommandId, matched_line: String, elapsed: Duration) -> Self {
        Self {
            command_id,
            outcome: CompletionOutcome::Completed { matched_line },
            elapsed_ms: duration_ms(elapsed),
        }
    }

    pub fn failed(command_id: CommandId, failure: Failure, elapsed: Duration) -> Self {
        Self {
            command_id,
            outcome: CompletionOutcome::Failed { failure },
            elapsed_ms: duration_ms(elapsed),
        }
    }

    pub fn success(&self) -> bool {
        matches!(self.outcome, CompletionOutcome::Completed { .. })
    }

    pub fn matched_line(&self) -> Option<&str> {
        match &self.outcome {
            CompletionOutcome::Completed { matched_line } => Some(matched_line),
            CompletionOutcome::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match &self.outcome {
            CompletionOutcome::Completed { .. } => None,
            CompletionOutcome::Failed { failure } => Some(failure),
        }
    }
}

/// Conversation lifecycle: `Pending -> Running -> {Completed, Aborted}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Pending,
    Running,
    Completed,
    Aborted,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }
}

/// Ordered records for one conversation, truncated at the first failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationResult {
    pub conversation_id: ConversationId,
    pub status: ConversationStatus,
    pub records: Vec<CompletionRecord>,
    /// Hard error that aborted the run between records (locator backend,
    /// envelope rendering). The records before it are kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConversationResult {
    /// The failing record, if the conversation aborted.
    pub fn failure(&self) -> Option<(&CompletionRecord, &Failure)> {
        self.records
            .last()
            .and_then(|record| record.failure().map(|failure| (record, failure)))
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_flat_with_tagged_outcome() {
        let record = CompletionRecord::failed(
            CommandId::new(2).expect("id"),
            Failure::CompletionTimeout { waited_ms: 5000 },
            Duration::from_secs(5),
        );
        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "command_id": 2,
                "status": "failed",
                "failure": { "kind": "completion_timeout", "waited_ms": 5000 },
                "elapsed_ms": 5000
            })
        );
        let back: CompletionRecord = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, record);
    }

    #[test]
    fn accessors_follow_outcome() {
        let ok = CompletionRecord::completed(
            CommandId::FIRST,
            "Command_1 done".to_string(),
            Duration::from_millis(1500),
        );
        assert!(ok.success());
        assert_eq!(ok.matched_line(), Some("Command_1 done"));
        assert_eq!(ok.failure(), None);
        assert_eq!(ok.elapsed_ms, 1500);
    }

    #[test]
    fn undelivered_failures_are_distinguished_from_timeouts() {
        assert!(
            Failure::TargetNotFound {
                query: "x".to_string()
            }
            .is_undelivered()
        );
        assert!(!Failure::CompletionTimeout { waited_ms: 1 }.is_undelivered());
        assert!(
            !Failure::MalformedChannel {
                reason: "denied".to_string()
            }
            .is_undelivered()
        );
    }
}
