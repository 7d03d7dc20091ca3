//! The uniform block model (§3) and the architecture-tagged parser that
//! turns a raw transcript envelope into it (§4.3).
//!
//! Both converters are pure functions: same input, same output, no I/O.
//! A malformed envelope never aborts a session — it degrades to an empty
//! parse and a logged warning.

pub mod a1;
pub mod a2;

use serde::{Deserialize, Serialize};

pub type BlockId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Pending,
    Running,
    Success,
    Error,
}

impl ToolStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ToolStatus::Success | ToolStatus::Error)
    }

    /// Maps a runner-reported completion tag (`"completed"` vs anything
    /// else) onto a tool status, used when converting subagent records.
    pub fn from_completion(tag: &str) -> Self {
        if tag == "completed" {
            ToolStatus::Success
        } else {
            ToolStatus::Error
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemSubtype {
    SessionStart,
    SessionEnd,
    Error,
    Status,
    HookResponse,
    AuthStatus,
    Log,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationBlock {
    UserMessage {
        id: BlockId,
        timestamp: String,
        content: String,
    },
    AssistantText {
        id: BlockId,
        timestamp: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    ToolUse {
        id: BlockId,
        timestamp: String,
        tool_name: String,
        tool_use_id: String,
        input: serde_json::Value,
        status: ToolStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    ToolResult {
        id: BlockId,
        timestamp: String,
        tool_use_id: String,
        output: serde_json::Value,
        is_error: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    Thinking {
        id: BlockId,
        timestamp: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    System {
        id: BlockId,
        timestamp: String,
        subtype: SystemSubtype,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    Subagent {
        id: BlockId,
        timestamp: String,
        subagent_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        input: serde_json::Value,
        status: ToolStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_use_id: Option<String>,
    },
    Error {
        id: BlockId,
        timestamp: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl ConversationBlock {
    pub fn id(&self) -> &str {
        match self {
            ConversationBlock::UserMessage { id, .. }
            | ConversationBlock::AssistantText { id, .. }
            | ConversationBlock::ToolUse { id, .. }
            | ConversationBlock::ToolResult { id, .. }
            | ConversationBlock::Thinking { id, .. }
            | ConversationBlock::System { id, .. }
            | ConversationBlock::Subagent { id, .. }
            | ConversationBlock::Error { id, .. } => id,
        }
    }

    pub fn tool_use_id(&self) -> Option<&str> {
        match self {
            ConversationBlock::ToolUse { tool_use_id, .. } => Some(tool_use_id),
            ConversationBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id),
            ConversationBlock::Subagent { tool_use_id, .. } => tool_use_id.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubagentThread {
    pub id: String,
    pub blocks: Vec<ConversationBlock>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedTranscript {
    pub blocks: Vec<ConversationBlock>,
    pub subagents: Vec<SubagentThread>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    A1,
    A2,
}

/// The canonical persisted/exchanged form: `{"main": ..., "subagents": [...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptEnvelope {
    pub main: String,
    #[serde(default)]
    pub subagents: Vec<RawSubagentTranscript>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSubagentTranscript {
    pub id: String,
    pub transcript: String,
}

impl TranscriptEnvelope {
    pub fn from_json(raw: &str) -> Result<Self, crate::error::ParseError> {
        serde_json::from_str(raw).map_err(|e| crate::error::ParseError(e.to_string()))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("transcript envelope is always serializable")
    }
}

/// Table-based dispatch by architecture tag (§9: "tagged-sum `Architecture`
/// with a table-based parser lookup").
pub fn parse(architecture: Architecture, envelope: &TranscriptEnvelope) -> ParsedTranscript {
    match architecture {
        Architecture::A1 => a1::parse(envelope),
        Architecture::A2 => a2::parse(envelope),
    }
}

/// Synthesizes a stable block id when the source record carries none.
/// Deterministic within one parse: `<prefix>-<index>`.
pub(crate) fn synth_id(prefix: &str, index: usize) -> String {
    format!("{prefix}-{index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_status_terminal() {
        assert!(ToolStatus::Success.is_terminal());
        assert!(ToolStatus::Error.is_terminal());
        assert!(!ToolStatus::Pending.is_terminal());
        assert!(!ToolStatus::Running.is_terminal());
    }

    #[test]
    fn tool_status_from_completion() {
        assert_eq!(ToolStatus::from_completion("completed"), ToolStatus::Success);
        assert_eq!(ToolStatus::from_completion("failed"), ToolStatus::Error);
    }

    #[test]
    fn block_id_accessor_covers_every_variant() {
        let block = ConversationBlock::Error {
            id: "e1".into(),
            timestamp: "2024-01-01T00:00:00Z".into(),
            message: "boom".into(),
            code: None,
        };
        assert_eq!(block.id(), "e1");
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let envelope = TranscriptEnvelope {
            main: "raw-main-blob".into(),
            subagents: vec![RawSubagentTranscript {
                id: "sub1".into(),
                transcript: "raw-sub-blob".into(),
            }],
        };
        let json = envelope.to_json();
        let parsed = TranscriptEnvelope::from_json(&json).unwrap();
        assert_eq!(parsed.main, "raw-main-blob");
        assert_eq!(parsed.subagents[0].id, "sub1");
    }

    #[test]
    fn malformed_envelope_json_is_a_parse_error() {
        let result = TranscriptEnvelope::from_json("not json");
        assert!(result.is_err());
    }
}
