//! Session State (C6): the authoritative in-memory session document.
//! Mutated only by the bus handlers in [`super::coordinator`]; every
//! query here returns an owned, detached snapshot.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::transcript::{self, Architecture, ConversationBlock, SubagentThread, TranscriptEnvelope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    Starting,
    Ready,
    Querying,
    Terminated,
    Error,
}

/// Fields persisted verbatim for one session, independent of runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub agent_profile_ref: String,
    pub architecture: Architecture,
    #[serde(default)]
    pub session_options: Value,
    pub created_at: String,
    pub updated_at: String,
}

/// The portion of the session document that only exists while an
/// Execution Environment is attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeState {
    pub status: RuntimeStatus,
    pub status_message: Option<String>,
    pub active_query_started_at: Option<String>,
    pub last_error: Option<String>,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            status: RuntimeStatus::Terminated,
            status_message: None,
            active_query_started_at: None,
            last_error: None,
        }
    }
}

/// Client-facing projection: the persisted record plus derived transcript
/// and runtime fields (§4.6 `toRuntimeSessionData`).
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeSessionData {
    #[serde(flatten)]
    pub record: SessionRecord,
    pub blocks: Vec<ConversationBlock>,
    pub subagents: Vec<SubagentThread>,
    pub runtime: RuntimeState,
}

/// Minimal projection used for list views (§4.6 `toPersistedListData`).
#[derive(Debug, Clone, Serialize)]
pub struct PersistedListData {
    pub id: String,
    pub agent_profile_ref: String,
    pub architecture: Architecture,
    pub created_at: String,
    pub updated_at: String,
}

pub struct SessionState {
    record: SessionRecord,
    runtime: RuntimeState,
    raw_transcript: Option<TranscriptEnvelope>,
    blocks: Vec<ConversationBlock>,
    subagents: Vec<SubagentThread>,
}

impl SessionState {
    pub fn new(record: SessionRecord) -> Self {
        Self {
            record,
            runtime: RuntimeState::default(),
            raw_transcript: None,
            blocks: Vec::new(),
            subagents: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn architecture(&self) -> Architecture {
        self.record.architecture
    }

    pub fn record(&self) -> SessionRecord {
        self.record.clone()
    }

    pub fn raw_transcript(&self) -> Option<String> {
        self.raw_transcript.as_ref().map(TranscriptEnvelope::to_json)
    }

    /// Invariant (§4.6): `blocks`/`subagents` are always re-derived from
    /// `raw_transcript` atomically with this swap, never out of sync.
    pub fn apply_transcript_changed(&mut self, raw: &str) {
        match TranscriptEnvelope::from_json(raw) {
            Ok(envelope) => {
                let parsed = transcript::parse(self.record.architecture, &envelope);
                self.blocks = parsed.blocks;
                self.subagents = parsed.subagents;
                self.raw_transcript = Some(envelope);
            }
            Err(e) => {
                tracing::warn!(session_id = %self.record.id, error = %e.0, "discarding unparseable transcript");
            }
        }
    }

    pub fn set_runtime_status(&mut self, status: RuntimeStatus, message: Option<String>) {
        self.runtime.status = status;
        self.runtime.status_message = message;
    }

    pub fn set_active_query_started_at(&mut self, timestamp: Option<String>) {
        self.runtime.active_query_started_at = timestamp;
    }

    pub fn set_last_error(&mut self, error: Option<String>) {
        self.runtime.last_error = error;
    }

    pub fn update_session_options(&mut self, options: Value) {
        self.record.session_options = options;
    }

    pub fn touch_updated_at(&mut self, timestamp: String) {
        self.record.updated_at = timestamp;
    }

    pub fn to_runtime_session_data(&self) -> RuntimeSessionData {
        RuntimeSessionData {
            record: self.record.clone(),
            blocks: self.blocks.clone(),
            subagents: self.subagents.clone(),
            runtime: self.runtime.clone(),
        }
    }

    pub fn to_persisted_list_data(&self) -> PersistedListData {
        PersistedListData {
            id: self.record.id.clone(),
            agent_profile_ref: self.record.agent_profile_ref.clone(),
            architecture: self.record.architecture,
            created_at: self.record.created_at.clone(),
            updated_at: self.record.updated_at.clone(),
        }
    }

    pub fn get_runtime_state(&self) -> RuntimeState {
        self.runtime.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SessionRecord {
        SessionRecord {
            id: "sess-1".into(),
            agent_profile_ref: "profile-a".into(),
            architecture: Architecture::A1,
            session_options: serde_json::json!({}),
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn fresh_state_has_no_blocks_and_terminated_runtime() {
        let state = SessionState::new(record());
        let data = state.to_runtime_session_data();
        assert!(data.blocks.is_empty());
        assert_eq!(data.runtime.status, RuntimeStatus::Terminated);
    }

    #[test]
    fn apply_transcript_changed_reparses_blocks_and_raw_together() {
        let mut state = SessionState::new(record());
        let envelope = TranscriptEnvelope {
            main: r#"{"type":"user","message":{"content":"hi"}}"#.to_string(),
            subagents: Vec::new(),
        };
        state.apply_transcript_changed(&envelope.to_json());
        let data = state.to_runtime_session_data();
        assert_eq!(data.blocks.len(), 1);
        assert!(state.raw_transcript().unwrap().contains("hi"));
    }

    #[test]
    fn malformed_transcript_is_discarded_without_panicking() {
        let mut state = SessionState::new(record());
        state.apply_transcript_changed("not json");
        assert!(state.to_runtime_session_data().blocks.is_empty());
    }

    #[test]
    fn update_session_options_is_reflected_in_record() {
        let mut state = SessionState::new(record());
        state.update_session_options(serde_json::json!({"model": "x"}));
        assert_eq!(state.record().session_options, serde_json::json!({"model": "x"}));
    }

    #[test]
    fn persisted_list_data_omits_runtime_fields() {
        let state = SessionState::new(record());
        let list = state.to_persisted_list_data();
        assert_eq!(list.id, "sess-1");
    }
}
