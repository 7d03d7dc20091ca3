//! The `SessionEvent` family shared by the runner subprocess, the
//! execution environment, the coordinator, and the session bus (§6).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct EventContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl EventContext {
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// One line of the runner subprocess protocol (§6), and the common
/// currency every component upstream of the client broadcast passes
/// around.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    #[serde(default)]
    pub context: EventContext,
}

impl SessionEvent {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            context: EventContext::default(),
        }
    }

    pub fn with_context(mut self, context: EventContext) -> Self {
        self.context = context;
        self
    }

    pub fn is_log(&self) -> bool {
        self.kind == "log"
    }

    pub fn is_script_output(&self) -> bool {
        self.kind == "script-output"
    }

    pub fn script_output_success(&self) -> bool {
        self.payload.get("success").and_then(Value::as_bool).unwrap_or(false)
    }
}
