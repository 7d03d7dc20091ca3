//! Persistence adapter contract (§6) and the Persistence Listener (C7)
//! that drives it off the session bus.

pub mod file_adapter;
pub mod listener;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::PersistenceError;
use crate::session::state::{PersistedListData, SessionRecord};

#[derive(Debug, Clone)]
pub struct WorkspaceFile {
    pub path: String,
    pub content: Vec<u8>,
}

#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn list_all_sessions(&self) -> Result<Vec<PersistedListData>, PersistenceError>;
    async fn load_session(&self, id: &str) -> Result<Option<SessionRecord>, PersistenceError>;
    async fn create_session_record(&self, record: SessionRecord) -> Result<(), PersistenceError>;
    async fn update_session_record(&self, id: &str, patch: Value) -> Result<(), PersistenceError>;

    async fn save_transcript(&self, session_id: &str, raw_envelope: &str) -> Result<(), PersistenceError>;
    async fn save_workspace_file(&self, session_id: &str, file: WorkspaceFile) -> Result<(), PersistenceError>;
    async fn delete_session_file(&self, session_id: &str, path: &str) -> Result<(), PersistenceError>;

    async fn list_agent_profiles(&self) -> Result<Vec<String>, PersistenceError>;
    async fn load_agent_profile(&self, id: &str) -> Result<Option<Value>, PersistenceError>;
}
