//! `FilePersistenceAdapter` (§4.7.1): one JSON file per session under a
//! configured storage root, following this codebase's file-repository
//! pattern — atomic temp-then-rename writes, an in-memory `RwLock` cache
//! populated by a `load_all` scan, warn-and-skip on individually corrupt
//! files rather than failing the whole scan.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{PersistenceAdapter, WorkspaceFile};
use crate::error::PersistenceError;
use crate::session::state::{PersistedListData, SessionRecord};

pub struct FilePersistenceAdapter {
    sessions_dir: PathBuf,
    transcripts_dir: PathBuf,
    workspace_dir: PathBuf,
    profiles_dir: PathBuf,
    cache: RwLock<HashMap<String, SessionRecord>>,
}

impl FilePersistenceAdapter {
    pub fn new(storage_root: impl AsRef<Path>) -> Self {
        let root = storage_root.as_ref();
        Self {
            sessions_dir: root.join("sessions"),
            transcripts_dir: root.join("transcripts"),
            workspace_dir: root.join("workspace"),
            profiles_dir: root.join("agent_profiles"),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Scans `sessions_dir` into the in-memory cache. Call once at
    /// startup; individual corrupt files are skipped with a warning
    /// rather than failing the scan.
    pub async fn load_all(&self) -> Result<(), PersistenceError> {
        tokio::fs::create_dir_all(&self.sessions_dir).await?;
        let mut entries = tokio::fs::read_dir(&self.sessions_dir).await?;
        let mut loaded = HashMap::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<SessionRecord>(&content) {
                    Ok(record) => {
                        loaded.insert(record.id.clone(), record);
                    }
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unparseable session record"),
                },
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable session record"),
            }
        }
        tracing::info!(count = loaded.len(), "loaded session records");
        *self.cache.write().await = loaded;
        Ok(())
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{id}.json"))
    }

    fn transcript_path(&self, id: &str) -> PathBuf {
        self.transcripts_dir.join(format!("{id}.json"))
    }

    fn workspace_file_path(&self, session_id: &str, relative: &str) -> Result<PathBuf, PersistenceError> {
        let mut resolved = self.workspace_dir.join(session_id);
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(PersistenceError::Adapter(format!(
                        "workspace file path escapes session root: {relative}"
                    )));
                }
            }
        }
        Ok(resolved)
    }

    async fn write_atomic(path: &Path, content: &str) -> Result<(), PersistenceError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceAdapter for FilePersistenceAdapter {
    async fn list_all_sessions(&self) -> Result<Vec<PersistedListData>, PersistenceError> {
        Ok(self
            .cache
            .read()
            .await
            .values()
            .map(|record| PersistedListData {
                id: record.id.clone(),
                agent_profile_ref: record.agent_profile_ref.clone(),
                architecture: record.architecture,
                created_at: record.created_at.clone(),
                updated_at: record.updated_at.clone(),
            })
            .collect())
    }

    async fn load_session(&self, id: &str) -> Result<Option<SessionRecord>, PersistenceError> {
        Ok(self.cache.read().await.get(id).cloned())
    }

    async fn create_session_record(&self, record: SessionRecord) -> Result<(), PersistenceError> {
        let content = serde_json::to_string_pretty(&record).map_err(|e| PersistenceError::Serde(e.to_string()))?;
        Self::write_atomic(&self.session_path(&record.id), &content).await?;
        self.cache.write().await.insert(record.id.clone(), record);
        Ok(())
    }

    async fn update_session_record(&self, id: &str, patch: Value) -> Result<(), PersistenceError> {
        let mut cache = self.cache.write().await;
        let record = cache
            .get_mut(id)
            .ok_or_else(|| PersistenceError::NotFound(id.to_string()))?;
        let mut merged = serde_json::to_value(&*record).map_err(|e| PersistenceError::Serde(e.to_string()))?;
        merge_json(&mut merged, patch);
        *record = serde_json::from_value(merged).map_err(|e| PersistenceError::Serde(e.to_string()))?;
        let content = serde_json::to_string_pretty(record).map_err(|e| PersistenceError::Serde(e.to_string()))?;
        Self::write_atomic(&self.session_path(id), &content).await
    }

    async fn save_transcript(&self, session_id: &str, raw_envelope: &str) -> Result<(), PersistenceError> {
        Self::write_atomic(&self.transcript_path(session_id), raw_envelope).await
    }

    async fn save_workspace_file(&self, session_id: &str, file: WorkspaceFile) -> Result<(), PersistenceError> {
        let path = self.workspace_file_path(session_id, &file.path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &file.content).await?;
        Ok(())
    }

    async fn delete_session_file(&self, session_id: &str, path: &str) -> Result<(), PersistenceError> {
        let resolved = self.workspace_file_path(session_id, path)?;
        match tokio::fs::remove_file(&resolved).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_agent_profiles(&self) -> Result<Vec<String>, PersistenceError> {
        tokio::fs::create_dir_all(&self.profiles_dir).await?;
        let mut entries = tokio::fs::read_dir(&self.profiles_dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn load_agent_profile(&self, id: &str) -> Result<Option<Value>, PersistenceError> {
        let path = self.profiles_dir.join(format!("{id}.json"));
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(
                serde_json::from_str(&content).map_err(|e| PersistenceError::Serde(e.to_string()))?,
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn merge_json(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                merge_json(base_map.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, patch) => *base = patch,
    }
}
