//! Persistence Listener (C7): bridges bus events to [`PersistenceAdapter`]
//! calls through one per-session serial queue, so writes land in the order
//! their triggering events occurred without making `emit` block on I/O.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use super::{PersistenceAdapter, WorkspaceFile};
use crate::bus::SessionBus;
use crate::session::state::SessionRecord;

enum WriteJob {
    UpsertFile { path: String, content: Vec<u8> },
    DeleteFile { path: String },
    SaveTranscript { raw: String },
    UpdateOptions { options: Value },
    FullSync {
        record: SessionRecord,
        transcript: Option<String>,
        files: Vec<WorkspaceFile>,
    },
}

#[derive(Clone)]
pub struct PersistenceListener {
    tx: mpsc::UnboundedSender<WriteJob>,
}

impl PersistenceListener {
    /// Spawns the per-session worker task. `session_id` is fixed for the
    /// lifetime of this listener since one listener serves one session.
    pub fn spawn(adapter: Arc<dyn PersistenceAdapter>, session_id: String) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteJob>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(e) = apply(&adapter, &session_id, job).await {
                    tracing::warn!(session_id = %session_id, error = %e, "persistence write failed, will reconcile on next full sync");
                }
            }
        });
        Self { tx }
    }

    /// Wires this listener's queue to the session's bus. Registered
    /// closures only enqueue — they never touch the adapter directly.
    pub fn attach(&self, bus: &SessionBus) {
        let tx = self.tx.clone();
        bus.subscribe("file:created", move |event| {
            enqueue_file_upsert(&tx, event);
        });
        let tx = self.tx.clone();
        bus.subscribe("file:modified", move |event| {
            enqueue_file_upsert(&tx, event);
        });
        let tx = self.tx.clone();
        bus.subscribe("file:deleted", move |event| {
            if let Some(path) = event.payload.get("path").and_then(Value::as_str) {
                let _ = tx.send(WriteJob::DeleteFile { path: path.to_string() });
            }
        });
        let tx = self.tx.clone();
        bus.subscribe("transcript:changed", move |event| {
            if let Some(content) = event.payload.get("content").and_then(Value::as_str) {
                let _ = tx.send(WriteJob::SaveTranscript { raw: content.to_string() });
            }
        });
        let tx = self.tx.clone();
        bus.subscribe("options:update", move |event| {
            if let Some(options) = event.payload.get("options") {
                let _ = tx.send(WriteJob::UpdateOptions { options: options.clone() });
            }
        });
    }

    /// Full-snapshot sync (§4.7): invoked by the coordinator at terminate,
    /// on each periodic sync, and right after session creation.
    pub fn sync_full_state(&self, record: SessionRecord, transcript: Option<String>, files: Vec<WorkspaceFile>) {
        let _ = self.tx.send(WriteJob::FullSync { record, transcript, files });
    }
}

fn enqueue_file_upsert(tx: &mpsc::UnboundedSender<WriteJob>, event: &crate::event::SessionEvent) {
    let Some(file) = event.payload.get("file") else { return };
    let (Some(path), Some(content)) = (
        file.get("path").and_then(Value::as_str),
        file.get("content").and_then(Value::as_str),
    ) else {
        return;
    };
    let _ = tx.send(WriteJob::UpsertFile {
        path: path.to_string(),
        content: content.as_bytes().to_vec(),
    });
}

async fn apply(adapter: &Arc<dyn PersistenceAdapter>, session_id: &str, job: WriteJob) -> Result<(), crate::error::PersistenceError> {
    match job {
        WriteJob::UpsertFile { path, content } => adapter.save_workspace_file(session_id, WorkspaceFile { path, content }).await,
        WriteJob::DeleteFile { path } => adapter.delete_session_file(session_id, &path).await,
        WriteJob::SaveTranscript { raw } => adapter.save_transcript(session_id, &raw).await,
        WriteJob::UpdateOptions { options } => {
            adapter
                .update_session_record(session_id, serde_json::json!({"session_options": options}))
                .await
        }
        WriteJob::FullSync { record, transcript, files } => {
            adapter.update_session_record(session_id, serde_json::to_value(&record).unwrap_or_default()).await?;
            if let Some(transcript) = transcript {
                adapter.save_transcript(session_id, &transcript).await?;
            }
            for file in files {
                adapter.save_workspace_file(session_id, file).await?;
            }
            Ok(())
        }
    }
}
