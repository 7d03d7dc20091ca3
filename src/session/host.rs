//! Session Host / registry (C10): the process-wide map of active
//! [`AgentSession`]s, grounded on this codebase's own persisted-session
//! registry (`server::FlowSessions` / the `interact_sessions` map) —
//! generalized from one map-per-flow to one map for the whole process,
//! with a broadcast channel standing in for its `RunEvent` bus.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::error::{EnvironmentActivationError, ProfileOrSessionNotFound};
use crate::event::SessionEvent;
use crate::listeners::client_hub::ClientHub;
use crate::persistence::PersistenceAdapter;
use crate::session::coordinator::{AgentSession, EnvironmentFactory, NewSessionArgs};
use crate::session::state::PersistedListData;
use crate::transcript::Architecture;

const GLOBAL_CHANNEL_CAPACITY: usize = 256;

pub struct SessionHost {
    sessions: Arc<RwLock<HashMap<String, Arc<AgentSession>>>>,
    adapter: Arc<dyn PersistenceAdapter>,
    environment_factory: Arc<dyn EnvironmentFactory>,
    client_hub: Arc<ClientHub>,
    global_events: broadcast::Sender<SessionEvent>,
}

impl SessionHost {
    pub fn new(adapter: Arc<dyn PersistenceAdapter>, environment_factory: Arc<dyn EnvironmentFactory>, client_hub: Arc<ClientHub>) -> Self {
        let (global_events, _) = broadcast::channel(GLOBAL_CHANNEL_CAPACITY);
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            adapter,
            environment_factory,
            client_hub,
            global_events,
        }
    }

    pub fn subscribe_global(&self) -> broadcast::Receiver<SessionEvent> {
        self.global_events.subscribe()
    }

    /// Returns an already-active session without touching storage.
    pub async fn get_session(&self, session_id: &str) -> Option<Arc<AgentSession>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Returns the active session if present, otherwise activates it from
    /// its persisted record.
    pub async fn load_session(&self, session_id: &str) -> Result<Arc<AgentSession>, ProfileOrSessionNotFound> {
        if let Some(session) = self.get_session(session_id).await {
            return Ok(session);
        }
        let session = Arc::new(
            AgentSession::load(
                session_id.to_string(),
                self.adapter.clone(),
                self.environment_factory.clone(),
                self.client_hub.clone(),
            )
            .await?,
        );
        self.wire_on_terminated(&session);
        self.sessions.write().await.insert(session_id.to_string(), session.clone());
        self.emit_sessions_changed();
        Ok(session)
    }

    pub async fn create_session(&self, args: NewSessionArgs) -> Result<Arc<AgentSession>, EnvironmentActivationError> {
        let session_id = generate_session_id(args.architecture);
        let session = Arc::new(
            AgentSession::create(
                session_id.clone(),
                args,
                self.adapter.clone(),
                self.environment_factory.clone(),
                self.client_hub.clone(),
            )
            .await?,
        );
        self.wire_on_terminated(&session);
        self.sessions.write().await.insert(session_id, session.clone());
        self.emit_sessions_changed();
        Ok(session)
    }

    /// Invokes `destroy` and drops the session from the active map; the
    /// persisted record is untouched (§4.10). The health job reaches this
    /// same path when it observes the environment has stopped running.
    pub async fn unload_session(&self, session_id: &str) {
        let session = self.sessions.write().await.remove(session_id);
        if let Some(session) = session {
            session.destroy().await;
            self.emit_sessions_changed();
        }
    }

    /// Lets each session notify the host once its health job observes the
    /// environment has died, so it can be evicted from the active map
    /// without waiting for a client to call `unloadSession`.
    fn wire_on_terminated(&self, session: &Arc<AgentSession>) {
        let sessions = self.sessions.clone();
        let events = self.global_events.clone();
        session.set_on_terminated(move |session_id| {
            let sessions = sessions.clone();
            let events = events.clone();
            tokio::spawn(async move {
                if sessions.write().await.remove(&session_id).is_some() {
                    let _ = events.send(SessionEvent::new("sessions:changed", serde_json::json!({})));
                }
            });
        });
    }

    /// Reads the full persisted catalogue — not just the active map — so
    /// a fresh process restart still lists every prior session.
    pub async fn list_all_sessions(&self) -> Result<Vec<PersistedListData>, crate::error::PersistenceError> {
        self.adapter.list_all_sessions().await
    }

    fn emit_sessions_changed(&self) {
        let _ = self.global_events.send(SessionEvent::new("sessions:changed", serde_json::json!({})));
    }
}

/// Session identity (§3): a UUID for `A1`, a `ses_<ms-timestamp-hex>_<random>`
/// id for `A2`.
fn generate_session_id(architecture: Architecture) -> String {
    match architecture {
        Architecture::A1 => Uuid::new_v4().to_string(),
        Architecture::A2 => {
            let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
            format!("ses_{:012x}_{}", millis, random_base36(11))
        }
    }
}

fn random_base36(len: usize) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..len).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::local::LocalEnvironment;
    use crate::environment::EnvironmentPrimitive;
    use crate::persistence::file_adapter::FilePersistenceAdapter;
    use crate::transcript::Architecture;
    use tempfile::tempdir;

    struct LocalFactory {
        root: std::path::PathBuf,
    }

    impl EnvironmentFactory for LocalFactory {
        fn create(&self, session_id: &str) -> Arc<dyn EnvironmentPrimitive> {
            Arc::new(LocalEnvironment::new(self.root.join(session_id), vec!["PATH".into()]))
        }
    }

    async fn make_host() -> (tempfile::TempDir, SessionHost) {
        let dir = tempdir().unwrap();
        let adapter = Arc::new(FilePersistenceAdapter::new(dir.path().join("storage")));
        adapter.load_all().await.unwrap();
        let factory = Arc::new(LocalFactory { root: dir.path().join("sessions") });
        let hub = Arc::new(ClientHub::new());
        (dir, SessionHost::new(adapter, factory, hub))
    }

    fn new_args() -> NewSessionArgs {
        NewSessionArgs {
            agent_profile_ref: "profile-a".to_string(),
            architecture: Architecture::A1,
            session_options: serde_json::json!({}),
            default_workspace_files: Vec::new(),
        }
    }

    #[tokio::test]
    async fn create_then_get_returns_the_same_session() {
        let (_dir, host) = make_host().await;
        let created = host.create_session(new_args()).await.unwrap();
        let fetched = host.get_session(created.id()).await.unwrap();
        assert_eq!(created.id(), fetched.id());
    }

    #[tokio::test]
    async fn create_adds_to_the_persisted_catalogue() {
        let (_dir, host) = make_host().await;
        let created = host.create_session(new_args()).await.unwrap();
        let list = host.list_all_sessions().await.unwrap();
        assert!(list.iter().any(|s| s.id == created.id()));
    }

    #[tokio::test]
    async fn unload_removes_from_active_map_but_keeps_persisted_record() {
        let (_dir, host) = make_host().await;
        let created = host.create_session(new_args()).await.unwrap();
        let id = created.id().to_string();
        drop(created);
        host.unload_session(&id).await;
        assert!(host.get_session(&id).await.is_none());
        let list = host.list_all_sessions().await.unwrap();
        assert!(list.iter().any(|s| s.id == id));
    }

    #[tokio::test]
    async fn load_session_reactivates_a_persisted_session_not_in_the_active_map() {
        let (_dir, host) = make_host().await;
        let created = host.create_session(new_args()).await.unwrap();
        let id = created.id().to_string();
        drop(created);
        host.unload_session(&id).await;

        let loaded = host.load_session(&id).await.unwrap();
        assert_eq!(loaded.id(), id);
    }

    #[tokio::test]
    async fn load_session_for_an_unknown_id_is_not_found() {
        let (_dir, host) = make_host().await;
        let result = host.load_session("missing").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn sessions_changed_is_broadcast_on_create() {
        let (_dir, host) = make_host().await;
        let mut rx = host.subscribe_global();
        host.create_session(new_args()).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, "sessions:changed");
    }

    #[tokio::test]
    async fn a2_sessions_get_the_ses_prefixed_id_shape() {
        let (_dir, host) = make_host().await;
        let mut args = new_args();
        args.architecture = Architecture::A2;
        let created = host.create_session(args).await.unwrap();
        let id = created.id();
        assert!(id.starts_with("ses_"), "unexpected id shape: {id}");
        let mut parts = id.trim_start_matches("ses_").splitn(2, '_');
        let timestamp = parts.next().unwrap();
        let random = parts.next().unwrap();
        assert_eq!(timestamp.len(), 12);
        assert!(timestamp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(random.len(), 11);
        assert!(random.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn a1_sessions_get_a_uuid() {
        let (_dir, host) = make_host().await;
        let created = host.create_session(new_args()).await.unwrap();
        assert!(Uuid::parse_str(created.id()).is_ok());
    }
}
