//! Agent Session coordinator (C9): the per-session public contract that
//! lazily activates an execution environment, drives queries through it,
//! and keeps it alive with periodic sync/health jobs — modeled on this
//! codebase's agent chat session lifecycle (busy flag, lazy spawn,
//! best-effort termination) generalized off one HTTP handler into a
//! standalone actor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

use crate::bus::SessionBus;
use crate::environment::EnvironmentPrimitive;
use crate::error::{EnvironmentActivationError, ProfileOrSessionNotFound};
use crate::event::{EventContext, SessionEvent};
use crate::listeners::client_broadcast::ClientBroadcastListener;
use crate::listeners::client_hub::ClientHub;
use crate::persistence::listener::PersistenceListener;
use crate::persistence::{PersistenceAdapter, WorkspaceFile};
use crate::session::execution_environment::ExecutionEnvironment;
use crate::session::state::{PersistedListData, RuntimeSessionData, RuntimeState, RuntimeStatus, SessionRecord, SessionState};
use crate::transcript::Architecture;

const SYNC_INTERVAL: Duration = Duration::from_secs(60);
const HEALTH_INTERVAL: Duration = Duration::from_secs(30);

/// Builds the primitive a session's execution environment runs on. Kept
/// as a trait rather than a bare closure so a registry can share one
/// factory across every session it loads or creates.
pub trait EnvironmentFactory: Send + Sync {
    fn create(&self, session_id: &str) -> Arc<dyn EnvironmentPrimitive>;
}

/// The production factory: one workspace subdirectory per session under
/// a shared root.
pub struct LocalEnvironmentFactory {
    pub workspace_root: std::path::PathBuf,
    pub env_allowlist: Vec<String>,
}

impl EnvironmentFactory for LocalEnvironmentFactory {
    fn create(&self, session_id: &str) -> Arc<dyn EnvironmentPrimitive> {
        Arc::new(crate::environment::local::LocalEnvironment::new(
            self.workspace_root.join(session_id),
            self.env_allowlist.clone(),
        ))
    }
}

pub struct NewSessionArgs {
    pub agent_profile_ref: String,
    pub architecture: Architecture,
    pub session_options: Value,
    pub default_workspace_files: Vec<(String, Vec<u8>)>,
}

pub struct AgentSession {
    session_id: String,
    bus: Arc<SessionBus>,
    state: Arc<SyncMutex<SessionState>>,
    environment: Arc<AsyncMutex<Option<ExecutionEnvironment>>>,
    environment_factory: Arc<dyn EnvironmentFactory>,
    adapter: Arc<dyn PersistenceAdapter>,
    persistence: PersistenceListener,
    jobs: SyncMutex<Vec<JoinHandle<()>>>,
    terminated: Arc<AtomicBool>,
    default_workspace_files: AsyncMutex<Vec<(String, Vec<u8>)>>,
    /// Invoked by the health job once it observes the environment is no
    /// longer running, so the host can unload this session.
    on_terminated: Arc<SyncMutex<Option<Arc<dyn Fn(String) + Send + Sync>>>>,
}

impl AgentSession {
    /// Loads an existing session from its persisted record. Does not
    /// activate an environment — that happens lazily on first message.
    pub async fn load(
        session_id: String,
        adapter: Arc<dyn PersistenceAdapter>,
        environment_factory: Arc<dyn EnvironmentFactory>,
        client_hub: Arc<ClientHub>,
    ) -> Result<Self, ProfileOrSessionNotFound> {
        let record = adapter
            .load_session(&session_id)
            .await
            .ok()
            .flatten()
            .ok_or_else(|| ProfileOrSessionNotFound::Session(session_id.clone()))?;
        Ok(Self::assemble(record, Vec::new(), adapter, environment_factory, client_hub))
    }

    /// Creates a brand-new session record and persists it immediately,
    /// ahead of any environment activation.
    pub async fn create(
        session_id: String,
        args: NewSessionArgs,
        adapter: Arc<dyn PersistenceAdapter>,
        environment_factory: Arc<dyn EnvironmentFactory>,
        client_hub: Arc<ClientHub>,
    ) -> Result<Self, EnvironmentActivationError> {
        let now = Utc::now().to_rfc3339();
        let record = SessionRecord {
            id: session_id,
            agent_profile_ref: args.agent_profile_ref,
            architecture: args.architecture,
            session_options: args.session_options,
            created_at: now.clone(),
            updated_at: now,
        };
        adapter
            .create_session_record(record.clone())
            .await
            .map_err(|e| EnvironmentActivationError::WorkspaceWrite(e.to_string()))?;

        let session = Self::assemble(record.clone(), args.default_workspace_files, adapter, environment_factory, client_hub);
        session.persistence.sync_full_state(record, None, Vec::new());
        Ok(session)
    }

    fn assemble(
        record: SessionRecord,
        default_workspace_files: Vec<(String, Vec<u8>)>,
        adapter: Arc<dyn PersistenceAdapter>,
        environment_factory: Arc<dyn EnvironmentFactory>,
        client_hub: Arc<ClientHub>,
    ) -> Self {
        let session_id = record.id.clone();
        let state = Arc::new(SyncMutex::new(SessionState::new(record)));
        let bus = Arc::new(SessionBus::new());
        wire_state_sync(&bus, state.clone());

        let persistence = PersistenceListener::spawn(adapter.clone(), session_id.clone());
        persistence.attach(&bus);
        ClientBroadcastListener::attach(&bus, client_hub, session_id.clone());

        Self {
            session_id,
            bus,
            state,
            environment: Arc::new(AsyncMutex::new(None)),
            environment_factory,
            adapter,
            persistence,
            jobs: SyncMutex::new(Vec::new()),
            terminated: Arc::new(AtomicBool::new(false)),
            on_terminated: Arc::new(SyncMutex::new(None)),
            default_workspace_files: AsyncMutex::new(default_workspace_files),
        }
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub fn bus(&self) -> &Arc<SessionBus> {
        &self.bus
    }

    pub fn get_state(&self) -> RuntimeSessionData {
        self.state.lock().unwrap().to_runtime_session_data()
    }

    pub fn get_persisted_list_data(&self) -> PersistedListData {
        self.state.lock().unwrap().to_persisted_list_data()
    }

    pub fn get_runtime_state(&self) -> RuntimeState {
        self.state.lock().unwrap().get_runtime_state()
    }

    /// Routed through the bus rather than mutating `state` directly,
    /// matching the rule every other field in the session document
    /// follows: the bus is the single mutation path.
    pub async fn update_session_options(&self, options: Value) {
        self.bus.emit(self.contextual("options:update", serde_json::json!({ "options": options })));
    }

    /// Lazy activation sequence (§4.9): create environment -> prepare
    /// session -> start watchers -> start periodic jobs -> mark ready.
    async fn ensure_active(&self) -> Result<(), EnvironmentActivationError> {
        let mut guard = self.environment.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        self.emit_status(RuntimeStatus::Starting, Some("creating environment".to_string()));
        let primitive = self.environment_factory.create(&self.session_id);
        let architecture = self.state.lock().unwrap().architecture();
        let env = match ExecutionEnvironment::create(primitive, self.bus.clone(), self.session_id.clone(), architecture).await {
            Ok(env) => env,
            Err(e) => return Err(self.fail_activation(e)),
        };

        self.emit_status(RuntimeStatus::Starting, Some("preparing session".to_string()));
        let record = self.state.lock().unwrap().record();
        let profile = self
            .adapter
            .load_agent_profile(&record.agent_profile_ref)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| serde_json::json!({}));
        let prior_transcript = self.state.lock().unwrap().raw_transcript();
        let default_files = std::mem::take(&mut *self.default_workspace_files.lock().await);
        if let Err(e) = env.prepare_session(&default_files, &profile, prior_transcript.as_deref()).await {
            return Err(self.fail_activation(e));
        }

        let _ = env.watch_workspace_files();

        *guard = Some(env);
        drop(guard);

        self.start_periodic_jobs();
        self.emit_status(RuntimeStatus::Ready, None);
        Ok(())
    }

    pub async fn send_message(&self, text: &str, model: Option<String>) -> Result<(), EnvironmentActivationError> {
        let timestamp = Utc::now().to_rfc3339();
        self.bus
            .emit(self.contextual("status:changed", serde_json::json!({ "activeQueryStartedAt": timestamp })));

        let result = self.run_query(text, model).await;

        self.bus
            .emit(self.contextual("status:changed", serde_json::json!({ "activeQueryStartedAt": Value::Null })));
        result
    }

    async fn run_query(&self, text: &str, model: Option<String>) -> Result<(), EnvironmentActivationError> {
        self.ensure_active().await?;

        let timestamp = Utc::now().to_rfc3339();
        let block_id = format!("user-{timestamp}");
        let block = serde_json::json!({
            "type": "user_message",
            "id": block_id,
            "timestamp": timestamp,
            "content": text,
        });
        self.bus.emit(self.contextual("block:start", serde_json::json!({ "block": block.clone() })));
        self.bus.emit(self.contextual("block:complete", serde_json::json!({ "blockId": block_id, "block": block })));

        let outcome = {
            let guard = self.environment.lock().await;
            let env = guard.as_ref().expect("ensure_active just populated this");
            env.execute_query(text, model).await
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail_activation(EnvironmentActivationError::Runner(e))),
        }
    }

    fn start_periodic_jobs(&self) {
        let session_id = self.session_id.clone();
        let terminated = self.terminated.clone();

        let sync_handle = tokio::spawn(sync_job(self.state.clone(), self.persistence.clone(), session_id.clone(), terminated.clone()));
        let health_handle = tokio::spawn(health_job(
            self.bus.clone(),
            self.state.clone(),
            self.environment.clone(),
            self.on_terminated.clone(),
            session_id,
            terminated,
        ));

        self.jobs.lock().unwrap().push(sync_handle);
        self.jobs.lock().unwrap().push(health_handle);
    }

    /// Registers the callback the health job invokes once it observes the
    /// environment has stopped running, so the host can drop this session
    /// from its active map.
    pub fn set_on_terminated(&self, cb: impl Fn(String) + Send + Sync + 'static) {
        *self.on_terminated.lock().unwrap() = Some(Arc::new(cb));
    }

    /// Stops watchers/periodic jobs, does a final full sync, tears the
    /// environment down. Idempotent.
    pub async fn terminate_execution_environment(&self) {
        for job in self.jobs.lock().unwrap().drain(..) {
            job.abort();
        }
        self.sync_full_state().await;
        if let Some(env) = self.environment.lock().await.take() {
            env.cleanup().await;
        }
        self.terminated.store(true, Ordering::SeqCst);
        self.emit_status(RuntimeStatus::Terminated, None);
    }

    /// Cancels any in-flight query by terminating the subprocess outright
    /// — no final `transcript:changed` flush, per the decision recorded
    /// for destroy semantics.
    pub async fn destroy(&self) {
        self.terminate_execution_environment().await;
        self.bus.destroy();
    }

    async fn sync_full_state(&self) {
        let record = self.state.lock().unwrap().record();
        let transcript = self.state.lock().unwrap().raw_transcript();
        let files = match self.environment.lock().await.as_ref() {
            Some(env) => env.enumerate_workspace_files().await.unwrap_or_default(),
            None => Vec::new(),
        };
        self.persistence.sync_full_state(
            record,
            transcript,
            files.into_iter().map(|(path, content)| WorkspaceFile { path, content }).collect(),
        );
    }

    /// Emits the `error`/`status:changed(error)` pair §7 requires before
    /// handing the error back to the caller, so a client watching the
    /// room observes the failure even though `ensure_active` never got
    /// to `ready`.
    fn fail_activation(&self, e: EnvironmentActivationError) -> EnvironmentActivationError {
        self.bus.emit(self.contextual("error", serde_json::json!({ "message": e.to_string() })));
        self.emit_status(RuntimeStatus::Error, Some(e.to_string()));
        e
    }

    fn contextual(&self, kind: &str, payload: Value) -> SessionEvent {
        SessionEvent::new(kind, payload).with_context(EventContext::default().with_session_id(self.session_id.clone()))
    }

    fn emit_status(&self, status: RuntimeStatus, message: Option<String>) {
        self.bus.emit(self.contextual(
            "status:changed",
            serde_json::json!({ "status": status, "statusMessage": message }),
        ));
    }
}

/// Subscribes the handlers that make the bus the sole mutation path into
/// [`SessionState`] (§4.6): every other component only ever emits, never
/// touches `state` itself.
fn wire_state_sync(bus: &SessionBus, state: Arc<SyncMutex<SessionState>>) {
    let s = state.clone();
    bus.subscribe("transcript:changed", move |event| {
        if let Some(content) = event.payload.get("content").and_then(Value::as_str) {
            s.lock().unwrap().apply_transcript_changed(content);
        }
    });
    let s = state.clone();
    bus.subscribe("options:update", move |event| {
        if let Some(options) = event.payload.get("options") {
            s.lock().unwrap().update_session_options(options.clone());
        }
    });
    let s = state.clone();
    bus.subscribe("status:changed", move |event| {
        let mut state = s.lock().unwrap();
        if let Some(status) = event.payload.get("status").and_then(|v| serde_json::from_value(v.clone()).ok()) {
            let message = event.payload.get("statusMessage").and_then(|v| v.as_str()).map(str::to_string);
            state.set_runtime_status(status, message);
        }
        if let Some(started) = event.payload.get("activeQueryStartedAt") {
            state.set_active_query_started_at(started.as_str().map(str::to_string));
        }
    });
    let s = state.clone();
    bus.subscribe("error", move |event| {
        if let Some(message) = event.payload.get("message").and_then(Value::as_str) {
            s.lock().unwrap().set_last_error(Some(message.to_string()));
        }
    });
}

async fn sync_job(state: Arc<SyncMutex<SessionState>>, persistence: PersistenceListener, session_id: String, terminated: Arc<AtomicBool>) {
    let mut ticker = interval(SYNC_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if terminated.load(Ordering::SeqCst) {
            return;
        }
        let record = state.lock().unwrap().record();
        let transcript = state.lock().unwrap().raw_transcript();
        tracing::debug!(session_id = %session_id, "periodic full sync");
        persistence.sync_full_state(record, transcript, Vec::new());
    }
}

/// §4.9: if `isRunning()` is false, mark the session terminated, stop its
/// jobs, and notify the host once so it can evict the session from its
/// active map. If the environment is healthy but the recorded status had
/// drifted away from `ready`, restore it.
async fn health_job(
    bus: Arc<SessionBus>,
    state: Arc<SyncMutex<SessionState>>,
    environment: Arc<AsyncMutex<Option<ExecutionEnvironment>>>,
    on_terminated: Arc<SyncMutex<Option<Arc<dyn Fn(String) + Send + Sync>>>>,
    session_id: String,
    terminated: Arc<AtomicBool>,
) {
    let mut ticker = interval(HEALTH_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if terminated.load(Ordering::SeqCst) {
            return;
        }

        let healthy = match environment.lock().await.as_ref() {
            Some(env) => env.health_check(),
            None => true,
        };

        let context = EventContext::default().with_session_id(session_id.clone());
        if !healthy {
            tracing::warn!(session_id = %session_id, "environment health check failed, terminating session");
            terminated.store(true, Ordering::SeqCst);
            bus.emit(
                SessionEvent::new("status:changed", serde_json::json!({ "status": RuntimeStatus::Terminated, "statusMessage": "health check failed" }))
                    .with_context(context),
            );
            if let Some(cb) = on_terminated.lock().unwrap().as_ref() {
                cb(session_id.clone());
            }
            return;
        }

        let current_status = state.lock().unwrap().get_runtime_state().status;
        if current_status != RuntimeStatus::Ready {
            bus.emit(
                SessionEvent::new("status:changed", serde_json::json!({ "status": RuntimeStatus::Ready, "statusMessage": Value::Null }))
                    .with_context(context),
            );
        }
    }
}
