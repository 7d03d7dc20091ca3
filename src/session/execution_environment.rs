//! Execution Environment (C4): owns one [`EnvironmentPrimitive`] for a
//! session's lifetime and drives the runner subprocess protocol (§6)
//! over it.

use std::sync::Arc;
use std::sync::Mutex as SyncMutex;

use serde_json::Value;

use crate::bus::SessionBus;
use crate::environment::{EnvironmentPrimitive, ExecArgs, ExecEvent, WatchEvent, WatchHandle};
use crate::error::{EnvironmentActivationError, RunnerExecutionError, TranscriptReadError};
use crate::event::{EventContext, SessionEvent};
use crate::runner::LineBuffer;
use crate::transcript::Architecture;

const WORKSPACE_IGNORE: &[&str] = &[".git", ".claude", "node_modules", "target", "dist"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvState {
    Uninitialized,
    Created,
    Ready,
    Querying,
    Terminated,
    Error,
}

pub struct ExecutionEnvironment {
    primitive: Arc<dyn EnvironmentPrimitive>,
    bus: Arc<SessionBus>,
    session_id: String,
    architecture: Architecture,
    state: SyncMutex<EnvState>,
    watch_handle: SyncMutex<Option<Box<dyn WatchHandle>>>,
}

impl ExecutionEnvironment {
    pub async fn create(
        primitive: Arc<dyn EnvironmentPrimitive>,
        bus: Arc<SessionBus>,
        session_id: String,
        architecture: Architecture,
    ) -> Result<Self, EnvironmentActivationError> {
        let env = Self {
            primitive,
            bus,
            session_id,
            architecture,
            state: SyncMutex::new(EnvState::Uninitialized),
            watch_handle: SyncMutex::new(None),
        };
        env.install_runner_assets().await?;
        env.set_state(EnvState::Created);
        Ok(env)
    }

    pub fn state(&self) -> EnvState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: EnvState) {
        *self.state.lock().unwrap() = state;
    }

    async fn install_runner_assets(&self) -> Result<(), EnvironmentActivationError> {
        let mut files = vec![
            ("app/runner.js".to_string(), RUNNER_BUNDLE_PLACEHOLDER.to_vec()),
            ("app/package.json".to_string(), RUNNER_PACKAGE_MANIFEST.to_vec()),
        ];
        if self.architecture == Architecture::A2 {
            files.push(("app/adapter/index.js".to_string(), ADAPTER_BUNDLE_PLACEHOLDER.to_vec()));
        }
        let outcome = self.primitive.write_files(&files).await;
        if !outcome.failed.is_empty() {
            return Err(EnvironmentActivationError::WorkspaceWrite(format!(
                "failed to install runner assets: {:?}",
                outcome.failed
            )));
        }
        Ok(())
    }

    /// Idempotent: safe to call again before each activation.
    pub async fn prepare_session(
        &self,
        workspace_files: &[(String, Vec<u8>)],
        agent_profile: &Value,
        prior_transcript: Option<&str>,
    ) -> Result<(), EnvironmentActivationError> {
        if !workspace_files.is_empty() {
            let outcome = self.primitive.write_files(workspace_files).await;
            for (path, reason) in &outcome.failed {
                tracing::warn!(session_id = %self.session_id, path, reason, "failed to write workspace file during prepare");
            }
        }

        let profile_input = serde_json::json!({
            "baseWorkspacePath": "workspace",
            "agentProfile": agent_profile,
            "architectureType": self.architecture,
        });
        let outcome = self.run_helper("load-agent-profile", profile_input).await?;
        if !outcome.success {
            return Err(EnvironmentActivationError::Runner(RunnerExecutionError::ScriptFailure(
                outcome.error.unwrap_or_else(|| "load-agent-profile failed".to_string()),
            )));
        }

        if let Some(transcript) = prior_transcript {
            let transcript_input = serde_json::json!({
                "baseWorkspacePath": "workspace",
                "sessionTranscript": transcript,
                "sessionId": self.session_id,
                "architectureType": self.architecture,
            });
            let outcome = self.run_helper("load-session-transcript", transcript_input).await?;
            if outcome.success {
                self.emit("transcript:written", serde_json::json!({}));
            } else {
                return Err(EnvironmentActivationError::Runner(RunnerExecutionError::ScriptFailure(
                    outcome.error.unwrap_or_else(|| "load-session-transcript failed".to_string()),
                )));
            }
        }

        self.set_state(EnvState::Ready);
        Ok(())
    }

    /// Spawns `execute-query`, streaming every yielded event onto the bus
    /// with `context.sessionId` filled in, then reads back the transcript
    /// and emits `transcript:changed` (or a `TRANSCRIPT_FETCH_FAILED`
    /// `error` event on read failure).
    pub async fn execute_query(&self, prompt: &str, model: Option<String>) -> Result<(), RunnerExecutionError> {
        self.set_state(EnvState::Querying);
        let input = serde_json::json!({
            "prompt": prompt,
            "architecture": self.architecture,
            "sessionId": self.session_id,
            "baseWorkspacePath": "workspace",
            "model": model,
        });

        let run_result = self.stream_subcommand("execute-query", input, |event| {
            self.emit_with_context(event);
        }).await;

        match self.read_transcript().await {
            Ok(Some(content)) => self.emit("transcript:changed", serde_json::json!({ "content": content })),
            Ok(None) => {}
            Err(e) => self.emit(
                "error",
                serde_json::json!({ "message": e.0, "code": TranscriptReadError::CODE }),
            ),
        }

        run_result
    }

    fn emit_with_context(&self, mut event: SessionEvent) {
        event.context = event.context.clone().with_session_id(self.session_id.clone());
        self.bus.emit(event);
    }

    fn emit(&self, kind: &str, payload: Value) {
        self.bus.emit(SessionEvent::new(kind, payload).with_context(EventContext::default().with_session_id(self.session_id.clone())));
    }

    /// Starts the workspace watcher, translating primitive watch events
    /// into `file:*` bus events. Creates/modifies without readable
    /// content are suppressed per §4.4.
    pub fn watch_workspace_files(&self) -> std::io::Result<()> {
        let bus = self.bus.clone();
        let session_id = self.session_id.clone();
        let ignore: Vec<String> = WORKSPACE_IGNORE.iter().map(|s| s.to_string()).collect();
        let handle = self.primitive.watch(
            "workspace",
            &ignore,
            Box::new(move |event: WatchEvent| {
                let (kind, payload) = match event {
                    WatchEvent::Created { path, content: Some(content) } => {
                        ("file:created", serde_json::json!({"file": {"path": path, "content": content}}))
                    }
                    WatchEvent::Modified { path, content: Some(content) } => {
                        ("file:modified", serde_json::json!({"file": {"path": path, "content": content}}))
                    }
                    WatchEvent::Created { .. } | WatchEvent::Modified { .. } => return,
                    WatchEvent::Deleted { path } => ("file:deleted", serde_json::json!({"path": path})),
                };
                bus.emit(
                    SessionEvent::new(kind, payload)
                        .with_context(EventContext::default().with_session_id(session_id.clone())),
                );
            }),
        )?;
        *self.watch_handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub async fn read_transcript(&self) -> Result<Option<String>, TranscriptReadError> {
        let input = serde_json::json!({
            "baseWorkspacePath": "workspace",
            "sessionId": self.session_id,
            "architecture": self.architecture,
        });
        let outcome = self
            .run_helper("read-session-transcript", input)
            .await
            .map_err(|e| TranscriptReadError(e.to_string()))?;
        if !outcome.success {
            return Err(TranscriptReadError(outcome.error.unwrap_or_else(|| "read-session-transcript failed".to_string())));
        }
        Ok(outcome.data.and_then(|v| v.as_str().map(str::to_string)))
    }

    pub async fn enumerate_workspace_files(&self) -> std::io::Result<Vec<(String, Vec<u8>)>> {
        let paths = self.primitive.list_files("workspace", None).await?;
        let mut out = Vec::new();
        for path in paths {
            let relative = path.strip_prefix("workspace/").unwrap_or(&path);
            if relative.split('/').next().is_some_and(|segment| segment.starts_with('.')) {
                continue;
            }
            if let Ok(Some(content)) = self.primitive.read_file(&path).await {
                out.push((relative.to_string(), content));
            }
        }
        Ok(out)
    }

    pub fn health_check(&self) -> bool {
        self.primitive.is_running()
    }

    pub async fn cleanup(&self) {
        if let Some(handle) = self.watch_handle.lock().unwrap().take() {
            handle.stop();
        }
        self.primitive.terminate().await;
        self.set_state(EnvState::Terminated);
    }

    async fn run_helper(&self, subcommand: &str, input: Value) -> Result<ScriptOutput, RunnerExecutionError> {
        let mut events = Vec::new();
        self.stream_subcommand(subcommand, input, |event| events.push(event)).await?;
        let terminal = events.into_iter().rev().find(SessionEvent::is_script_output);
        Ok(match terminal {
            Some(event) => ScriptOutput {
                success: event.script_output_success(),
                data: event.payload.get("data").cloned(),
                error: event.payload.get("error").and_then(|v| v.as_str()).map(str::to_string),
            },
            None => ScriptOutput {
                success: true,
                data: None,
                error: None,
            },
        })
    }

    async fn stream_subcommand(
        &self,
        subcommand: &str,
        input: Value,
        mut on_event: impl FnMut(SessionEvent),
    ) -> Result<(), RunnerExecutionError> {
        let args = ExecArgs::new(vec!["node".into(), "app/runner.js".into(), subcommand.into()]);
        let mut process = self.primitive.exec(args).await?;
        process.write_stdin(input.to_string().as_bytes()).await?;
        process.close_stdin().await?;

        let mut buffer = LineBuffer::new();
        let mut stderr = Vec::new();
        let exit_code = loop {
            match process.next_event().await {
                ExecEvent::Stdout(bytes) => {
                    for event in buffer.feed(&bytes) {
                        on_event(event);
                    }
                }
                ExecEvent::Stderr(bytes) => stderr.extend(bytes),
                ExecEvent::Exit(code) => break code,
            }
        };
        if let Some(event) = buffer.finish() {
            on_event(event);
        }

        match exit_code {
            Some(0) => Ok(()),
            code => Err(RunnerExecutionError::NonZeroExit {
                code,
                stderr: String::from_utf8_lossy(&stderr).to_string(),
            }),
        }
    }
}

struct ScriptOutput {
    success: bool,
    data: Option<Value>,
    error: Option<String>,
}

const RUNNER_BUNDLE_PLACEHOLDER: &[u8] = b"// runner bundle asset, installed verbatim per session\n";
const RUNNER_PACKAGE_MANIFEST: &[u8] = b"{\"name\":\"sessiond-runner\",\"private\":true}\n";
const ADAPTER_BUNDLE_PLACEHOLDER: &[u8] = b"// part-based architecture adapter bundle\n";
