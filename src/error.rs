//! Error taxonomy shared across the session runtime.
//!
//! One enum per failure family, matching how callers actually handle them:
//! activation/runner errors abort a query, everything else degrades.

use std::io;

/// Raised when a session or agent profile cannot be located.
#[derive(thiserror::Error, Debug)]
pub enum ProfileOrSessionNotFound {
    #[error("session not found: {0}")]
    Session(String),

    #[error("agent profile not found: {0}")]
    AgentProfile(String),
}

/// Failures while preparing an execution environment for a query.
#[derive(thiserror::Error, Debug)]
pub enum EnvironmentActivationError {
    #[error("failed to create environment primitive: {0}")]
    PrimitiveCreate(String),

    #[error("failed to write workspace files: {0}")]
    WorkspaceWrite(String),

    #[error(transparent)]
    Runner(#[from] RunnerExecutionError),

    #[error("environment already terminated")]
    AlreadyTerminated,
}

/// Failures from spawning or running the runner subprocess / its helper
/// subcommands.
#[derive(thiserror::Error, Debug)]
pub enum RunnerExecutionError {
    #[error("failed to spawn runner: {0}")]
    Spawn(String),

    #[error("runner exited with non-zero status: {code:?}, stderr={stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("runner script reported failure: {0}")]
    ScriptFailure(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// `read-session-transcript` came back empty or unsuccessful. Non-fatal —
/// callers emit an `error` event with `code = TRANSCRIPT_FETCH_FAILED` and
/// keep going.
#[derive(thiserror::Error, Debug)]
#[error("failed to read session transcript: {0}")]
pub struct TranscriptReadError(pub String);

impl TranscriptReadError {
    pub const CODE: &'static str = "TRANSCRIPT_FETCH_FAILED";
}

/// A transcript envelope or one of its records failed to parse. Always
/// recovered locally into an empty parse; never propagated past the
/// converter boundary.
#[derive(thiserror::Error, Debug)]
#[error("transcript parse error: {0}")]
pub struct ParseError(pub String);

/// A persistence adapter call failed. Logged, never propagated — the next
/// full snapshot sync reconciles.
#[derive(thiserror::Error, Debug)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("adapter error: {0}")]
    Adapter(String),
}

/// A Client Hub broadcast failed to reach any subscriber. Dropped silently
/// by callers; kept as a typed value so call sites can log at debug level.
#[derive(thiserror::Error, Debug)]
#[error("transport error delivering to room {room}: {reason}")]
pub struct TransportError {
    pub room: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn all_error_kinds_are_send_sync() {
        assert_send_sync::<ProfileOrSessionNotFound>();
        assert_send_sync::<EnvironmentActivationError>();
        assert_send_sync::<RunnerExecutionError>();
        assert_send_sync::<TranscriptReadError>();
        assert_send_sync::<ParseError>();
        assert_send_sync::<PersistenceError>();
        assert_send_sync::<TransportError>();
    }

    #[test]
    fn not_found_displays_session_id() {
        let err = ProfileOrSessionNotFound::Session("abc".into());
        assert_eq!(err.to_string(), "session not found: abc");
    }

    #[test]
    fn non_zero_exit_displays_code_and_stderr() {
        let err = RunnerExecutionError::NonZeroExit {
            code: Some(1),
            stderr: "boom".into(),
        };
        assert_eq!(
            err.to_string(),
            "runner exited with non-zero status: Some(1), stderr=boom"
        );
    }

    #[test]
    fn transcript_read_error_code_constant() {
        assert_eq!(TranscriptReadError::CODE, "TRANSCRIPT_FETCH_FAILED");
    }

    #[test]
    fn activation_error_wraps_runner_error() {
        let runner = RunnerExecutionError::ScriptFailure("agent profile rejected".into());
        let activation: EnvironmentActivationError = runner.into();
        assert!(activation.to_string().contains("agent profile rejected"));
    }
}
