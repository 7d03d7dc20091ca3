//! The Environment Primitive (§4.1): the narrow abstraction over one
//! isolated workspace that everything above it is built on. Backends
//! implement [`EnvironmentPrimitive`]; this repository ships exactly one,
//! [`local::LocalEnvironment`], since a remote/container backend is
//! specified only through this trait.

pub mod fs_jail;
pub mod local;
pub mod process_supervisor;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::RunnerExecutionError;

/// One command invocation against a primitive.
#[derive(Debug, Clone)]
pub struct ExecArgs {
    pub argv: Vec<String>,
    pub cwd: Option<String>,
}

impl ExecArgs {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv, cwd: None }
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// One chunk delivered off a running process's stdout/stderr, or its exit.
#[derive(Debug, Clone)]
pub enum ExecEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Exit(Option<i32>),
}

/// A spawned, still-live command. `next_event` is pulled by the consumer
/// (the runner stream parser, for the runner subprocess; callers that only
/// need a byte stream layer stdout-line framing on top of this).
#[async_trait]
pub trait Process: Send {
    async fn next_event(&mut self) -> ExecEvent;
    async fn write_stdin(&mut self, data: &[u8]) -> std::io::Result<()>;
    async fn close_stdin(&mut self) -> std::io::Result<()>;
    async fn wait(&mut self) -> Option<i32>;
    fn kill(&mut self);
}

/// Partial-success outcome of a batch file write (§4.1: "attempt every
/// file; failures are reported, not raised").
#[derive(Debug, Clone, Default)]
pub struct WriteOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// One filesystem change observed by a workspace watcher.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Created { path: String, content: Option<String> },
    Modified { path: String, content: Option<String> },
    Deleted { path: String },
}

pub type WatchCallback = Box<dyn Fn(WatchEvent) + Send + Sync>;

/// A live watch registration; dropping or calling `stop` tears down the
/// underlying OS watcher.
pub trait WatchHandle: Send + Sync {
    fn stop(&self);
}

#[async_trait]
pub trait EnvironmentPrimitive: Send + Sync {
    async fn exec(&self, args: ExecArgs) -> Result<Box<dyn Process>, RunnerExecutionError>;

    async fn read_file(&self, path: &str) -> std::io::Result<Option<Vec<u8>>>;
    async fn write_file(&self, path: &str, content: &[u8]) -> std::io::Result<()>;
    async fn write_files(&self, files: &[(String, Vec<u8>)]) -> WriteOutcome;
    async fn create_directory(&self, path: &str) -> std::io::Result<()>;
    async fn list_files(&self, dir: &str, glob: Option<&str>) -> std::io::Result<Vec<String>>;

    fn is_running(&self) -> bool;
    async fn poll(&self) -> Option<i32>;
    async fn terminate(&self);

    fn watch(
        &self,
        path: &str,
        ignore_patterns: &[String],
        callback: WatchCallback,
    ) -> std::io::Result<Box<dyn WatchHandle>>;
}

/// Wall-clock bound applied to the helper subcommands (§5: bounded by the
/// process's natural termination — this is a generous outer backstop, not
/// a protocol timeout).
pub const HELPER_TIMEOUT: Duration = Duration::from_secs(5 * 60);
