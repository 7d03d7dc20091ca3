//! The one concrete backend this repository ships: a workspace rooted in
//! a plain host directory, commands run as host child processes, files
//! watched with `notify` — the "dangerous host" style backend this
//! codebase already uses for local development, generalized to the
//! primitive contract in [`super`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex as SyncMutex;
use std::time::Duration;

use async_trait::async_trait;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind, Debouncer};

use super::fs_jail::FsJail;
use super::process_supervisor::{self, ProcessSupervisor, SharedChild};
use super::{EnvironmentPrimitive, ExecArgs, Process, WatchCallback, WatchEvent, WatchHandle, WriteOutcome};
use crate::error::RunnerExecutionError;

const DEBOUNCE_INTERVAL: Duration = Duration::from_millis(250);

pub struct LocalEnvironment {
    jail: FsJail,
    supervisor: ProcessSupervisor,
    current: SyncMutex<Option<SharedChild>>,
}

impl LocalEnvironment {
    pub fn new(workspace_root: impl Into<std::path::PathBuf>, env_allowlist: Vec<String>) -> Self {
        Self {
            jail: FsJail::new(workspace_root),
            supervisor: ProcessSupervisor::new(env_allowlist),
            current: SyncMutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        self.jail.root()
    }
}

#[async_trait]
impl EnvironmentPrimitive for LocalEnvironment {
    async fn exec(&self, args: ExecArgs) -> Result<Box<dyn Process>, RunnerExecutionError> {
        let (process, shared) = self.supervisor.spawn(&args, self.jail.root())?;
        *self.current.lock().unwrap() = Some(shared);
        Ok(process)
    }

    async fn read_file(&self, path: &str) -> std::io::Result<Option<Vec<u8>>> {
        self.jail.read_file(path).await
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> std::io::Result<()> {
        self.jail.write_file(path, content).await
    }

    async fn write_files(&self, files: &[(String, Vec<u8>)]) -> WriteOutcome {
        let mut outcome = WriteOutcome::default();
        for (path, content) in files {
            match self.jail.write_file(path, content).await {
                Ok(()) => outcome.succeeded.push(path.clone()),
                Err(e) => outcome.failed.push((path.clone(), e.to_string())),
            }
        }
        outcome
    }

    async fn create_directory(&self, path: &str) -> std::io::Result<()> {
        self.jail.create_directory(path).await
    }

    async fn list_files(&self, dir: &str, glob: Option<&str>) -> std::io::Result<Vec<String>> {
        self.jail.list_files(dir, glob).await
    }

    fn is_running(&self) -> bool {
        match self.current.lock().unwrap().as_ref() {
            Some(shared) => process_supervisor::try_wait(shared).is_none(),
            None => false,
        }
    }

    async fn poll(&self) -> Option<i32> {
        let shared = self.current.lock().unwrap().clone();
        shared.as_ref().and_then(process_supervisor::try_wait)
    }

    async fn terminate(&self) {
        let shared = self.current.lock().unwrap().take();
        if let Some(shared) = shared {
            process_supervisor::kill_shared(&shared).await;
        }
    }

    fn watch(
        &self,
        path: &str,
        ignore_patterns: &[String],
        callback: WatchCallback,
    ) -> std::io::Result<Box<dyn WatchHandle>> {
        let watch_root = self.jail.resolve(path)?;
        let jail_root = self.jail.root().to_path_buf();
        let ignore_patterns = ignore_patterns.to_vec();
        let runtime = tokio::runtime::Handle::current();
        let mut known_paths = seed_known_paths(&watch_root);

        let mut debouncer = new_debouncer(DEBOUNCE_INTERVAL, move |result: DebounceEventResult| {
            let Ok(events) = result else { return };
            for event in events {
                let Ok(relative) = event.path.strip_prefix(&jail_root) else {
                    continue;
                };
                let relative = relative.to_string_lossy().replace('\\', "/");
                if is_ignored(&relative, &ignore_patterns) {
                    continue;
                }
                let watch_event = match event.kind {
                    DebouncedEventKind::Any => {
                        let path_buf = event.path.clone();
                        let runtime = runtime.clone();
                        let content = runtime.block_on(async move { tokio::fs::read_to_string(&path_buf).await.ok() });
                        // notify-debouncer-mini collapses create/write into one
                        // `Any` kind; disambiguate via a set of paths already
                        // seen under this watch root.
                        let is_new = known_paths.insert(event.path.clone());
                        match content {
                            Some(content) if is_new => WatchEvent::Created {
                                path: relative,
                                content: Some(content),
                            },
                            Some(content) => WatchEvent::Modified {
                                path: relative,
                                content: Some(content),
                            },
                            None if path_exists(&event.path) => WatchEvent::Modified {
                                path: relative,
                                content: None,
                            },
                            None => {
                                known_paths.remove(&event.path);
                                WatchEvent::Deleted { path: relative }
                            }
                        }
                    }
                    DebouncedEventKind::AnyContinuous => continue,
                    _ => continue,
                };
                callback(watch_event);
            }
        })
        .map_err(|e| std::io::Error::other(e.to_string()))?;

        debouncer
            .watcher()
            .watch(&watch_root, notify::RecursiveMode::Recursive)
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        Ok(Box::new(LocalWatchHandle {
            debouncer: SyncMutex::new(Some(debouncer)),
        }))
    }
}

/// Pre-populates the create/modify disambiguation set with everything
/// already on disk under `root`, so the first edit to a pre-existing
/// file isn't reported as `file:created`.
fn seed_known_paths(root: &Path) -> HashSet<PathBuf> {
    let mut seen = HashSet::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            match entry.file_type() {
                Ok(file_type) if file_type.is_dir() => stack.push(path),
                Ok(_) => {
                    seen.insert(path);
                }
                Err(_) => {}
            }
        }
    }
    seen
}

fn is_ignored(relative: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| relative.contains(pattern.as_str()))
}

fn path_exists(path: &Path) -> bool {
    path.try_exists().unwrap_or(false)
}

struct LocalWatchHandle {
    debouncer: SyncMutex<Option<Debouncer<notify::RecommendedWatcher>>>,
}

impl WatchHandle for LocalWatchHandle {
    fn stop(&self) {
        self.debouncer.lock().unwrap().take();
    }
}
