//! Path-containment guard over one workspace root. Every relative path the
//! primitive is asked to touch is resolved against the root and rejected
//! if it would escape it — the same discipline this codebase already
//! applies to sandboxed file access, just scoped to a plain host
//! directory instead of a container mount.

use std::io;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FsJail {
    root: PathBuf,
}

impl FsJail {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `relative` against the root, rejecting `..` components
    /// that would climb above it. Does not require the path to exist.
    pub fn resolve(&self, relative: &str) -> io::Result<PathBuf> {
        let relative = Path::new(relative);
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        format!("path escapes workspace root: {}", relative.display()),
                    ));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        format!("absolute path not allowed: {}", relative.display()),
                    ));
                }
            }
        }
        Ok(resolved)
    }

    pub async fn read_file(&self, relative: &str) -> io::Result<Option<Vec<u8>>> {
        let path = self.resolve(relative)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn write_file(&self, relative: &str, content: &[u8]) -> io::Result<()> {
        let path = self.resolve(relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await
    }

    pub async fn create_directory(&self, relative: &str) -> io::Result<()> {
        let path = self.resolve(relative)?;
        tokio::fs::create_dir_all(path).await
    }

    pub async fn remove_path(&self, relative: &str) -> io::Result<()> {
        let path = self.resolve(relative)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await,
            Ok(_) => tokio::fs::remove_file(&path).await,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Recursively lists every file (not directory) under `relative`,
    /// paths relative to the jail root, POSIX-separated. `glob` is a
    /// simple trailing-extension filter (`*.ext`) — enough for the
    /// workspace-file enumeration use case, not a full glob engine.
    pub async fn list_files(&self, relative: &str, glob: Option<&str>) -> io::Result<Vec<String>> {
        let base = self.resolve(relative)?;
        let mut out = Vec::new();
        if tokio::fs::metadata(&base).await.is_err() {
            return Ok(out);
        }
        let mut stack = vec![base.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(path);
                } else {
                    let rel = path
                        .strip_prefix(&self.root)
                        .unwrap_or(&path)
                        .to_string_lossy()
                        .replace('\\', "/");
                    if matches_glob(&rel, glob) {
                        out.push(rel);
                    }
                }
            }
        }
        out.sort();
        Ok(out)
    }

    pub async fn destroy(&self) -> io::Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn matches_glob(path: &str, glob: Option<&str>) -> bool {
    match glob {
        None => true,
        Some(pattern) => match pattern.strip_prefix('*') {
            Some(suffix) => path.ends_with(suffix),
            None => path == pattern,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let jail = FsJail::new(dir.path());
        jail.write_file("a/b.txt", b"hello").await.unwrap();
        let content = jail.read_file("a/b.txt").await.unwrap();
        assert_eq!(content, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn read_missing_file_returns_none() {
        let dir = tempdir().unwrap();
        let jail = FsJail::new(dir.path());
        assert_eq!(jail.read_file("nope.txt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn parent_dir_escape_is_rejected() {
        let dir = tempdir().unwrap();
        let jail = FsJail::new(dir.path());
        let err = jail.read_file("../escape.txt").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn absolute_path_is_rejected() {
        let dir = tempdir().unwrap();
        let jail = FsJail::new(dir.path());
        let err = jail.read_file("/etc/passwd").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn list_files_recurses_and_sorts() {
        let dir = tempdir().unwrap();
        let jail = FsJail::new(dir.path());
        jail.write_file("workspace/b.rs", b"").await.unwrap();
        jail.write_file("workspace/a.rs", b"").await.unwrap();
        jail.write_file("workspace/nested/c.txt", b"").await.unwrap();
        let files = jail.list_files("workspace", None).await.unwrap();
        assert_eq!(files, vec!["workspace/a.rs", "workspace/b.rs", "workspace/nested/c.txt"]);
    }

    #[tokio::test]
    async fn list_files_applies_glob_suffix() {
        let dir = tempdir().unwrap();
        let jail = FsJail::new(dir.path());
        jail.write_file("workspace/a.rs", b"").await.unwrap();
        jail.write_file("workspace/a.txt", b"").await.unwrap();
        let files = jail.list_files("workspace", Some("*.rs")).await.unwrap();
        assert_eq!(files, vec!["workspace/a.rs"]);
    }

    #[tokio::test]
    async fn remove_path_is_idempotent() {
        let dir = tempdir().unwrap();
        let jail = FsJail::new(dir.path());
        jail.write_file("f.txt", b"x").await.unwrap();
        jail.remove_path("f.txt").await.unwrap();
        jail.remove_path("f.txt").await.unwrap();
        assert_eq!(jail.read_file("f.txt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_files_on_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let jail = FsJail::new(dir.path());
        assert!(jail.list_files("nope", None).await.unwrap().is_empty());
    }
}
