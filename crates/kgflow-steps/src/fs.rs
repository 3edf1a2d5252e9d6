//! Filesystem seam for the file, template and output handlers.
//!
//! Writes always create missing parent directories.

use dashmap::DashMap;
use std::io;
use std::path::{Path, PathBuf};

#[async_trait::async_trait]
pub trait FileSystem: Send + Sync + std::fmt::Debug {
    async fn read_to_string(&self, path: &Path) -> io::Result<String>;

    async fn write(&self, path: &Path, contents: &str) -> io::Result<()>;

    async fn copy(&self, from: &Path, to: &Path) -> io::Result<u64>;

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    async fn remove(&self, path: &Path) -> io::Result<()>;

    async fn exists(&self, path: &Path) -> bool;
}

/// The real filesystem, through tokio.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFileSystem;

async fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}

#[async_trait::async_trait]
impl FileSystem for OsFileSystem {
    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        ensure_parent(path).await?;
        tokio::fs::write(path, contents).await
    }

    async fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        ensure_parent(to).await?;
        tokio::fs::copy(from, to).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        ensure_parent(to).await?;
        tokio::fs::rename(from, to).await
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }
}

/// In-memory filesystem for tests. Directories are implicit.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: DashMap<PathBuf, String>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }

    pub fn get(&self, path: &Path) -> Option<String> {
        self.files.get(path).map(|entry| entry.value().clone())
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.files.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{} does not exist", path.display()))
}

#[async_trait::async_trait]
impl FileSystem for MemoryFileSystem {
    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.get(path).ok_or_else(|| not_found(path))
    }

    async fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        self.files.insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    async fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        let contents = self.get(from).ok_or_else(|| not_found(from))?;
        let len = contents.len() as u64;
        self.files.insert(to.to_path_buf(), contents);
        Ok(len)
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let (_, contents) = self.files.remove(from).ok_or_else(|| not_found(from))?;
        self.files.insert(to.to_path_buf(), contents);
        Ok(())
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        self.files.remove(path).map(|_| ()).ok_or_else(|| not_found(path))
    }

    async fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn os_write_creates_deep_parents() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a/b/c/d.txt");
        OsFileSystem.write(&path, "deep").await.unwrap();
        assert_eq!(OsFileSystem.read_to_string(&path).await.unwrap(), "deep");
    }

    #[tokio::test]
    async fn memory_move_and_remove() {
        let fs = MemoryFileSystem::new().with_file("/a", "x");
        fs.rename(Path::new("/a"), Path::new("/b")).await.unwrap();
        assert!(!fs.exists(Path::new("/a")).await);
        assert_eq!(fs.get(Path::new("/b")).as_deref(), Some("x"));
        fs.remove(Path::new("/b")).await.unwrap();
        assert!(fs.remove(Path::new("/b")).await.is_err());
    }
}
