//! Minimal file-system surface used by the snapshot I/O.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite};

pub type StorageReader = Box<dyn AsyncRead + Send + Unpin>;
pub type StorageWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[async_trait]
pub trait Storage: Debug + Send + Sync + 'static {
    async fn exists(&self, path: &Path) -> io::Result<bool>;
    async fn open_read(&self, path: &Path) -> io::Result<StorageReader>;
    /// Create the file or truncate it if it already exists. Written data is only guaranteed to be in place after
    /// the writer has been shut down.
    async fn open_write(&self, path: &Path) -> io::Result<StorageWriter>;
    async fn delete(&self, path: &Path) -> io::Result<()>;
    /// Move `from` to `to`, atomically replacing `to` if it exists. Both paths are on the same volume.
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// The local file system, via `tokio::fs`.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsStorage;

#[async_trait]
impl Storage for FsStorage {
    async fn exists(&self, path: &Path) -> io::Result<bool> {
        tokio::fs::try_exists(path).await
    }

    async fn open_read(&self, path: &Path) -> io::Result<StorageReader> {
        Ok(Box::new(tokio::fs::File::open(path).await?))
    }

    async fn open_write(&self, path: &Path) -> io::Result<StorageWriter> {
        Ok(Box::new(tokio::fs::File::create(path).await?))
    }

    async fn delete(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        // rename(2) and MoveFileEx(MOVEFILE_REPLACE_EXISTING) both replace the target atomically.
        tokio::fs::rename(from, to).await
    }
}

/// In-process storage. Files live in a shared map, so clones of a `MemoryStorage` see the same files.
///
/// A writer publishes its content on every flush and on shutdown. Whatever has been written after the last flush is
/// lost when the writer is dropped, which is what a killed process would leave behind.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_file(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.files.lock().get(path.as_ref()).cloned()
    }

    pub fn write_file(&self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) {
        self.files.lock().insert(path.into(), content.into());
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths = self.files.lock().keys().cloned().collect::<Vec<_>>();
        paths.sort();
        paths
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no such file: {}", path.display()))
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn exists(&self, path: &Path) -> io::Result<bool> {
        Ok(self.files.lock().contains_key(path))
    }

    async fn open_read(&self, path: &Path) -> io::Result<StorageReader> {
        let content = self.read_file(path).ok_or_else(|| not_found(path))?;
        Ok(Box::new(io::Cursor::new(content)))
    }

    async fn open_write(&self, path: &Path) -> io::Result<StorageWriter> {
        self.files.lock().insert(path.to_path_buf(), Vec::new());
        Ok(Box::new(MemoryWriter {
            path:  path.to_path_buf(),
            buf:   Vec::new(),
            files: Arc::clone(&self.files),
        }))
    }

    async fn delete(&self, path: &Path) -> io::Result<()> {
        self.files.lock().remove(path).map(|_| ()).ok_or_else(|| not_found(path))
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut files = self.files.lock();
        let content = files.remove(from).ok_or_else(|| not_found(from))?;
        files.insert(to.to_path_buf(), content);
        Ok(())
    }
}

struct MemoryWriter {
    path:  PathBuf,
    buf:   Vec<u8>,
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
}

impl MemoryWriter {
    fn publish(&self) {
        self.files.lock().insert(self.path.clone(), self.buf.clone());
    }
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, data: &[u8]) -> Poll<io::Result<usize>> {
        self.get_mut().buf.extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.publish();
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.publish();
        Poll::Ready(Ok(()))
    }
}
