use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::codec::SnapshotCodec;
use crate::error::CacheError;
use crate::storage::Storage;

/// The single file holding a cache's persisted state.
///
/// Saving never modifies the file in place: the new snapshot goes to a uniquely named temporary file next to it,
/// which is then renamed over the target. A crash at any point leaves either the old or the new snapshot, never a
/// mix of both. A crash before the rename orphans the temporary file; nothing cleans those up automatically.
pub struct SnapshotFile<K, V> {
    path:    PathBuf,
    storage: Arc<dyn Storage>,
    codec:   Arc<dyn SnapshotCodec<K, V>>,
}

impl<K: 'static, V: 'static> SnapshotFile<K, V> {
    pub fn new(path: impl Into<PathBuf>, storage: Arc<dyn Storage>, codec: Arc<dyn SnapshotCodec<K, V>>) -> Self {
        Self {
            path: path.into(),
            storage,
            codec,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `None` when there is no snapshot yet.
    pub async fn load(&self) -> Result<Option<HashMap<K, V>>, CacheError> {
        let exists = self
            .storage
            .exists(&self.path)
            .await
            .map_err(|e| CacheError::io(&self.path, e))?;
        if !exists {
            return Ok(None);
        }

        let mut bytes = Vec::new();
        self.storage
            .open_read(&self.path)
            .await
            .map_err(|e| CacheError::io(&self.path, e))?
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| CacheError::io(&self.path, e))?;

        let map = self
            .codec
            .decode(&bytes)
            .map_err(|source| CacheError::Deserialization {
                path: self.path.clone(),
                source,
            })?;
        debug!("Read {} bytes of snapshot from {}", bytes.len(), self.path.display());
        Ok(Some(map))
    }

    pub fn encode(&self, map: &HashMap<K, V>) -> Result<Vec<u8>, CacheError> {
        self.codec.encode(map).map_err(CacheError::Serialization)
    }

    pub async fn save(&self, map: &HashMap<K, V>) -> Result<(), CacheError> {
        let bytes = self.encode(map)?;
        self.write_encoded(&bytes).await
    }

    /// Atomically replace the snapshot with already encoded content.
    pub async fn write_encoded(&self, bytes: &[u8]) -> Result<(), CacheError> {
        let temp = self.temp_path();

        if let Err(err) = self.write_temp(&temp, bytes).await {
            self.discard_temp(&temp).await;
            return Err(err);
        }

        if let Err(err) = self.storage.rename(&temp, &self.path).await {
            self.discard_temp(&temp).await;
            return Err(CacheError::io(&self.path, err));
        }

        debug!("Wrote {} bytes of snapshot to {}", bytes.len(), self.path.display());
        Ok(())
    }

    async fn write_temp(&self, temp: &Path, bytes: &[u8]) -> Result<(), CacheError> {
        let mut writer = self
            .storage
            .open_write(temp)
            .await
            .map_err(|e| CacheError::io(temp, e))?;
        writer.write_all(bytes).await.map_err(|e| CacheError::io(temp, e))?;
        writer.shutdown().await.map_err(|e| CacheError::io(temp, e))
    }

    async fn discard_temp(&self, temp: &Path) {
        if let Err(err) = self.storage.delete(temp).await {
            warn!("Could not remove temporary snapshot {}: {err}", temp.display());
        }
    }

    // Same directory as the target so the rename never crosses a volume boundary.
    fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(".");
        name.push(self.path.file_name().unwrap_or_else(|| "snapshot".as_ref()));
        name.push(format!(".{:016x}.tmp", rand::random::<u64>()));
        self.path.with_file_name(name)
    }
}

impl<K, V> Debug for SnapshotFile<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotFile")
            .field("path", &self.path)
            .field("storage", &self.storage)
            .finish()
    }
}
