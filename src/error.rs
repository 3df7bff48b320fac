use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Boxed error produced by a [`SnapshotCodec`](crate::codec::SnapshotCodec).
pub type CodecError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The snapshot file exists but cannot be decoded.
    #[error("malformed snapshot '{}': {source}", path.display())]
    Deserialization {
        path:   PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("failed to encode snapshot: {0}")]
    Serialization(#[source] CodecError),

    #[error("snapshot I/O failed on '{}': {source}", path.display())]
    Io {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A forced flush didn't complete in time. The write itself keeps running in the background.
    #[error("snapshot commit did not finish within {0:?}")]
    CommitTimeout(Duration),

    #[error("snapshot commit failed: {0}")]
    CommitFailed(Arc<CacheError>),

    #[error("cache '{0}' is not initialized")]
    NotInitialized(String),

    #[error("cache '{0}' has been disposed")]
    Disposed(String),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors that leave previously persisted data intact and may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io { .. } | Self::CommitTimeout(_) => true,
            Self::CommitFailed(inner) => inner.is_transient(),
            _ => false,
        }
    }
}
