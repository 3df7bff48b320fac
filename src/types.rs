use std::fmt::Debug;

/// Outcome of asking a [`DataSource`](crate::traits::DataSource) for a key.
///
/// Only `Found` values ever reach the cache. `NotFound` is never memoized, so the next lookup of the same key asks
/// the source again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fetched<V> {
    Found(V),
    NotFound,
}

impl<V> Fetched<V> {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn into_option(self) -> Option<V> {
        match self {
            Self::Found(v) => Some(v),
            Self::NotFound => None,
        }
    }
}

impl<V> From<Option<V>> for Fetched<V> {
    fn from(value: Option<V>) -> Self {
        value.map_or(Self::NotFound, Self::Found)
    }
}

/// Where the debounced committer currently is in its cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitPhase {
    Idle,
    /// A flush is scheduled and waiting for the quiet period or the max delay to elapse.
    Pending,
    Flushing,
}

/// What `initialize` does when the snapshot file exists but cannot be decoded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SnapshotRecovery {
    /// Fail initialization with [`CacheError::Deserialization`](crate::error::CacheError::Deserialization).
    #[default]
    Fail,
    /// Log a warning and start with an empty map. The broken file is overwritten by the next flush.
    StartEmpty,
}
