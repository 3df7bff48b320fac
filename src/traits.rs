use async_trait::async_trait;
use std::fmt::Debug;
use std::fmt::Display;
use std::hash::Hash;

use crate::error::CacheError;
use crate::types::Fetched;

/// The backing source a [`ReadThroughCache`](crate::ReadThroughCache) falls back to on a miss.
///
/// The trait also defines the cache's key and value types.
#[async_trait]
pub trait DataSource: Sized + Send + Sync + 'static {
    /// The key type to be used with [`ReadThroughCache::get()`](crate::ReadThroughCache::get).
    type Key: Debug + Display + Hash + Clone + Eq + Sized + Send + Sync + 'static;
    type Value: Debug + Clone + Send + Sync + 'static;
    type Error: Display + Debug + Send + Sync + 'static;

    /// Look the key up in the backend. May be slow and may retry internally. Both `Ok(Fetched::NotFound)` and
    /// `Err(_)` are seen by the cache's users as a plain miss.
    async fn fetch(&self, key: &Self::Key) -> Result<Fetched<Self::Value>, Self::Error>;
}

/// Receives notifications about the cache's background activity.
#[async_trait]
pub trait Observer<DS>: Send + Sync + 'static
where
    DS: DataSource,
{
    /// A snapshot with `entries` records has been durably written.
    async fn on_flush(&self, _entries: usize) {}
    async fn on_flush_error(&self, _error: &CacheError) {}
    async fn on_fetch_error(&self, _key: &DS::Key, _error: &DS::Error) {}
}

/// Observer that ignores everything. Used when none is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl<DS> Observer<DS> for NoopObserver where DS: DataSource {}

/// The work a [`Committer`](crate::committer::Committer) runs once a burst of triggers has settled down.
#[async_trait]
pub trait CommitAction: Send + Sync + 'static {
    async fn commit(&self) -> Result<(), CacheError>;
}
