//! # rt-cache
//!
//! Async read-through cache with debounced, crash-safe snapshot persistence.
//!
//! Think of it as a memo table for a slow lookup service that survives restarts.
//!
//! # The Basics
//!
//! The crate is designed for the following use case:
//!
//! - Values are expensive to obtain: a remote API, a slow database query, a rate-limited service.
//! - Lookups by key are far more frequent than changes of the values behind them.
//! - Restarting the process shouldn't mean refetching everything.
//!
//! The cache operates on the following principles:
//!
//! - It is backend-agnostic. Misses go to a [`DataSource`], which also defines the key and value types.
//! - The whole map is persisted as a single snapshot file. The serialization format is pluggable via
//!   [`SnapshotCodec`](codec::SnapshotCodec).
//! - Snapshots are debounced: a burst of modifications results in a single write once the cache has been quiet for a
//!   while, but a steady stream of changes cannot postpone the write for longer than a configurable maximum.
//! - Snapshots are crash-safe: a new one is written to a temporary file next to the target and then renamed over it.
//!   A process killed at any moment leaves either the previous or the new snapshot behind.
//! - Misses and failed lookups are not memoized. The next `get` of the same key asks the source again.
//! - Fully async, built on Tokio.
//!
//! # Lifecycle
//!
//! A cache is created with a builder, must be [initialized](ReadThroughCache::initialize) before use, and should be
//! [disposed](ReadThroughCache::dispose) at shutdown so that pending changes are flushed:
//!
//! ```no_run
//! use rt_cache::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let source = FnSource::<String, u64, std::io::Error, _>::new(|key: String| async move {
//!     Ok(Fetched::Found(key.len() as u64))
//! });
//!
//! let cache = ReadThroughCache::builder()
//!     .name("lengths")
//!     .data_source(Arc::new(source))
//!     .codec(Arc::new(JsonCodec::new()))
//!     .path("lengths.cache")
//!     .build()?;
//!
//! cache.initialize().await?;
//! assert_eq!(cache.get(&"artist:foo".to_string()).await?, Some(10));
//! cache.dispose().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Durability
//!
//! The snapshot is never modified in place, so a crash never produces a torn file. The data isn't `fsync`-ed though:
//! the guarantee covers the process being killed, not the machine losing power.

pub mod cache;
pub mod codec;
pub mod committer;
pub mod error;
pub(crate) mod gate;
pub mod snapshot;
pub mod source;
pub mod storage;
pub mod store;
pub mod traits;
pub mod types;

#[doc(inline)]
pub use cache::ReadThroughCache;
#[doc(inline)]
pub use error::CacheError;
#[doc(inline)]
pub use traits::DataSource;

pub mod prelude {
    pub use crate::cache::ReadThroughCache;
    pub use crate::codec::JsonCodec;
    #[cfg(feature = "postcard")]
    pub use crate::codec::PostcardCodec;
    pub use crate::codec::SnapshotCodec;
    pub use crate::error::CacheError;
    pub use crate::source::FnSource;
    pub use crate::storage::{FsStorage, MemoryStorage, Storage};
    pub use crate::traits::{DataSource, Observer};
    pub use crate::types::*;
}
