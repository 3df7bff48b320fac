use async_trait::async_trait;
use fieldx_plus::fx_plus;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock, RwLockReadGuard};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::codec::SnapshotCodec;
use crate::committer::{Committer, DEFAULT_MAX_DELAY, DEFAULT_QUIET_PERIOD};
use crate::error::CacheError;
use crate::gate::MissGates;
use crate::snapshot::SnapshotFile;
use crate::storage::{FsStorage, Storage};
use crate::store::MapStore;
use crate::traits::{CommitAction, DataSource, NoopObserver, Observer};
use crate::types::{Fetched, SnapshotRecovery};

pub const DEFAULT_DISPOSE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_READERS: u32 = 8;

/// A read-through cache persisted to a single snapshot file.
///
/// ```ignore
/// let cache = ReadThroughCache::builder()
///     .name("tags")
///     .data_source(Arc::new(TagCatalog::new(api)))
///     .codec(Arc::new(JsonCodec::pretty()))
///     .path("tags.cache")
///     .quiet_period(Duration::from_secs(2))
///     .build()?;
///
/// cache.initialize().await?;
/// if let Some(tag) = cache.get(&"artist:foo".to_string()).await? {
///     println!("{} posts", tag.post_count);
/// }
/// cache.dispose().await;
/// ```
///
/// Call [`dispose()`](Self::dispose) when done with the cache. Nothing flushes it implicitly on drop: the background
/// commit keeps running as long as the runtime does, but changes made since the last flush are lost if the runtime
/// goes away first.
#[fx_plus(
    parent,
    no_new,
    default(off),
    sync,
    builder(
        doc("Builder object of [`ReadThroughCache`].", "", "See [`ReadThroughCache::builder()`] method."),
        method_doc("Implement builder pattern for [`ReadThroughCache`]."),
    )
)]
pub struct ReadThroughCache<DS>
where
    DS: DataSource,
{
    #[fieldx(vis(pub(crate)), builder(vis(pub), required), get(clone))]
    data_source: Arc<DS>,

    #[fieldx(builder(vis(pub), required), get(off))]
    codec: Arc<dyn SnapshotCodec<DS::Key, DS::Value>>,

    /// Location of the snapshot file.
    #[fieldx(builder(vis(pub), required, into), get(off))]
    path: PathBuf,

    #[fieldx(get(off), default(Arc::new(FsStorage) as Arc<dyn Storage>))]
    storage: Arc<dyn Storage>,

    /// Cache name. Most useful for debugging and logging.
    #[fieldx(get(off), builder(into), default(String::new()))]
    name: String,

    /// How long the cache must stay unmodified before the snapshot is written.
    #[fieldx(get(copy), default(DEFAULT_QUIET_PERIOD))]
    quiet_period: Duration,

    /// Upper bound on how long a modification may wait for the snapshot, however busy the cache is.
    #[fieldx(get(copy), default(DEFAULT_MAX_DELAY))]
    max_delay: Duration,

    /// How long [`dispose()`](Self::dispose) and [`flush()`](Self::flush) wait for the snapshot.
    #[fieldx(get(copy), default(DEFAULT_DISPOSE_TIMEOUT))]
    dispose_timeout: Duration,

    #[fieldx(get(copy), default(DEFAULT_MAX_READERS))]
    max_readers: u32,

    /// Let only one task at a time go to the data source for the same key.
    #[fieldx(get(copy), default(true))]
    coalesce_misses: bool,

    #[fieldx(get(copy), default(SnapshotRecovery::Fail))]
    recovery: SnapshotRecovery,

    #[fieldx(get(clone), default(Arc::new(NoopObserver) as Arc<dyn Observer<DS>>))]
    observer: Arc<dyn Observer<DS>>,

    #[fieldx(lazy, private, get(clone), builder(off))]
    store: Arc<MapStore<DS::Key, DS::Value>>,

    #[fieldx(lazy, private, get(clone), builder(off))]
    snapshot: Arc<SnapshotFile<DS::Key, DS::Value>>,

    #[fieldx(lazy, private, get(clone), builder(off))]
    committer: Arc<Committer<SnapshotWriter<DS>>>,

    #[fieldx(get(off), builder(off))]
    miss_gates: MissGates<DS::Key>,

    // Holds the number of entries loaded from the snapshot.
    #[fieldx(get(off), builder(off))]
    initialized: OnceCell<usize>,

    #[fieldx(get(off), builder(off))]
    disposed: AtomicBool,

    // Shared by every operation that modifies the map; dispose takes it exclusively to wait them out.
    #[fieldx(get(off), builder(off))]
    activity: RwLock<()>,
}

impl<DS> ReadThroughCache<DS>
where
    DS: DataSource,
{
    fn build_store(&self) -> Arc<MapStore<DS::Key, DS::Value>> {
        Arc::new(MapStore::new(self.max_readers()))
    }

    fn build_snapshot(&self) -> Arc<SnapshotFile<DS::Key, DS::Value>> {
        Arc::new(SnapshotFile::new(
            self.path.clone(),
            Arc::clone(&self.storage),
            Arc::clone(&self.codec),
        ))
    }

    fn build_committer(&self) -> Arc<Committer<SnapshotWriter<DS>>> {
        let writer = SnapshotWriter {
            name:     self.name().to_string(),
            store:    self.store(),
            snapshot: self.snapshot(),
            observer: self.observer(),
        };
        Arc::new(Committer::new(
            self.name(),
            Arc::new(writer),
            self.quiet_period(),
            self.max_delay(),
        ))
    }

    #[inline]
    pub fn name(&self) -> &str {
        if self.name.is_empty() {
            std::any::type_name::<DS::Value>()
        }
        else {
            &self.name
        }
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.path
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_ready(&self) -> Result<(), CacheError> {
        if self.is_disposed() {
            Err(CacheError::Disposed(self.name().to_string()))
        }
        else if !self.is_initialized() {
            Err(CacheError::NotInitialized(self.name().to_string()))
        }
        else {
            Ok(())
        }
    }

    // Once dispose has started, new modifications are refused and those already running finish before the final flush.
    async fn enter(&self) -> Result<RwLockReadGuard<'_, ()>, CacheError> {
        let active = self.activity.read().await;
        self.ensure_ready()?;
        Ok(active)
    }

    /// Load the snapshot into memory. Must complete before any other operation.
    ///
    /// Only the first successful call does the work, concurrent callers wait for it. Returns the number of entries
    /// loaded.
    #[instrument(level = "debug", skip(self), fields(cache = %self.name()))]
    pub async fn initialize(&self) -> Result<usize, CacheError> {
        if self.is_disposed() {
            return Err(CacheError::Disposed(self.name().to_string()));
        }
        self.initialized
            .get_or_try_init(|| self.load_snapshot())
            .await
            .copied()
    }

    async fn load_snapshot(&self) -> Result<usize, CacheError> {
        let snapshot = self.snapshot();
        let loaded = match snapshot.load().await {
            Ok(loaded) => loaded,
            Err(err @ CacheError::Deserialization { .. }) if self.recovery() == SnapshotRecovery::StartEmpty => {
                warn!("[{}] {err}; starting with an empty cache", self.name());
                None
            }
            Err(err) => return Err(err),
        };

        let found = loaded.is_some();
        let count = self
            .store()
            .write(|map| {
                map.clear();
                if let Some(loaded) = loaded {
                    map.extend(loaded);
                }
                map.len()
            })
            .await;

        if found {
            info!(
                "[{}] Loaded {count} cache items from {}",
                self.name(),
                snapshot.path().display()
            );
        }
        else {
            info!(
                "[{}] Cache file {} does not exist yet",
                self.name(),
                snapshot.path().display()
            );
        }

        Ok(count)
    }

    /// Look the key up, going to the data source on a miss.
    ///
    /// A key the source doesn't know, or fails to fetch, results in `Ok(None)` and is not remembered: the next call
    /// asks the source again. Errors are only returned for lifecycle misuse.
    #[instrument(level = "trace", skip(self))]
    pub async fn get(&self, key: &DS::Key) -> Result<Option<DS::Value>, CacheError> {
        let _active = self.enter().await?;

        let store = self.store();
        if let Some(value) = store.get_cloned(key).await {
            return Ok(Some(value));
        }

        let _permit = if self.coalesce_misses() {
            let permit = self.miss_gates.acquire(key).await;
            // Whoever had the gate before us may have filled the entry already.
            if let Some(value) = store.get_cloned(key).await {
                return Ok(Some(value));
            }
            Some(permit)
        }
        else {
            None
        };

        debug!("[{}] MISS({key})", self.name());

        match self.data_source().fetch(key).await {
            Ok(Fetched::Found(value)) => {
                store.write(|map| map.insert(key.clone(), value.clone())).await;
                // Never trigger while holding the write lock: the commit needs a read lock on the same map.
                self.committer().trigger();
                Ok(Some(value))
            }
            Ok(Fetched::NotFound) => {
                debug!("[{}] '{key}' not found in the data source", self.name());
                Ok(None)
            }
            Err(err) => {
                warn!("[{}] Failed to fetch '{key}': {err}", self.name());
                self.observer().on_fetch_error(key, &err).await;
                Ok(None)
            }
        }
    }

    /// Put a value into the cache directly, bypassing the data source. Returns the value it replaced.
    pub async fn insert(&self, key: DS::Key, value: DS::Value) -> Result<Option<DS::Value>, CacheError> {
        let _active = self.enter().await?;
        let previous = self.store().write(|map| map.insert(key, value)).await;
        self.committer().trigger();
        Ok(previous)
    }

    /// Drop a single entry. The next `get` for the key goes to the data source.
    pub async fn invalidate(&self, key: &DS::Key) -> Result<Option<DS::Value>, CacheError> {
        let _active = self.enter().await?;
        let removed = self.store().write(|map| map.remove(key)).await;
        if removed.is_some() {
            self.committer().trigger();
        }
        Ok(removed)
    }

    /// Drop everything. The empty state is persisted like any other change.
    #[instrument(level = "debug", skip(self), fields(cache = %self.name()))]
    pub async fn clear(&self) -> Result<(), CacheError> {
        let _active = self.enter().await?;
        let dropped = self
            .store()
            .write(|map| {
                let count = map.len();
                map.clear();
                count
            })
            .await;
        info!("[{}] Cleared {dropped} cache items", self.name());
        self.committer().trigger();
        Ok(())
    }

    pub async fn contains_key(&self, key: &DS::Key) -> Result<bool, CacheError> {
        self.ensure_ready()?;
        Ok(self.store().contains_key(key).await)
    }

    pub async fn len(&self) -> Result<usize, CacheError> {
        self.ensure_ready()?;
        Ok(self.store().len().await)
    }

    pub async fn is_empty(&self) -> Result<bool, CacheError> {
        self.ensure_ready()?;
        Ok(self.store().is_empty().await)
    }

    /// True when there are changes not yet written to the snapshot.
    pub fn has_pending_changes(&self) -> bool {
        self.committer().has_pending()
    }

    /// Write pending changes now and wait for them to land, up to the dispose timeout.
    pub async fn flush(&self) -> Result<(), CacheError> {
        self.flush_and_wait(self.dispose_timeout()).await
    }

    /// Write pending changes now and wait up to `timeout` for them to land.
    ///
    /// On [`CacheError::CommitTimeout`] the write is not cancelled; it completes in the background.
    pub async fn flush_and_wait(&self, timeout: Duration) -> Result<(), CacheError> {
        self.ensure_ready()?;
        self.committer().flush_and_wait(timeout).await
    }

    /// Flush pending changes and shut the cache down. Only the first call has any effect.
    ///
    /// Operations already modifying the cache, including misses still waiting on the data source, are given the
    /// chance to finish so that their changes make it into the final snapshot. The whole procedure is bounded by the
    /// dispose timeout. A modification that is still running when it expires, or a flush that fails or times out, is
    /// logged; the cache is disposed regardless. Every other operation returns [`CacheError::Disposed`] afterwards.
    #[instrument(level = "debug", skip(self), fields(cache = %self.name()))]
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let deadline = Instant::now() + self.dispose_timeout();
        if tokio::time::timeout_at(deadline, self.activity.write()).await.is_err() {
            warn!(
                "[{}] Operations still running after {:?}; their changes won't be persisted",
                self.name(),
                self.dispose_timeout()
            );
        }

        let committer = self.committer();
        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Err(err) = committer.flush_and_wait(remaining).await {
            warn!("[{}] Disposing without a confirmed snapshot: {err}", self.name());
        }
        committer.close();
        debug!("[{}] Disposed", self.name());
    }
}

impl<DS> Debug for ReadThroughCache<DS>
where
    DS: DataSource,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadThroughCache")
            .field("name", &self.name())
            .field("path", &self.path)
            .field("initialized", &self.is_initialized())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// The commit action of a [`ReadThroughCache`]: encode the map under its read lock, then write the snapshot with no
/// lock held.
pub struct SnapshotWriter<DS>
where
    DS: DataSource,
{
    name:     String,
    store:    Arc<MapStore<DS::Key, DS::Value>>,
    snapshot: Arc<SnapshotFile<DS::Key, DS::Value>>,
    observer: Arc<dyn Observer<DS>>,
}

impl<DS> SnapshotWriter<DS>
where
    DS: DataSource,
{
    async fn write_snapshot(&self) -> Result<usize, CacheError> {
        let (bytes, entries) = self
            .store
            .read(|map| Ok::<_, CacheError>((self.snapshot.encode(map)?, map.len())))
            .await?;
        self.snapshot.write_encoded(&bytes).await?;
        Ok(entries)
    }
}

#[async_trait]
impl<DS> CommitAction for SnapshotWriter<DS>
where
    DS: DataSource,
{
    async fn commit(&self) -> Result<(), CacheError> {
        match self.write_snapshot().await {
            Ok(entries) => {
                info!(
                    "[{}] Flushed {entries} cache items to {}",
                    self.name,
                    self.snapshot.path().display()
                );
                self.observer.on_flush(entries).await;
                Ok(())
            }
            Err(err) => {
                self.observer.on_flush_error(&err).await;
                Err(err)
            }
        }
    }
}
