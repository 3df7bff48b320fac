#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rt_cache::prelude::*;
use rt_cache::storage::{StorageReader, StorageWriter};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const SNAPSHOT: &str = "/var/cache/tags.cache";
pub const QUIET: Duration = Duration::from_millis(200);
pub const MAX_DELAY: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id:         u64,
    pub name:       String,
    pub post_count: u64,
}

impl Tag {
    pub fn new(id: u64, name: &str, post_count: u64) -> Self {
        Self {
            id,
            name: name.to_string(),
            post_count,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("tag catalog unavailable while looking up '{0}'")]
pub struct CatalogError(pub String);

/// A tag lookup service that remembers every request it gets.
#[derive(Debug, Default)]
pub struct TagCatalog {
    tags:    Mutex<HashMap<String, Tag>>,
    failing: Mutex<HashSet<String>>,
    fetches: Mutex<Vec<String>>,
    latency: Option<Duration>,
}

impl TagCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Default::default()
        }
    }

    pub fn with_tags(self, count: u64) -> Self {
        for id in 0..count {
            self.put(Tag::new(id, &format!("tag_{id}"), id * 3));
        }
        self
    }

    pub fn put(&self, tag: Tag) {
        self.tags.lock().insert(tag.name.clone(), tag);
    }

    pub fn lookup(&self, name: &str) -> Option<Tag> {
        self.tags.lock().get(name).cloned()
    }

    pub fn fail(&self, name: &str, failing: bool) {
        let mut set = self.failing.lock();
        if failing {
            set.insert(name.to_string());
        }
        else {
            set.remove(name);
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().len()
    }

    pub fn fetches_of(&self, name: &str) -> usize {
        self.fetches.lock().iter().filter(|n| *n == name).count()
    }
}

#[async_trait]
impl DataSource for TagCatalog {
    type Error = CatalogError;
    type Key = String;
    type Value = Tag;

    async fn fetch(&self, key: &String) -> Result<Fetched<Tag>, CatalogError> {
        self.fetches.lock().push(key.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.lock().contains(key) {
            return Err(CatalogError(key.clone()));
        }
        Ok(self.lookup(key).into())
    }
}

#[derive(Debug, Default)]
pub struct CountingObserver {
    pub flushes:      AtomicUsize,
    pub last_entries: AtomicUsize,
    pub flush_errors: AtomicUsize,
    pub fetch_errors: Mutex<Vec<String>>,
}

#[async_trait]
impl Observer<TagCatalog> for CountingObserver {
    async fn on_flush(&self, entries: usize) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        self.last_entries.store(entries, Ordering::SeqCst);
    }

    async fn on_flush_error(&self, _error: &CacheError) {
        self.flush_errors.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_fetch_error(&self, key: &String, _error: &CatalogError) {
        self.fetch_errors.lock().push(key.clone());
    }
}

/// In-memory storage whose renames can be made to fail, like a process killed between writing the temporary file
/// and moving it into place.
#[derive(Clone, Debug, Default)]
pub struct KillSwitchStorage {
    pub inner:  MemoryStorage,
    pub killed: Arc<AtomicBool>,
}

impl KillSwitchStorage {
    pub fn kill(&self, killed: bool) {
        self.killed.store(killed, Ordering::SeqCst);
    }

    fn check(&self) -> io::Result<()> {
        if self.killed.load(Ordering::SeqCst) {
            Err(io::Error::other("process killed"))
        }
        else {
            Ok(())
        }
    }
}

#[async_trait]
impl Storage for KillSwitchStorage {
    async fn exists(&self, path: &Path) -> io::Result<bool> {
        self.inner.exists(path).await
    }

    async fn open_read(&self, path: &Path) -> io::Result<StorageReader> {
        self.inner.open_read(path).await
    }

    async fn open_write(&self, path: &Path) -> io::Result<StorageWriter> {
        self.inner.open_write(path).await
    }

    async fn delete(&self, path: &Path) -> io::Result<()> {
        self.check()?;
        self.inner.delete(path).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.check()?;
        self.inner.rename(from, to).await
    }
}

pub fn cache_with(
    catalog: Arc<TagCatalog>,
    storage: Arc<dyn Storage>,
    observer: Arc<CountingObserver>,
) -> Arc<ReadThroughCache<TagCatalog>> {
    ReadThroughCache::builder()
        .name("tags")
        .data_source(catalog)
        .codec(Arc::new(JsonCodec::<String, Tag>::new()))
        .path(SNAPSHOT)
        .storage(storage)
        .observer(observer)
        .quiet_period(QUIET)
        .max_delay(MAX_DELAY)
        .dispose_timeout(Duration::from_secs(5))
        .build()
        .expect("cache builds")
}

pub fn memory_cache(catalog: Arc<TagCatalog>, storage: &MemoryStorage) -> Arc<ReadThroughCache<TagCatalog>> {
    cache_with(catalog, Arc::new(storage.clone()), Arc::new(CountingObserver::default()))
}

pub fn read_snapshot(storage: &MemoryStorage) -> Option<HashMap<String, Tag>> {
    storage
        .read_file(SNAPSHOT)
        .map(|bytes| serde_json::from_slice(&bytes).expect("snapshot is valid JSON"))
}

pub fn key(name: &str) -> String {
    name.to_string()
}
