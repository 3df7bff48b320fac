use std::collections::HashMap;
use std::hash::Hash;
use tokio::sync::RwLock;

/// The in-memory side of the cache.
///
/// The map is only reachable through [`read`](MapStore::read) and [`write`](MapStore::write). Both take a
/// synchronous closure so nothing borrowed from the map can outlive the critical section, and no critical section
/// can await while holding the lock.
///
/// The lock is Tokio's fair, write-preferring `RwLock`: a queued writer holds back readers that arrive after it.
#[derive(Debug)]
pub struct MapStore<K, V> {
    map: RwLock<HashMap<K, V>>,
}

impl<K, V> MapStore<K, V>
where
    K: Hash + Eq,
{
    /// `max_readers` caps how many readers may hold the lock at the same time.
    pub fn new(max_readers: u32) -> Self {
        Self {
            // Tokio reserves the top bits of the permit counter.
            map: RwLock::with_max_readers(HashMap::new(), max_readers.clamp(1, u32::MAX >> 3)),
        }
    }

    pub async fn read<R>(&self, f: impl FnOnce(&HashMap<K, V>) -> R) -> R {
        let guard = self.map.read().await;
        f(&guard)
    }

    pub async fn write<R>(&self, f: impl FnOnce(&mut HashMap<K, V>) -> R) -> R {
        let mut guard = self.map.write().await;
        f(&mut guard)
    }

    pub async fn get_cloned(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.read(|map| map.get(key).cloned()).await
    }

    pub async fn contains_key(&self, key: &K) -> bool {
        self.read(|map| map.contains_key(key)).await
    }

    pub async fn len(&self) -> usize {
        self.read(|map| map.len()).await
    }

    pub async fn is_empty(&self) -> bool {
        self.read(|map| map.is_empty()).await
    }
}
