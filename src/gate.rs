use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// Per-key single-flight for cache misses.
///
/// The first task to miss on a key gets the permit and goes to the data source; concurrent misses on the same key
/// queue up behind it and re-check the map once they get their turn. Gates exist only while somebody holds or waits
/// for them.
#[derive(Debug)]
pub(crate) struct MissGates<K> {
    gates: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K> Default for MissGates<K> {
    fn default() -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> MissGates<K>
where
    K: Hash + Eq + Clone,
{
    pub(crate) async fn acquire(&self, key: &K) -> MissPermit<'_, K> {
        let gate = Arc::clone(self.gates.lock().entry(key.clone()).or_default());
        let guard = gate.lock_owned().await;
        MissPermit {
            gates: self,
            key:   key.clone(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn gate_count(&self) -> usize {
        self.gates.lock().len()
    }
}

pub(crate) struct MissPermit<'a, K>
where
    K: Hash + Eq + Clone,
{
    gates: &'a MissGates<K>,
    key:   K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K> Drop for MissPermit<'_, K>
where
    K: Hash + Eq + Clone,
{
    fn drop(&mut self) {
        let mut gates = self.gates.gates.lock();
        if let Some(guard) = self.guard.take() {
            // One reference is held by the map and one by our guard. Anything above that is a waiter which will
            // remove the gate itself when done.
            let idle = gates
                .get(&self.key)
                .is_some_and(|gate| Arc::ptr_eq(gate, OwnedMutexGuard::mutex(&guard)) && Arc::strong_count(gate) == 2);
            if idle {
                gates.remove(&self.key);
            }
            drop(guard);
        }
    }
}
