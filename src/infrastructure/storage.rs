//! Sharded in-memory storage for per-principal limiter state.

use crate::application::ports::Storage;
use ahash::RandomState;
use dashmap::DashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// DashMap-backed [`Storage`].
///
/// An update locks only the shard holding its key, so checks for different
/// principals rarely contend.
#[derive(Debug)]
pub struct ShardedStorage<K: Eq + Hash, V> {
    map: DashMap<K, V, RandomState>,
}

impl<K: Eq + Hash, V> ShardedStorage<K, V> {
    pub fn new() -> Self {
        Self {
            map: DashMap::with_hasher(RandomState::new()),
        }
    }
}

impl<K: Eq + Hash, V> Default for ShardedStorage<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Storage<K, V> for ShardedStorage<K, V>
where
    K: Eq + Hash + Send + Sync + Debug,
    V: Send + Sync + Debug,
{
    fn upsert<R>(&self, key: K, init: impl FnOnce() -> V, f: impl FnOnce(&mut V) -> R) -> R {
        let mut entry = self.map.entry(key).or_insert_with(init);
        f(entry.value_mut())
    }

    fn evict(&self, mut stale: impl FnMut(&K, &V) -> bool) -> usize {
        let before = self.map.len();
        self.map.retain(|key, value| !stale(key, value));
        before.saturating_sub(self.map.len())
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}
