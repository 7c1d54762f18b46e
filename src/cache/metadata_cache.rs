//! Keyed store of shared, immutable metadata, flushable by decomposition.

use super::stats::CacheStats;
use super::{CacheKey, Cached};
use crate::exchange_error::FabExchangeError;
use crate::layout::BDKey;
use hashbrown::HashMap;
use std::sync::Arc;

/// Cache of `V` values keyed by `K`, indexed by every [`BDKey`] a key mentions.
///
/// Values are handed out as `Arc`s: an entry flushed while a caller still
/// holds it stays valid for that caller, the cache just stops returning it.
#[derive(Debug)]
pub struct MetadataCache<K, V> {
    entries: HashMap<K, Arc<V>>,
    by_bd: HashMap<BDKey, Vec<K>>,
    stats: CacheStats,
}

impl<K: CacheKey, V: Cached> MetadataCache<K, V> {
    pub fn new(name: &'static str) -> Self {
        Self {
            entries: HashMap::new(),
            by_bd: HashMap::new(),
            stats: CacheStats::new(name),
        }
    }

    /// Return the entry for `key`, building it on a miss. Every call counts as
    /// one use of the entry. A failed build leaves the cache unchanged.
    pub fn lookup_or_build<F>(&mut self, key: K, build: F) -> Result<Arc<V>, FabExchangeError>
    where
        F: FnOnce() -> Result<V, FabExchangeError>,
    {
        let value = match self.entries.get(&key) {
            Some(v) => v.clone(),
            None => self.insert(key, build()?),
        };
        Ok(self.count_use(value))
    }

    /// [`lookup_or_build`](Self::lookup_or_build) for values whose
    /// construction cannot fail.
    pub fn lookup_or_insert_with<F>(&mut self, key: K, build: F) -> Arc<V>
    where
        F: FnOnce() -> V,
    {
        let value = match self.entries.get(&key) {
            Some(v) => v.clone(),
            None => self.insert(key, build()),
        };
        self.count_use(value)
    }

    fn insert(&mut self, key: K, value: V) -> Arc<V> {
        let v = Arc::new(value);
        self.stats.record_build(v.bytes());
        for bd in key.bd_keys() {
            self.by_bd.entry(bd).or_default().push(key);
        }
        log::debug!("{} cache: built entry for {:?}", self.stats.name, key);
        self.entries.insert(key, v.clone());
        v
    }

    fn count_use(&mut self, value: Arc<V>) -> Arc<V> {
        let uses = value.record_use();
        self.stats.record_use(uses);
        value
    }

    /// Entry for `key` without counting a use.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries.get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove every entry whose key mentions `bd`; returns how many went.
    pub fn flush(&mut self, bd: BDKey) -> usize {
        let Some(keys) = self.by_bd.remove(&bd) else {
            return 0;
        };
        let mut erased = 0;
        for key in keys {
            if let Some(v) = self.entries.remove(&key) {
                self.stats.record_erase(v.use_count(), v.bytes());
                erased += 1;
            }
            for other in key.bd_keys().into_iter().filter(|k| *k != bd) {
                if let Some(list) = self.by_bd.get_mut(&other) {
                    list.retain(|k| *k != key);
                    if list.is_empty() {
                        self.by_bd.remove(&other);
                    }
                }
            }
        }
        if erased > 0 {
            log::debug!("{} cache: flushed {} entries of {}", self.stats.name, erased, bd);
        }
        erased
    }

    /// Remove everything; returns how many entries went.
    pub fn flush_all(&mut self) -> usize {
        let erased = self.entries.len();
        for (_, v) in self.entries.drain() {
            self.stats.record_erase(v.use_count(), v.bytes());
        }
        self.by_bd.clear();
        erased
    }

    /// Keys of decompositions with at least one entry.
    pub fn bd_keys(&self) -> impl Iterator<Item = BDKey> + '_ {
        self.by_bd.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
