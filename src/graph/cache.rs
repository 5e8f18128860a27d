//! Content-addressed object cache with frame-count eviction.

use crate::hash::content_hash;
use crate::table::HashTable;
use std::hash::Hash;

/// Hit/miss/eviction counters, logged on eviction sweeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Lookups that found a live entry.
    pub hits: u64,
    /// Lookups that created a new entry.
    pub misses: u64,
    /// Entries destroyed by lifetime sweeps.
    pub evictions: u64,
}

struct CacheEntry<V> {
    value: V,
    last_used: u64,
}

/// One kind's cache: content-description key → backing object, stamped with
/// the frame it was last declared in.
pub struct ObjectCache<K, V> {
    table: HashTable<K, CacheEntry<V>>,
    stats: CacheStats,
}

impl<K: Hash + Eq + Clone, V> ObjectCache<K, V> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            table: HashTable::new(),
            stats: CacheStats::default(),
        }
    }

    /// Resolve a declaration: on hit, stamp `last_used = frame`; on miss,
    /// run `create` and insert the result.
    pub fn resolve<E>(
        &mut self,
        key: &K,
        frame: u64,
        create: impl FnOnce() -> Result<V, E>,
    ) -> Result<&V, E> {
        let hash = content_hash(key);
        if let Some(entry) = self.table.get_mut(hash, key) {
            entry.last_used = frame;
            self.stats.hits += 1;
        } else {
            let value = create()?;
            self.table.insert(
                hash,
                key.clone(),
                CacheEntry {
                    value,
                    last_used: frame,
                },
            );
            self.stats.misses += 1;
        }
        Ok(&self.table.get(hash, key).expect("entry just resolved").value)
    }

    /// Borrow a live entry without stamping it.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.table.get(content_hash(key), key).map(|e| &e.value)
    }

    /// Destroy and remove every entry unused for more than `lifetime`
    /// frames, handing each evicted value to `destroy`.
    pub fn evict(&mut self, frame: u64, lifetime: u64, mut destroy: impl FnMut(K, V)) {
        let evictions = &mut self.stats.evictions;
        self.table.remove_if(
            |_, entry| frame.saturating_sub(entry.last_used) > lifetime,
            |key, entry| {
                *evictions += 1;
                destroy(key, entry.value);
            },
        );
    }

    /// Destroy and remove every entry. Teardown path.
    pub fn clear(&mut self, mut destroy: impl FnMut(K, V)) {
        self.table.remove_if(|_, _| true, |key, entry| destroy(key, entry.value));
    }

    /// Live entry count.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True when the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Counters so far.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

impl<K: Hash + Eq + Clone, V> Default for ObjectCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn resolve_ok(cache: &mut ObjectCache<u32, String>, key: u32, frame: u64) -> String {
        cache
            .resolve(&key, frame, || Ok::<_, Infallible>(format!("obj{}", key)))
            .unwrap()
            .clone()
    }

    #[test]
    fn test_hit_refreshes_miss_creates() {
        let mut cache = ObjectCache::new();
        resolve_ok(&mut cache, 1, 10);
        resolve_ok(&mut cache, 1, 11);
        resolve_ok(&mut cache, 2, 11);
        let stats = cache.stats();
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_redeclared_every_frame_never_evicted() {
        let mut cache = ObjectCache::new();
        let mut destroyed = Vec::new();
        for frame in 1..50 {
            resolve_ok(&mut cache, 1, frame);
            cache.evict(frame, 5, |k, _| destroyed.push(k));
        }
        assert!(destroyed.is_empty());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_unused_entry_evicted_exactly_once() {
        let mut cache = ObjectCache::new();
        resolve_ok(&mut cache, 1, 1);
        let mut destroyed = Vec::new();
        for frame in 2..20 {
            cache.evict(frame, 5, |k, _| destroyed.push(k));
        }
        assert_eq!(destroyed, vec![1]);
        assert_eq!(cache.stats().evictions, 1);
        // Not evicted at frame 6 (age 5 is within lifetime), gone at 7.
        let mut cache = ObjectCache::new();
        resolve_ok(&mut cache, 1, 1);
        cache.evict(6, 5, |_, _: String| panic!("evicted too early"));
        let mut gone = false;
        cache.evict(7, 5, |_, _| gone = true);
        assert!(gone);
    }
}
