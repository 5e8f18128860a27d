//! Open-addressing hash table, the backbone of content-addressed caching.
//!
//! The caller computes the 64-bit content hash (see [`crate::hash`]); the
//! table never hashes keys itself. Lookup compares the stored hash first and
//! the full key second, so hash collisions are rejected without false hits.
//!
//! Probing is linear from `hash mod capacity`. The table rebuilds at double
//! capacity once load (live + tombstone slots) reaches 50%. Removal writes a
//! tombstone rather than clearing in place: probes continue across
//! tombstones, so a lookup can never be cut short by a hole punched in the
//! middle of someone else's probe chain. Rebuilds drop tombstones.

/// Initial slot count for an empty table's first insert.
const INITIAL_CAPACITY: usize = 16;

#[derive(Debug)]
enum Slot<K, V> {
    Empty,
    Tombstone,
    Occupied { hash: u64, key: K, value: V },
}

impl<K, V> Slot<K, V> {
    fn is_occupied(&self) -> bool {
        matches!(self, Slot::Occupied { .. })
    }
}

/// Fixed key/value open-addressing hash table with linear probing.
#[derive(Debug)]
pub struct HashTable<K, V> {
    slots: Vec<Slot<K, V>>,
    /// Live entries.
    len: usize,
    /// Live entries plus tombstones; drives the rebuild threshold.
    load: usize,
}

impl<K: Eq, V> HashTable<K, V> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
            load: 0,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the table holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert an entry under the caller-computed content hash.
    ///
    /// # Panics
    ///
    /// Panics if an entry with the same `(hash, key)` is already live; the
    /// caches built on this table look up before inserting, so a duplicate
    /// insert is a logic error upstream.
    pub fn insert(&mut self, hash: u64, key: K, value: V) {
        assert!(
            self.get(hash, &key).is_none(),
            "duplicate insert for an already-live key"
        );
        if self.slots.is_empty() || (self.load + 1) * 2 > self.slots.len() {
            self.rebuild();
        }

        let cap = self.slots.len();
        let mut index = (hash as usize) % cap;
        loop {
            match self.slots[index] {
                Slot::Empty | Slot::Tombstone => {
                    if matches!(self.slots[index], Slot::Empty) {
                        self.load += 1;
                    }
                    self.slots[index] = Slot::Occupied { hash, key, value };
                    self.len += 1;
                    return;
                }
                Slot::Occupied { .. } => {
                    index = (index + 1) % cap;
                }
            }
        }
    }

    /// Look up an entry, comparing hash then full key.
    pub fn get(&self, hash: u64, key: &K) -> Option<&V> {
        self.find(hash, key)
            .map(|index| match &self.slots[index] {
                Slot::Occupied { value, .. } => value,
                _ => unreachable!(),
            })
    }

    /// Look up an entry mutably.
    pub fn get_mut(&mut self, hash: u64, key: &K) -> Option<&mut V> {
        let index = self.find(hash, key)?;
        match &mut self.slots[index] {
            Slot::Occupied { value, .. } => Some(value),
            _ => unreachable!(),
        }
    }

    /// Remove an entry, returning its value. The slot becomes a tombstone.
    pub fn remove(&mut self, hash: u64, key: &K) -> Option<V> {
        let index = self.find(hash, key)?;
        let slot = std::mem::replace(&mut self.slots[index], Slot::Tombstone);
        self.len -= 1;
        match slot {
            Slot::Occupied { value, .. } => Some(value),
            _ => unreachable!(),
        }
    }

    /// Visit every live entry. Order is unspecified.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        for slot in &self.slots {
            if let Slot::Occupied { key, value, .. } = slot {
                f(key, value);
            }
        }
    }

    /// Remove every entry for which `pred` returns true, moving each evicted
    /// `(key, value)` into `evicted` so backing resources can be released.
    pub fn remove_if(
        &mut self,
        mut pred: impl FnMut(&K, &V) -> bool,
        mut evicted: impl FnMut(K, V),
    ) {
        for slot in &mut self.slots {
            if let Slot::Occupied { key, value, .. } = slot {
                if pred(key, value) {
                    let taken = std::mem::replace(slot, Slot::Tombstone);
                    self.len -= 1;
                    match taken {
                        Slot::Occupied { key, value, .. } => evicted(key, value),
                        _ => unreachable!(),
                    }
                }
            }
        }
    }

    /// Probe for the slot index holding `(hash, key)`.
    ///
    /// Stops at the first [`Slot::Empty`] (the key cannot be further along:
    /// inserts never jump an empty slot) or after a full cycle.
    fn find(&self, hash: u64, key: &K) -> Option<usize> {
        if self.slots.is_empty() {
            return None;
        }
        let cap = self.slots.len();
        let mut index = (hash as usize) % cap;
        for _ in 0..cap {
            match &self.slots[index] {
                Slot::Empty => return None,
                Slot::Tombstone => {}
                Slot::Occupied {
                    hash: slot_hash,
                    key: slot_key,
                    ..
                } => {
                    if *slot_hash == hash && slot_key == key {
                        return Some(index);
                    }
                }
            }
            index = (index + 1) % cap;
        }
        None
    }

    /// Rehash every live entry into a table of double capacity, dropping
    /// tombstones.
    fn rebuild(&mut self) {
        let new_cap = (self.slots.len() * 2).max(INITIAL_CAPACITY);
        tracing::trace!(from = self.slots.len(), to = new_cap, "rebuilding hash table");
        let old = std::mem::replace(
            &mut self.slots,
            (0..new_cap).map(|_| Slot::Empty).collect(),
        );
        self.len = 0;
        self.load = 0;
        for slot in old {
            if let Slot::Occupied { hash, key, value } = slot {
                self.insert_rehashed(hash, key, value);
            }
        }
    }

    /// Insert during a rebuild: capacity is already sufficient and the key
    /// is known unique.
    fn insert_rehashed(&mut self, hash: u64, key: K, value: V) {
        let cap = self.slots.len();
        let mut index = (hash as usize) % cap;
        while self.slots[index].is_occupied() {
            index = (index + 1) % cap;
        }
        self.slots[index] = Slot::Occupied { hash, key, value };
        self.len += 1;
        self.load += 1;
    }
}

impl<K: Eq, V> Default for HashTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::content_hash;

    #[test]
    fn test_insert_get_remove() {
        let mut t = HashTable::new();
        let h = content_hash(&"key");
        t.insert(h, "key", 42);
        assert_eq!(t.get(h, &"key"), Some(&42));
        assert_eq!(t.remove(h, &"key"), Some(42));
        assert_eq!(t.get(h, &"key"), None);
        assert!(t.is_empty());
    }

    #[test]
    fn test_collision_rejected_by_key_comparison() {
        let mut t = HashTable::new();
        // Same hash, different keys: both must be retrievable.
        t.insert(7, "a", 1);
        t.insert(7, "b", 2);
        assert_eq!(t.get(7, &"a"), Some(&1));
        assert_eq!(t.get(7, &"b"), Some(&2));
        assert_eq!(t.get(7, &"c"), None);
    }

    #[test]
    fn test_rebuild_preserves_every_entry_once() {
        let mut t = HashTable::new();
        // Enough inserts to force several rebuilds.
        for i in 0u64..500 {
            t.insert(content_hash(&i), i, i * 10);
        }
        assert_eq!(t.len(), 500);
        for i in 0u64..500 {
            assert_eq!(t.get(content_hash(&i), &i), Some(&(i * 10)));
        }
    }

    #[test]
    fn test_lookup_survives_removal_in_probe_chain() {
        // Three keys forced into one probe chain; removing the middle one
        // must not hide the one probed past it.
        let mut t = HashTable::new();
        t.insert(16, 160u32, 0);
        t.insert(16, 161u32, 1);
        t.insert(16, 162u32, 2);
        t.remove(16, &161u32);
        assert_eq!(t.get(16, &162u32), Some(&2));
        assert_eq!(t.get(16, &160u32), Some(&0));
    }

    #[test]
    fn test_insert_after_remove_reuses_tombstones() {
        let mut t = HashTable::new();
        for i in 0u64..8 {
            t.insert(i, i, i);
        }
        for i in 0u64..8 {
            t.remove(i, &i);
        }
        // Fresh inserts over tombstoned ground stay findable.
        for i in 100u64..108 {
            t.insert(i, i, i);
        }
        for i in 100u64..108 {
            assert_eq!(t.get(i, &i), Some(&i));
        }
    }

    #[test]
    #[should_panic(expected = "duplicate insert")]
    fn test_duplicate_insert_panics() {
        let mut t = HashTable::new();
        t.insert(1, "k", 1);
        t.insert(1, "k", 2);
    }

    #[test]
    fn test_remove_if_sweeps_matching_entries() {
        let mut t = HashTable::new();
        for i in 0u64..20 {
            t.insert(content_hash(&i), i, i);
        }
        let mut removed = Vec::new();
        t.remove_if(|_, v| *v % 2 == 0, |_, v| removed.push(v));
        assert_eq!(t.len(), 10);
        assert_eq!(removed.len(), 10);
        for i in 0u64..20 {
            let found = t.get(content_hash(&i), &i).is_some();
            assert_eq!(found, i % 2 == 1);
        }
    }
}
