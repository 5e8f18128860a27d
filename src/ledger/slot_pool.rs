//! Fixed-slot CPU object pool built on the bitset ledger.

use super::Ledger;
use std::mem::MaybeUninit;

/// Slots per backing page. Matches the ledger growth quantum so every
/// committed unit always has storage behind it.
const PAGE_SLOTS: usize = 64;

/// Identifier of a live slot in a [`SlotPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub u32);

impl SlotId {
    /// Raw index value.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A pool of `T` with stable slot addresses and bitset-ledger occupancy.
///
/// Storage is page-backed: committed pages are boxed arrays that never move,
/// so a slot's address is stable for the pool's lifetime. The pool grows one
/// page at a time as the ledger commits more units and never shrinks.
///
/// Misuse (out-of-range id, double remove, access to a free slot) is an
/// assertion failure.
pub struct SlotPool<T> {
    ledger: Ledger,
    pages: Vec<Box<[MaybeUninit<T>]>>,
}

impl<T> SlotPool<T> {
    /// Create a pool that can hold at most `reserved` objects.
    pub fn new(reserved: usize) -> Self {
        Self {
            ledger: Ledger::new(reserved.next_multiple_of(PAGE_SLOTS), PAGE_SLOTS),
            pages: Vec::new(),
        }
    }

    /// Insert an object, returning its slot id.
    pub fn insert(&mut self, value: T) -> SlotId {
        let unit = self.ledger.take();
        while self.pages.len() * PAGE_SLOTS <= unit {
            self.pages
                .push((0..PAGE_SLOTS).map(|_| MaybeUninit::uninit()).collect());
        }
        self.slot_mut(unit).write(value);
        SlotId(unit as u32)
    }

    /// Remove an object, returning it.
    ///
    /// # Panics
    ///
    /// Panics if the slot is not live.
    pub fn remove(&mut self, id: SlotId) -> T {
        let unit = id.index();
        self.ledger.release(unit);
        // The ledger asserted the bit was set, so the slot holds a value.
        unsafe { self.slot_mut(unit).assume_init_read() }
    }

    /// Borrow a live object.
    ///
    /// # Panics
    ///
    /// Panics if the slot is not live.
    pub fn get(&self, id: SlotId) -> &T {
        let unit = id.index();
        assert!(self.ledger.is_used(unit), "slot {} is not live", unit);
        unsafe { self.pages[unit / PAGE_SLOTS][unit % PAGE_SLOTS].assume_init_ref() }
    }

    /// Mutably borrow a live object.
    ///
    /// # Panics
    ///
    /// Panics if the slot is not live.
    pub fn get_mut(&mut self, id: SlotId) -> &mut T {
        let unit = id.index();
        assert!(self.ledger.is_used(unit), "slot {} is not live", unit);
        unsafe {
            self.pages[unit / PAGE_SLOTS][unit % PAGE_SLOTS].assume_init_mut()
        }
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.ledger.used()
    }

    /// True if no objects are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every live object in ascending slot order.
    pub fn for_each(&self, mut f: impl FnMut(SlotId, &T)) {
        self.ledger.for_each_used(|unit| {
            let value =
                unsafe { self.pages[unit / PAGE_SLOTS][unit % PAGE_SLOTS].assume_init_ref() };
            f(SlotId(unit as u32), value);
        });
    }

    /// Slot ids of every live object, ascending. Used when the visit needs
    /// `&mut self` (deferred cleanup passes).
    pub fn live_ids(&self) -> Vec<SlotId> {
        let mut ids = Vec::with_capacity(self.len());
        self.ledger.for_each_used(|unit| ids.push(SlotId(unit as u32)));
        ids
    }

    fn slot_mut(&mut self, unit: usize) -> &mut MaybeUninit<T> {
        &mut self.pages[unit / PAGE_SLOTS][unit % PAGE_SLOTS]
    }
}

impl<T> Drop for SlotPool<T> {
    fn drop(&mut self) {
        if std::mem::needs_drop::<T>() {
            let live = self.live_ids();
            for id in live {
                let unit = id.index();
                unsafe {
                    self.pages[unit / PAGE_SLOTS][unit % PAGE_SLOTS].assume_init_drop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_insert_get_remove() {
        let mut pool = SlotPool::new(128);
        let a = pool.insert("alpha".to_string());
        let b = pool.insert("beta".to_string());
        assert_eq!(pool.get(a), "alpha");
        assert_eq!(pool.get(b), "beta");
        assert_eq!(pool.remove(a), "alpha");
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_slot_reuse_after_remove() {
        let mut pool = SlotPool::new(128);
        let a = pool.insert(1u32);
        pool.remove(a);
        let c = pool.insert(3u32);
        assert_eq!(a, c);
        assert_eq!(*pool.get(c), 3);
    }

    #[test]
    #[should_panic(expected = "already free")]
    fn test_double_remove_panics() {
        let mut pool = SlotPool::new(64);
        let a = pool.insert(5u8);
        pool.remove(a);
        pool.remove(a);
    }

    #[test]
    #[should_panic(expected = "not live")]
    fn test_get_freed_slot_panics() {
        let mut pool = SlotPool::new(64);
        let a = pool.insert(5u8);
        pool.remove(a);
        pool.get(a);
    }

    #[test]
    fn test_growth_across_pages() {
        let mut pool = SlotPool::new(256);
        let ids: Vec<_> = (0..200).map(|i| pool.insert(i)).collect();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(*pool.get(*id), i);
        }
    }

    #[test]
    fn test_for_each_ascending() {
        let mut pool = SlotPool::new(64);
        let a = pool.insert(10);
        let b = pool.insert(20);
        let c = pool.insert(30);
        pool.remove(b);
        let mut seen = Vec::new();
        pool.for_each(|id, v| seen.push((id, *v)));
        assert_eq!(seen, vec![(a, 10), (c, 30)]);
    }

    #[test]
    fn test_drop_releases_live_values() {
        let marker = Rc::new(());
        {
            let mut pool = SlotPool::new(64);
            pool.insert(Rc::clone(&marker));
            pool.insert(Rc::clone(&marker));
            let mid = pool.insert(Rc::clone(&marker));
            pool.remove(mid);
            assert_eq!(Rc::strong_count(&marker), 3);
        }
        assert_eq!(Rc::strong_count(&marker), 1);
    }
}
