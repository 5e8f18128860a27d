//! Word-packed occupancy bitmap for slot and block tracking.

/// An occupancy bitmap: one bit per unit, 0 = free, 1 = allocated.
///
/// The whole crate is single-writer (one frame-building thread mutates pools
/// and caches), so bits live in plain `u64` words and scans skip fully-set
/// words in one comparison.
///
/// # Performance
///
/// - `first_clear`: O(n/64) worst case, where n is the number of units
/// - `find_clear_run`: O(n) worst case, but aligned starts are the only
///   candidates tested
/// - `set` / `clear` / `is_set`: O(1)
#[derive(Debug, Clone, Default)]
pub struct Bitmap {
    words: Vec<u64>,
    /// Total number of tracked units (may be less than `words.len() * 64`).
    len: usize,
}

impl Bitmap {
    /// Create a bitmap tracking `len` units, all free.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    /// Number of tracked units.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the bitmap tracks zero units.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Extend the bitmap to track `new_len` units; new units start free.
    ///
    /// # Panics
    ///
    /// Panics if `new_len` is smaller than the current length. Ledgers only
    /// ever grow.
    pub fn grow(&mut self, new_len: usize) {
        assert!(new_len >= self.len, "bitmap never shrinks");
        self.words.resize(new_len.div_ceil(64), 0);
        self.len = new_len;
    }

    /// Mark a unit allocated.
    ///
    /// # Panics
    ///
    /// Panics if the unit is out of range or already set.
    pub fn set(&mut self, unit: usize) {
        assert!(unit < self.len, "unit {} out of range ({})", unit, self.len);
        let (word, bit) = (unit / 64, unit % 64);
        assert!(
            self.words[word] & (1 << bit) == 0,
            "unit {} already allocated",
            unit
        );
        self.words[word] |= 1 << bit;
    }

    /// Mark a unit free.
    ///
    /// # Panics
    ///
    /// Panics if the unit is out of range or already free.
    pub fn clear(&mut self, unit: usize) {
        assert!(unit < self.len, "unit {} out of range ({})", unit, self.len);
        let (word, bit) = (unit / 64, unit % 64);
        assert!(
            self.words[word] & (1 << bit) != 0,
            "unit {} already free",
            unit
        );
        self.words[word] &= !(1 << bit);
    }

    /// Whether a unit is allocated.
    pub fn is_set(&self, unit: usize) -> bool {
        assert!(unit < self.len, "unit {} out of range ({})", unit, self.len);
        self.words[unit / 64] & (1 << (unit % 64)) != 0
    }

    /// Find the first free unit, skipping fully-set words.
    pub fn first_clear(&self) -> Option<usize> {
        for (word_idx, &word) in self.words.iter().enumerate() {
            if word == u64::MAX {
                continue;
            }
            let unit = word_idx * 64 + (!word).trailing_zeros() as usize;
            if unit < self.len {
                return Some(unit);
            }
        }
        None
    }

    /// Find a contiguous run of `run_len` free units whose start is a
    /// multiple of `align_units`.
    ///
    /// Returns the start unit of the first such run. This is the multi-bit
    /// generalization of [`first_clear`](Self::first_clear), used for block
    /// suballocation.
    ///
    /// # Panics
    ///
    /// Panics if `run_len` is 0 or `align_units` is 0.
    pub fn find_clear_run(&self, run_len: usize, align_units: usize) -> Option<usize> {
        assert!(run_len > 0, "run length must be > 0");
        assert!(align_units > 0, "alignment must be > 0");

        let mut start = 0;
        while start + run_len <= self.len {
            match self.first_set_in(start, run_len) {
                // A set bit inside the window: restart past it, re-aligned.
                Some(set) => {
                    start = (set + 1).next_multiple_of(align_units);
                }
                None => return Some(start),
            }
        }
        None
    }

    /// First set unit in `[start, start + len)`, if any.
    fn first_set_in(&self, start: usize, len: usize) -> Option<usize> {
        for unit in start..start + len {
            if self.words[unit / 64] & (1 << (unit % 64)) != 0 {
                return Some(unit);
            }
        }
        None
    }

    /// Number of allocated units.
    pub fn count_set(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Visit every allocated unit in ascending order.
    pub fn for_each_set(&self, mut f: impl FnMut(usize)) {
        for (word_idx, &word) in self.words.iter().enumerate() {
            let mut bits = word;
            while bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                f(word_idx * 64 + bit);
                bits &= bits - 1;
            }
        }
    }
}

impl Bitmap {
    /// Set a run of units. Each must currently be free.
    pub fn set_run(&mut self, start: usize, run_len: usize) {
        for unit in start..start + run_len {
            self.set(unit);
        }
    }

    /// Clear a run of units. Each must currently be set.
    pub fn clear_run(&mut self, start: usize, run_len: usize) {
        for unit in start..start + run_len {
            self.clear(unit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_clear_roundtrip() {
        let mut b = Bitmap::new(130);
        assert_eq!(b.count_set(), 0);
        b.set(0);
        b.set(64);
        b.set(129);
        assert!(b.is_set(64));
        assert!(!b.is_set(1));
        assert_eq!(b.count_set(), 3);
        b.clear(64);
        assert!(!b.is_set(64));
        assert_eq!(b.count_set(), 2);
    }

    #[test]
    #[should_panic(expected = "already allocated")]
    fn test_double_set_panics() {
        let mut b = Bitmap::new(8);
        b.set(3);
        b.set(3);
    }

    #[test]
    #[should_panic(expected = "already free")]
    fn test_double_clear_panics() {
        let mut b = Bitmap::new(8);
        b.clear(3);
    }

    #[test]
    fn test_first_clear_skips_full_words() {
        let mut b = Bitmap::new(200);
        for i in 0..130 {
            b.set(i);
        }
        assert_eq!(b.first_clear(), Some(130));
    }

    #[test]
    fn test_first_clear_none_when_full() {
        let mut b = Bitmap::new(65);
        for i in 0..65 {
            b.set(i);
        }
        assert_eq!(b.first_clear(), None);
    }

    #[test]
    fn test_find_clear_run_alignment() {
        let mut b = Bitmap::new(64);
        b.set(0);
        // First aligned candidate at 4 is free for 4 units.
        assert_eq!(b.find_clear_run(4, 4), Some(4));
        b.set_run(4, 4);
        assert_eq!(b.find_clear_run(4, 4), Some(8));
    }

    #[test]
    fn test_find_clear_run_restarts_past_obstacle() {
        let mut b = Bitmap::new(32);
        b.set(5);
        // Bits 0..4 are free, so the run fits at 0.
        assert_eq!(b.find_clear_run(4, 4), Some(0));
        b.set_run(0, 4);
        // [4..8) is blocked by bit 5; next aligned candidate is 8.
        assert_eq!(b.find_clear_run(4, 4), Some(8));
    }

    #[test]
    fn test_find_clear_run_too_long() {
        let b = Bitmap::new(16);
        assert_eq!(b.find_clear_run(17, 1), None);
    }

    #[test]
    fn test_for_each_set_ascending() {
        let mut b = Bitmap::new(150);
        for &i in &[140, 3, 64, 65, 0] {
            b.set(i);
        }
        let mut seen = Vec::new();
        b.for_each_set(|u| seen.push(u));
        assert_eq!(seen, vec![0, 3, 64, 65, 140]);
    }

    #[test]
    fn test_grow_preserves_bits() {
        let mut b = Bitmap::new(10);
        b.set(9);
        b.grow(100);
        assert!(b.is_set(9));
        assert!(!b.is_set(99));
        assert_eq!(b.len(), 100);
    }
}
