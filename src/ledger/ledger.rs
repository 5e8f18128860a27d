//! The bitset ledger: occupancy bookkeeping over a growable unit range.

use super::Bitmap;

/// A bitset ledger over a range of fixed-size units.
///
/// Pairs a [`Bitmap`] with `(reserved, committed, used)` unit accounting.
/// `reserved` is the hard ceiling fixed at creation (the analogue of a
/// virtual-memory reservation), `committed` is how many units currently have
/// backing storage, and `used` counts allocated units.
///
/// Invariant: `used <= committed <= reserved`. Growth is monotonic within a
/// ledger's lifetime; a ledger never shrinks its committed range.
///
/// Two clients share this type with different growth shapes:
///
/// - CPU object pools commit one more growth quantum whenever `take` finds
///   no free unit;
/// - GPU chunk ledgers are created fully committed (`reserved == committed`)
///   and never grow, because a chunk's native allocation is fixed.
#[derive(Debug)]
pub struct Ledger {
    bitmap: Bitmap,
    reserved: usize,
    committed: usize,
    used: usize,
    growth: usize,
}

impl Ledger {
    /// Create a ledger with nothing committed.
    ///
    /// `growth` is the number of units committed per growth step.
    ///
    /// # Panics
    ///
    /// Panics if `growth` is 0 or `reserved` is 0.
    pub fn new(reserved: usize, growth: usize) -> Self {
        assert!(reserved > 0, "reserved unit count must be > 0");
        assert!(growth > 0, "growth quantum must be > 0");
        Self {
            bitmap: Bitmap::new(0),
            reserved,
            committed: 0,
            used: 0,
            growth,
        }
    }

    /// Create a ledger with the full reservation committed up front.
    pub fn new_committed(units: usize) -> Self {
        assert!(units > 0, "unit count must be > 0");
        Self {
            bitmap: Bitmap::new(units),
            reserved: units,
            committed: units,
            used: 0,
            growth: units,
        }
    }

    /// Allocate one unit, growing the committed range if necessary.
    ///
    /// # Panics
    ///
    /// Panics if the reservation is exhausted. Running a pool past its
    /// reserved ceiling is a capacity-contract violation, not a recoverable
    /// condition.
    pub fn take(&mut self) -> usize {
        let unit = match self.bitmap.first_clear() {
            Some(unit) => unit,
            None => {
                let unit = self.committed;
                self.grow();
                unit
            }
        };
        self.bitmap.set(unit);
        self.used += 1;
        unit
    }

    /// Free one unit.
    ///
    /// # Panics
    ///
    /// Panics if the unit is outside the committed range or already free.
    pub fn release(&mut self, unit: usize) {
        self.bitmap.clear(unit);
        self.used -= 1;
    }

    /// Allocate a contiguous aligned run of units, without growing.
    ///
    /// Fixed-size ledgers (GPU chunks) use this; there is nothing to grow
    /// into, the caller allocates a new chunk instead.
    pub fn take_run(&mut self, run_len: usize, align_units: usize) -> Option<usize> {
        let start = self.bitmap.find_clear_run(run_len, align_units)?;
        self.bitmap.set_run(start, run_len);
        self.used += run_len;
        Some(start)
    }

    /// Free a contiguous run of units.
    pub fn release_run(&mut self, start: usize, run_len: usize) {
        self.bitmap.clear_run(start, run_len);
        self.used -= run_len;
    }

    /// Commit one more growth quantum.
    fn grow(&mut self) {
        assert!(
            self.committed < self.reserved,
            "ledger reservation exhausted ({} units)",
            self.reserved
        );
        let new_committed = (self.committed + self.growth).min(self.reserved);
        tracing::trace!(
            from = self.committed,
            to = new_committed,
            "growing ledger"
        );
        self.committed = new_committed;
        self.bitmap.grow(new_committed);
        debug_assert!(self.used <= self.committed && self.committed <= self.reserved);
    }

    /// Units currently allocated.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Units currently committed.
    pub fn committed(&self) -> usize {
        self.committed
    }

    /// Hard unit ceiling.
    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// Whether a unit is allocated.
    pub fn is_used(&self, unit: usize) -> bool {
        self.bitmap.is_set(unit)
    }

    /// Visit every allocated unit in ascending order.
    pub fn for_each_used(&self, f: impl FnMut(usize)) {
        self.bitmap.for_each_set(f);
    }
}
