//! Bitset-ledger allocation.
//!
//! One allocation strategy used twice: a bit-per-unit occupancy map over a
//! growable region backs both the CPU object pools ([`SlotPool`]) and the
//! GPU chunk suballocator (`memory` module). The ledger only tracks
//! occupancy; what a "unit" is (an object slot, a 64-byte device block) is
//! the client's business.

mod bitmap;
#[allow(clippy::module_inception)]
mod ledger;
mod slot_pool;

pub use bitmap::Bitmap;
pub use ledger::Ledger;
pub use slot_pool::{SlotId, SlotPool};
