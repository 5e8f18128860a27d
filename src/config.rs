//! Compile-time defaults and runtime configuration.
//!
//! All limits are fixed at renderer creation. There is no runtime
//! reconfiguration: pools and caches size themselves from these values once
//! and the rest of the crate asserts against them.

use crate::error::{Error, Result};

/// Number of frames the CPU may run ahead of the GPU.
pub const IN_FLIGHT_DEPTH: usize = 2;

/// Frames a cached object may go undeclared before it is evicted.
///
/// Must stay ahead of [`IN_FLIGHT_DEPTH`] by at least [`LIFETIME_MARGIN`]:
/// an object can still be referenced by any frame the GPU has not finished.
pub const OBJECT_LIFETIME_FRAMES: u64 = 5;

/// Safety margin between in-flight depth and eviction lifetime, in frames.
pub const LIFETIME_MARGIN: u64 = 1;

/// Default size of one native GPU memory chunk (64 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Suballocation block granularity in bytes.
pub const BLOCK_SIZE: u64 = 64;

/// Descriptor sets per descriptor pool.
pub const DESCRIPTOR_POOL_CAPACITY: u32 = 64;

/// Maximum passes per frame; the width of the pass dependency bitmask.
pub const MAX_PASSES: usize = 64;

/// Per-frame scratch buffer size (16 MiB).
pub const SCRATCH_SIZE: u64 = 16 * 1024 * 1024;

/// Renderer configuration.
///
/// `Config::default()` reproduces the compile-time constants above; embedders
/// that override fields must pass [`Config::validate`], which enforces the
/// cross-field invariants the constants satisfy by construction.
#[derive(Debug, Clone)]
pub struct Config {
    /// Frames in flight (ring depth).
    pub in_flight_depth: usize,
    /// Cache eviction lifetime, in frames.
    pub object_lifetime: u64,
    /// Native chunk size for the device suballocator.
    pub chunk_size: u64,
    /// Per-frame scratch buffer size.
    pub scratch_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            in_flight_depth: IN_FLIGHT_DEPTH,
            object_lifetime: OBJECT_LIFETIME_FRAMES,
            chunk_size: DEFAULT_CHUNK_SIZE,
            scratch_size: SCRATCH_SIZE,
        }
    }
}

impl Config {
    /// Validate cross-field invariants.
    ///
    /// # Errors
    ///
    /// - in-flight depth of zero;
    /// - object lifetime closer than [`LIFETIME_MARGIN`] to the in-flight
    ///   depth (a cached object must outlive every frame that can still be
    ///   executing on the GPU);
    /// - chunk or scratch size not a multiple of [`BLOCK_SIZE`].
    pub fn validate(&self) -> Result<()> {
        if self.in_flight_depth == 0 {
            return Err(Error::Config("in_flight_depth must be at least 1".into()));
        }
        if self.object_lifetime < self.in_flight_depth as u64 + LIFETIME_MARGIN {
            return Err(Error::Config(format!(
                "object_lifetime ({}) must be >= in_flight_depth ({}) + {}",
                self.object_lifetime, self.in_flight_depth, LIFETIME_MARGIN
            )));
        }
        if self.chunk_size == 0 || self.chunk_size % BLOCK_SIZE != 0 {
            return Err(Error::Config(format!(
                "chunk_size ({}) must be a non-zero multiple of {}",
                self.chunk_size, BLOCK_SIZE
            )));
        }
        if self.scratch_size == 0 || self.scratch_size % BLOCK_SIZE != 0 {
            return Err(Error::Config(format!(
                "scratch_size ({}) must be a non-zero multiple of {}",
                self.scratch_size, BLOCK_SIZE
            )));
        }
        Ok(())
    }
}
