//! Error types for Basalt.

use thiserror::Error;

/// Result type alias using Basalt's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Basalt operations.
///
/// Programming-contract violations (wrong handle kind, capacity constants
/// exceeded, double-free) are *not* represented here: they are assertion
/// failures. This enum covers failures the caller can meaningfully observe.
#[derive(Error, Debug)]
pub enum Error {
    /// The device has no memory type satisfying an allocation request.
    #[error("no memory type matches request (type bits {type_bits:#x}, host visible: {host_visible})")]
    NoMatchingMemoryType {
        /// Acceptable memory type bits from the resource's requirements.
        type_bits: u32,
        /// Whether a CPU-mappable type was required.
        host_visible: bool,
    },

    /// The backend could not provide device memory, even for a fresh chunk.
    #[error("out of device memory (requested {0} bytes)")]
    OutOfDeviceMemory(u64),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Backend object creation failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// Vulkan-specific error.
    #[cfg(feature = "vulkan")]
    #[error("vulkan error: {0}")]
    Vulkan(#[from] crate::gpu::vulkan::VulkanError),
}
