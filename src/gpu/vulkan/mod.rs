//! Vulkan backend, behind the `vulkan` feature.
//!
//! This module provides the ash-based implementation of
//! [`RenderBackend`](crate::gpu::RenderBackend).
//!
//! # Requirements
//!
//! - Vulkan 1.2+
//! - A GPU with a graphics queue; no surface extensions are required
//!   (rendering is headless — see [`VulkanBackend`])

mod backend;
mod context;
mod error;

pub use backend::VulkanBackend;
pub use context::VulkanContext;
pub use error::VulkanError;
