//! Vulkan-specific error types.

use std::fmt;

/// Vulkan backend error type.
#[derive(Debug)]
pub enum VulkanError {
    /// Vulkan library not found.
    LibraryNotFound,
    /// No compatible GPU found.
    NoCompatibleDevice,
    /// No graphics queue available.
    NoGraphicsQueue,
    /// Required extension not supported.
    ExtensionNotSupported,
    /// Required feature not supported.
    FeatureNotSupported,
    /// Out of GPU memory.
    OutOfMemory,
    /// Vulkan initialization failed.
    InitializationFailed,
    /// GPU device lost (driver crash or device removal).
    DeviceLost,
    /// Shader module or pipeline construction failed.
    PipelineError(String),
    /// Other Vulkan error.
    Other(String),
}

impl fmt::Display for VulkanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LibraryNotFound => write!(f, "Vulkan library not found"),
            Self::NoCompatibleDevice => write!(f, "No Vulkan-compatible GPU found"),
            Self::NoGraphicsQueue => write!(f, "No graphics queue available"),
            Self::ExtensionNotSupported => write!(f, "Required Vulkan extension not supported"),
            Self::FeatureNotSupported => write!(f, "Required Vulkan feature not supported"),
            Self::OutOfMemory => write!(f, "Out of GPU memory"),
            Self::InitializationFailed => write!(f, "Vulkan initialization failed"),
            Self::DeviceLost => write!(f, "GPU device lost"),
            Self::PipelineError(msg) => write!(f, "Pipeline error: {}", msg),
            Self::Other(msg) => write!(f, "Vulkan error: {}", msg),
        }
    }
}

impl std::error::Error for VulkanError {}

impl From<ash::LoadingError> for VulkanError {
    fn from(_: ash::LoadingError) -> Self {
        Self::LibraryNotFound
    }
}

impl From<ash::vk::Result> for VulkanError {
    fn from(result: ash::vk::Result) -> Self {
        match result {
            ash::vk::Result::ERROR_OUT_OF_HOST_MEMORY => Self::OutOfMemory,
            ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => Self::OutOfMemory,
            ash::vk::Result::ERROR_INITIALIZATION_FAILED => Self::InitializationFailed,
            ash::vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            ash::vk::Result::ERROR_EXTENSION_NOT_PRESENT => Self::ExtensionNotSupported,
            ash::vk::Result::ERROR_FEATURE_NOT_PRESENT => Self::FeatureNotSupported,
            _ => Self::Other(format!("Vulkan error: {:?}", result)),
        }
    }
}
