//! Errors raised by the Vulkan layer.

use ash::vk;
use thiserror::Error;

/// Everything except the swapchain staleness codes handled inside
/// [`crate::swapchain`] is treated as fatal by the engine.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Failed to load the Vulkan loader library
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// GPU allocator error other than running out of memory
    #[error("Allocator error: {0}")]
    Allocator(gpu_allocator::AllocationError),

    /// Validation was requested but VK_LAYER_KHRONOS_validation is not installed
    #[error("Validation layers requested but not available")]
    ValidationUnavailable,

    /// No physical device passed the suitability checks
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Devices exist but none has a queue family for graphics and presentation
    #[error("No queue family supports both graphics and presentation")]
    QueueFamilyUnsupported,

    /// vkCreateDevice failed
    #[error("Logical device creation failed: {0}")]
    DeviceCreationFailed(vk::Result),

    /// A required instance or device extension is missing
    #[error("Required extension not supported: {0}")]
    ExtensionUnsupported(String),

    /// Host or device memory exhausted
    #[error("Out of memory")]
    OutOfMemory,

    /// No memory type matched both the filter and the requested properties
    #[error("No memory type matches filter {type_filter:#b} with properties {required:?}")]
    NoMatchingMemoryType {
        type_filter: u32,
        required: vk::MemoryPropertyFlags,
    },

    /// Bytecode rejected before or during module creation
    #[error("Shader error: {0}")]
    Shader(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    Swapchain(String),

    /// Out-of-range sizes, offsets or indices passed by the caller
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

impl From<gpu_allocator::AllocationError> for RhiError {
    fn from(err: gpu_allocator::AllocationError) -> Self {
        match err {
            gpu_allocator::AllocationError::OutOfMemory => RhiError::OutOfMemory,
            other => RhiError::Allocator(other),
        }
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
